//! Core type definitions for the simulation kernel.
//!
//! This module defines the identifiers and scalar units used throughout the
//! engine. Identifiers are small newtypes so that a host can never be passed
//! where a VM or an actor is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated time, in seconds.
///
/// Time is a floating-point quantity because completion dates come out of
/// fair-sharing divisions (`remaining / rate`) that are rarely integral.
pub type SimTime = f64;

/// Amount of computation, in floating-point operations.
pub type Flops = f64;

/// Amount of data, in bytes.
pub type Bytes = f64;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub(crate) $raw);

        impl $name {
            /// Returns the raw index.
            #[inline]
            pub fn raw(self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of an actor (a simulated process).
    ActorId, u64, "actor#"
);
id_type!(
    /// Identifier of a physical host.
    HostId, u32, "host#"
);
id_type!(
    /// Identifier of a virtual machine.
    VmId, u32, "vm#"
);
id_type!(
    /// Identifier of a network link.
    LinkId, u32, "link#"
);
id_type!(
    /// Identifier of a storage device.
    StorageId, u32, "storage#"
);
id_type!(
    /// Identifier of an in-flight activity (execution, transfer, disk I/O or migration).
    ActivityId, u64, "activity#"
);

/// Where an actor runs: directly on a physical host, or inside a VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Site {
    /// A physical host.
    Host(HostId),
    /// A virtual machine, itself bound to a physical host.
    Vm(VmId),
}

impl From<HostId> for Site {
    fn from(host: HostId) -> Self {
        Site::Host(host)
    }
}

impl From<VmId> for Site {
    fn from(vm: VmId) -> Self {
        Site::Vm(vm)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Host(h) => write!(f, "{}", h),
            Site::Vm(v) => write!(f, "{}", v),
        }
    }
}
