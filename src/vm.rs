//! Virtual machine lifecycle.
//!
//! ```text
//!            start             suspend
//!  Created ────────▶ Running ◀────────▶ Suspended
//!                     │  ▲      resume
//!             migrate │  │ migration done
//!                     ▼  │
//!                   Migrating
//!
//!  any state except Destroyed ──destroy──▶ Destroyed
//! ```
//!
//! The transition table lives in [`transition`]; the kernel applies the
//! side effects (freezing activities, rebinding them to another host,
//! killing residents).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::resource::ResourceId;
use crate::types::{ActivityId, ActorId, Bytes, HostId, SimTime, VmId};

/// State of a virtual machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Created,
    Running,
    Suspended,
    Migrating,
    Destroyed,
}

impl VmState {
    /// Returns true when resident actors may progress.
    pub fn is_active(self) -> bool {
        matches!(self, VmState::Running | VmState::Migrating)
    }

    /// Returns true when the VM holds cores and memory on its host.
    pub fn holds_capacity(self) -> bool {
        !matches!(self, VmState::Created | VmState::Destroyed)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Created => "created",
            VmState::Running => "running",
            VmState::Suspended => "suspended",
            VmState::Migrating => "migrating",
            VmState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Lifecycle operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmOp {
    Start,
    Suspend,
    Resume,
    Migrate,
    FinishMigration,
    Destroy,
}

impl VmOp {
    pub fn name(self) -> &'static str {
        match self {
            VmOp::Start => "start",
            VmOp::Suspend => "suspend",
            VmOp::Resume => "resume",
            VmOp::Migrate => "migrate",
            VmOp::FinishMigration => "finish migrating",
            VmOp::Destroy => "destroy",
        }
    }
}

/// State reached by applying `op` in `state`, if legal.
pub fn transition(state: VmState, op: VmOp) -> Option<VmState> {
    use VmOp::*;
    use VmState::*;
    match (state, op) {
        (Created, Start) => Some(Running),
        (Running, Suspend) => Some(Suspended),
        (Suspended, Resume) => Some(Running),
        (Running, Migrate) => Some(Migrating),
        (Migrating, FinishMigration) => Some(Running),
        (Destroyed, Destroy) => None,
        (_, Destroy) => Some(Destroyed),
        _ => None,
    }
}

/// An ongoing live migration.
#[derive(Clone, Debug)]
pub(crate) struct Migration {
    pub activity: ActivityId,
    pub dst: HostId,
    pub issuer: ActorId,
    pub started_at: SimTime,
}

/// A virtual machine bound to a physical host.
#[derive(Clone, Debug)]
pub struct Vm {
    pub id: VmId,
    pub name: String,
    /// Host currently backing the VM.
    pub host: HostId,
    pub vcpus: u32,
    /// Memory footprint; also the amount of data a migration moves.
    pub ram: Bytes,
    pub state: VmState,
    pub(crate) cpu: ResourceId,
    pub(crate) migration: Option<Migration>,
}

impl Vm {
    /// Checks that `op` is legal without applying it.
    pub fn check(&self, op: VmOp) -> SimResult<VmState> {
        transition(self.state, op).ok_or_else(|| SimError::InvalidTransition {
            vm: self.name.clone(),
            op: op.name(),
            state: self.state,
        })
    }

    /// Applies `op`, returning the new state.
    pub fn apply(&mut self, op: VmOp) -> SimResult<VmState> {
        let next = self.check(op)?;
        self.state = next;
        Ok(next)
    }

    /// Destination host of an ongoing migration.
    pub fn migrating_to(&self) -> Option<HostId> {
        self.migration.as_ref().map(|m| m.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm {
            id: VmId(0),
            name: "VM00".into(),
            host: HostId(0),
            vcpus: 1,
            ram: 1e9,
            state: VmState::Created,
            cpu: ResourceId(0),
            migration: None,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut v = vm();
        assert_eq!(v.apply(VmOp::Start).unwrap(), VmState::Running);
        assert_eq!(v.apply(VmOp::Suspend).unwrap(), VmState::Suspended);
        assert_eq!(v.apply(VmOp::Resume).unwrap(), VmState::Running);
        assert_eq!(v.apply(VmOp::Migrate).unwrap(), VmState::Migrating);
        assert_eq!(v.apply(VmOp::FinishMigration).unwrap(), VmState::Running);
        assert_eq!(v.apply(VmOp::Destroy).unwrap(), VmState::Destroyed);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut v = vm();
        v.state = VmState::Suspended;
        let err = v.apply(VmOp::Migrate).unwrap_err();
        assert_eq!(err.to_string(), "cannot migrate VM 'VM00' while it is suspended");
        assert_eq!(v.state, VmState::Suspended);

        assert!(transition(VmState::Created, VmOp::Suspend).is_none());
        assert!(transition(VmState::Running, VmOp::Start).is_none());
        assert!(transition(VmState::Migrating, VmOp::Suspend).is_none());
        assert!(transition(VmState::Destroyed, VmOp::Destroy).is_none());
    }

    #[test]
    fn test_destroy_from_anywhere() {
        for s in [
            VmState::Created,
            VmState::Running,
            VmState::Suspended,
            VmState::Migrating,
        ] {
            assert_eq!(transition(s, VmOp::Destroy), Some(VmState::Destroyed));
        }
    }

    #[test]
    fn test_capacity_holding() {
        assert!(!VmState::Created.holds_capacity());
        assert!(VmState::Suspended.holds_capacity());
        assert!(VmState::Migrating.is_active());
        assert!(!VmState::Suspended.is_active());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&VmState::Migrating).unwrap();
        assert_eq!(json, "\"migrating\"");
    }
}
