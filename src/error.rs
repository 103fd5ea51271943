//! Error taxonomy of the simulation kernel.
//!
//! Every rejected kernel operation surfaces as a [`SimError`] at its call
//! site. Failures that hit a blocked actor (its host going down, its
//! computation being cancelled, a timeout) are delivered as the result of the
//! suspended call, so actor bodies handle them with ordinary `?` or `match`.

use thiserror::Error;

use crate::types::{ActorId, SimTime, VmId};
use crate::vm::VmState;

/// Errors raised by the simulation kernel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// The physical host backing the actor's work is off.
    #[error("host '{0}' failed")]
    HostFailure(String),

    /// The in-flight computation or wait was explicitly aborted.
    #[error("task cancelled")]
    TaskCancelled,

    /// Another actor is already blocked receiving on this mailbox.
    #[error("mailbox '{0}' already has a blocked receiver")]
    MailboxBusy(String),

    /// Illegal VM lifecycle call.
    #[error("cannot {op} VM '{vm}' while it is {state}")]
    InvalidTransition {
        vm: String,
        op: &'static str,
        state: VmState,
    },

    /// A bounded wait expired.
    #[error("wait timed out after {0}s")]
    Timeout(SimTime),

    /// Attempted to schedule an event before the current time.
    #[error("cannot schedule event at t={requested} when clock is at t={current}")]
    NonCausalEvent { requested: SimTime, current: SimTime },

    /// The destination host cannot admit the VM.
    #[error("host '{host}' cannot admit VM '{vm}': {reason}")]
    InsufficientCapacity {
        host: String,
        vm: String,
        reason: String,
    },

    /// No host has this name.
    #[error("unknown host '{0}'")]
    UnknownHost(String),

    /// No VM has this identifier or name.
    #[error("unknown VM '{0}'")]
    UnknownVm(String),

    /// No actor has this identifier.
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    /// The platform has no route between the two hosts.
    #[error("no route from '{src}' to '{dst}'")]
    NoRoute { src: String, dst: String },

    /// A negative or NaN amount of work, data or time.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// No storage has this name.
    #[error("unknown storage '{0}'")]
    UnknownStorage(String),

    /// The file does not exist on the storage.
    #[error("no file '{path}' on storage '{storage}'")]
    UnknownFile { storage: String, path: String },

    /// The storage is not attached to the caller's host.
    #[error("storage '{storage}' is not attached to host '{host}'")]
    StorageNotAttached { storage: String, host: String },

    /// A VM with this name already exists.
    #[error("name '{0}' is already in use")]
    DuplicateName(String),
}

impl SimError {
    pub(crate) fn unknown_vm(id: VmId) -> Self {
        SimError::UnknownVm(id.to_string())
    }

    /// Returns true for failures caused by the platform rather than by the caller.
    pub fn is_platform_failure(&self) -> bool {
        matches!(self, SimError::HostFailure(_) | SimError::TaskCancelled)
    }
}

/// Result type for kernel operations.
pub type SimResult<T> = Result<T, SimError>;
