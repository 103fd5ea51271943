//! # Gridlet
//!
//! A deterministic discrete-event kernel for simulating distributed
//! applications on hosts, virtual machines and networks.
//!
//! ## Design Principles
//!
//! - **Single Timeline**: One event queue orders everything by
//!   `(time, insertion sequence)`. Two runs of the same setup produce the
//!   same trace.
//! - **Actors as async bodies**: An actor is an `async` block. Blocking
//!   calls (`receive`, `execute`, `sleep`, `read`, `write`, `migrate`) suspend it until the
//!   kernel resumes it at a later simulated instant.
//! - **Max-min sharing**: CPUs and links are constraints with a capacity.
//!   Whenever the set of running activities changes, rates are recomputed by
//!   progressive filling and completion events are rescheduled.
//! - **VMs as sites**: A VM is a place actors run on, with its own CPU
//!   constraint nested inside its host's. VMs can be suspended, resumed,
//!   live-migrated and destroyed.
//! - **Disks as resources**: Storages attached to hosts share their read and
//!   write bandwidth the same way, and keep track of the files they hold.
//!
//! ## Features
//!
//! - `parallel` - Run independent simulation replicas on a rayon pool
//!
//! ## Quick Start
//!
//! ```rust
//! use gridlet::{PlatformBuilder, Simulation, Task};
//!
//! let config = PlatformBuilder::new()
//!     .host("alice", 1e9, 1)
//!     .host("bob", 1e9, 1)
//!     .link("l1", 1e6, 0.01)
//!     .route("alice", "bob", &["l1"])
//!     .build()
//!     .unwrap();
//!
//! let mut sim = Simulation::new(&config).unwrap();
//! let alice = sim.host("alice").unwrap();
//! let bob = sim.host("bob").unwrap();
//!
//! sim.spawn("ping", alice, vec![], |ctx| async move {
//!     ctx.send("bob", Task::new("ping", 0.0, 1e6))
//! })
//! .unwrap();
//! sim.spawn("pong", bob, vec![], |ctx| async move {
//!     let task = ctx.receive("bob").await?;
//!     assert_eq!(task.name, "ping");
//!     Ok(())
//! })
//! .unwrap();
//!
//! // One second on the wire plus 10ms of latency.
//! let report = sim.run().unwrap();
//! assert!((report.final_time - 1.01).abs() < 1e-9);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use gridlet::{ActorRegistry, Simulation};
//!
//! let mut registry = ActorRegistry::new();
//! registry.register("worker", |ctx| async move { /* ... */ Ok(()) });
//!
//! let mut sim = Simulation::from_file("platform.yaml")?;
//! sim.deploy(&registry)?;
//! sim.run()?;
//! ```

pub mod types;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod task;
pub mod resource;
pub mod vm;
pub mod platform;
pub mod storage;
pub mod config;
pub mod actor;
pub mod engine;
pub mod registry;
pub mod parallel;

mod kernel;
mod mailbox;

// Re-export commonly used types
pub use types::{ActivityId, ActorId, Bytes, Flops, HostId, LinkId, SimTime, Site, StorageId, VmId};
pub use error::{SimError, SimResult};
pub use event::{Event, EventId, EventKind};
pub use scheduler::EventScheduler;
pub use task::{Task, TaskKind};
pub use resource::{ActivityKind, ResourceModel};
pub use vm::VmState;
pub use storage::{File, StorageInfo};
pub use config::{ConfigError, PlatformBuilder, PlatformConfig};
pub use actor::{ActorContext, ActorState, ExitStatus, SimContext};
pub use engine::{RunReport, Simulation};
pub use registry::ActorRegistry;
pub use parallel::{run_replicas, ReplicaRunner};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// gridlet::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
