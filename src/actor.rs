//! Actors and their handles on the kernel.
//!
//! An actor is an `async` body taking an [`ActorContext`]. Blocking calls
//! (`receive`, `execute`, `sleep`, `read`, `write`, `migrate`) are futures that hand a request
//! to the kernel on first poll and then wait for the kernel to store the
//! outcome. The kernel is only borrowed inside `poll`, never across an
//! `.await`.
//!
//! # Example
//!
//! ```
//! use gridlet::config::PlatformBuilder;
//! use gridlet::engine::Simulation;
//! use gridlet::task::Task;
//!
//! let config = PlatformBuilder::new().host("h", 1e9, 1).build().unwrap();
//! let mut sim = Simulation::new(&config).unwrap();
//! let host = sim.host("h").unwrap();
//!
//! sim.spawn("sender", host, vec![], |ctx| async move {
//!     ctx.send("mb", Task::new("job", 2e9, 0.0))
//! })
//! .unwrap();
//! sim.spawn("worker", host, vec![], |ctx| async move {
//!     let task = ctx.receive("mb").await?;
//!     ctx.execute(task.flops).await
//! })
//! .unwrap();
//!
//! let report = sim.run().unwrap();
//! assert_eq!(report.final_time, 2.0);
//! assert_eq!(report.completed, 2);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::{SimError, SimResult};
use crate::kernel::{Issued, Kernel, Outcome, Request, Resumed};
use crate::storage::{File, StorageInfo};
use crate::task::Task;
use crate::types::{ActorId, Bytes, Flops, HostId, SimTime, Site, StorageId, VmId};
use crate::vm::VmState;

/// A boxed actor body.
pub type ActorFuture = Pin<Box<dyn Future<Output = SimResult<()>>>>;

/// How an actor ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ExitStatus {
    /// The body returned `Ok(())`.
    Completed,
    /// The body returned an error.
    Failed(SimError),
    /// The actor was killed, directly or by destroying its VM.
    Killed,
}

/// Scheduling state of an actor.
#[derive(Clone, Debug, PartialEq)]
pub enum ActorState {
    Runnable,
    BlockedOnReceive(String),
    BlockedOnCompute,
    Sleeping,
    BlockedOnIo,
    BlockedOnMigration,
    Terminated(ExitStatus),
}

impl ActorState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, ActorState::Terminated(_))
    }

    /// Returns true when the actor waits on the kernel.
    pub fn is_blocked(&self) -> bool {
        !matches!(self, ActorState::Runnable | ActorState::Terminated(_))
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorState::Runnable => write!(f, "runnable"),
            ActorState::BlockedOnReceive(mb) => write!(f, "receiving on '{}'", mb),
            ActorState::BlockedOnCompute => write!(f, "computing"),
            ActorState::Sleeping => write!(f, "sleeping"),
            ActorState::BlockedOnIo => write!(f, "waiting on disk"),
            ActorState::BlockedOnMigration => write!(f, "migrating a VM"),
            ActorState::Terminated(ExitStatus::Completed) => write!(f, "completed"),
            ActorState::Terminated(ExitStatus::Failed(e)) => write!(f, "failed: {}", e),
            ActorState::Terminated(ExitStatus::Killed) => write!(f, "killed"),
        }
    }
}

/// Handle on the simulation, usable from actors and from the driver alike.
///
/// Every operation here is synchronous: it takes effect at the current
/// simulated instant.
#[derive(Clone)]
pub struct SimContext {
    kernel: Rc<RefCell<Kernel>>,
}

impl SimContext {
    pub(crate) fn new(kernel: Rc<RefCell<Kernel>>) -> Self {
        Self { kernel }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.kernel.borrow().now()
    }

    /// Looks a host up by name.
    pub fn host(&self, name: &str) -> SimResult<HostId> {
        self.kernel.borrow().platform().host_id(name)
    }

    /// Name of a host.
    pub fn host_name(&self, host: HostId) -> SimResult<String> {
        Ok(self.kernel.borrow().platform().host(host)?.name.clone())
    }

    /// All hosts, in declaration order.
    pub fn hosts(&self) -> Vec<HostId> {
        self.kernel
            .borrow()
            .platform()
            .hosts()
            .iter()
            .map(|h| h.id)
            .collect()
    }

    /// Looks a VM up by name.
    pub fn vm(&self, name: &str) -> SimResult<VmId> {
        self.kernel.borrow().vm_id(name)
    }

    /// Resolves a host or VM name.
    pub fn site(&self, name: &str) -> SimResult<Site> {
        self.kernel.borrow().resolve_site(name)
    }

    /// Spawns a new actor.
    ///
    /// # Arguments
    /// * `name` - Actor name, used in logs and reports
    /// * `site` - Host or VM the actor runs on
    /// * `args` - Argument vector, available through [`ActorContext::args`]
    /// * `body` - Builds the actor's future from its context
    pub fn spawn<F, Fut>(
        &self,
        name: &str,
        site: impl Into<Site>,
        args: Vec<String>,
        body: F,
    ) -> SimResult<ActorId>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = SimResult<()>> + 'static,
    {
        self.spawn_boxed(name, site.into(), args, |ctx| Box::pin(body(ctx)))
    }

    pub(crate) fn spawn_boxed(
        &self,
        name: &str,
        site: Site,
        args: Vec<String>,
        body: impl FnOnce(ActorContext) -> ActorFuture,
    ) -> SimResult<ActorId> {
        let id = self.kernel.borrow_mut().register_actor(name, site, args)?;
        let future = body(ActorContext {
            sim: self.clone(),
            id,
        });
        self.kernel.borrow_mut().spawned.push((id, future));
        Ok(id)
    }

    /// Terminates an actor and releases what it holds.
    pub fn kill(&self, actor: ActorId) -> SimResult<()> {
        self.kernel.borrow_mut().kill(actor)
    }

    /// Aborts whatever an actor is blocked on (computation, receive, sleep,
    /// disk access or migration); the actor resumes with
    /// [`SimError::TaskCancelled`]. Returns whether anything was aborted.
    pub fn cancel(&self, actor: ActorId) -> SimResult<bool> {
        self.kernel.borrow_mut().cancel(actor)
    }

    pub fn actor_state(&self, actor: ActorId) -> SimResult<ActorState> {
        self.kernel.borrow().actor_state(actor)
    }

    /// Remaining amount of the computation, disk access or migration an
    /// actor waits on.
    pub fn remaining(&self, actor: ActorId) -> Option<f64> {
        self.kernel.borrow().remaining(actor)
    }

    /// Live actors on a host or VM.
    pub fn residents(&self, site: impl Into<Site>) -> Vec<ActorId> {
        self.kernel.borrow().residents(site.into())
    }

    /// Creates a VM in the `Created` state.
    pub fn create_vm(&self, name: &str, host: HostId, vcpus: u32, ram: Bytes) -> SimResult<VmId> {
        self.kernel.borrow_mut().create_vm(name, host, vcpus, ram)
    }

    pub fn start_vm(&self, vm: VmId) -> SimResult<()> {
        self.kernel.borrow_mut().start_vm(vm)
    }

    pub fn suspend_vm(&self, vm: VmId) -> SimResult<()> {
        self.kernel.borrow_mut().suspend_vm(vm)
    }

    pub fn resume_vm(&self, vm: VmId) -> SimResult<()> {
        self.kernel.borrow_mut().resume_vm(vm)
    }

    pub fn destroy_vm(&self, vm: VmId) -> SimResult<()> {
        self.kernel.borrow_mut().destroy_vm(vm)
    }

    pub fn vm_state(&self, vm: VmId) -> SimResult<VmState> {
        self.kernel.borrow().vm_state(vm)
    }

    /// Host currently backing a VM.
    pub fn vm_host(&self, vm: VmId) -> SimResult<HostId> {
        Ok(self.kernel.borrow().vm(vm)?.host)
    }

    /// Cores of a host not committed to any VM.
    pub fn free_cores(&self, host: HostId) -> SimResult<u32> {
        self.kernel.borrow().free_cores(host)
    }

    /// Number of running activities on a host's CPU.
    pub fn host_load(&self, host: HostId) -> SimResult<usize> {
        self.kernel.borrow().host_load(host)
    }

    pub fn turn_off(&self, host: HostId) -> SimResult<()> {
        self.kernel.borrow_mut().turn_off(host)
    }

    pub fn turn_on(&self, host: HostId) -> SimResult<()> {
        self.kernel.borrow_mut().turn_on(host)
    }

    /// Looks a storage up by name.
    pub fn storage(&self, name: &str) -> SimResult<StorageId> {
        self.kernel.borrow().storage_id(name)
    }

    /// Size, occupation and file count of a storage.
    pub fn storage_info(&self, storage: StorageId) -> SimResult<StorageInfo> {
        self.kernel.borrow().storage_info(storage)
    }

    /// Storages attached to a host.
    pub fn storages_of(&self, host: HostId) -> Vec<StorageId> {
        self.kernel.borrow().storages_of(host)
    }

    /// Current size of a file.
    pub fn file_size(&self, file: &File) -> SimResult<Bytes> {
        self.kernel.borrow().file_size(file)
    }

    /// Renames a file on its storage. Takes no simulated time.
    pub fn move_file(&self, file: &mut File, to: &str) -> SimResult<()> {
        self.kernel.borrow_mut().move_file(file, to)
    }

    /// Deletes a file and frees its space.
    pub fn remove_file(&self, file: File) -> SimResult<()> {
        self.kernel.borrow_mut().remove_file(&file)
    }

    /// Number of tasks waiting to be received on a mailbox.
    pub fn mailbox_len(&self, mailbox: &str) -> usize {
        self.kernel.borrow().mailbox_len(mailbox)
    }

    /// Number of sends on a mailbox still waiting for a receiver.
    pub fn mailbox_pending(&self, mailbox: &str) -> usize {
        self.kernel.borrow().mailbox_pending(mailbox)
    }

    /// Ends the run once the current instant has been processed.
    pub fn stop_simulation(&self) {
        self.kernel.borrow_mut().request_stop();
    }
}

/// An actor's own handle: a [`SimContext`] plus the actor's identity.
///
/// Dereferences to [`SimContext`] for the non-blocking operations.
#[derive(Clone)]
pub struct ActorContext {
    sim: SimContext,
    id: ActorId,
}

impl Deref for ActorContext {
    type Target = SimContext;

    fn deref(&self) -> &SimContext {
        &self.sim
    }
}

impl ActorContext {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> String {
        self.sim
            .kernel
            .borrow()
            .actor_name(self.id)
            .unwrap_or_default()
    }

    pub fn args(&self) -> Vec<String> {
        self.sim
            .kernel
            .borrow()
            .actor_args(self.id)
            .unwrap_or_default()
    }

    /// Host or VM the actor runs on.
    pub fn site(&self) -> SimResult<Site> {
        self.sim.kernel.borrow().actor_site(self.id)
    }

    /// Physical host the actor runs on.
    pub fn host_id(&self) -> SimResult<HostId> {
        let kernel = self.sim.kernel.borrow();
        kernel.host_of(kernel.actor_site(self.id)?)
    }

    /// Posts a task on a mailbox without blocking.
    ///
    /// The transfer starts when a receiver is blocked on the mailbox, at once
    /// if one already is.
    pub fn send(&self, mailbox: &str, task: Task) -> SimResult<()> {
        self.sim.kernel.borrow_mut().send(self.id, mailbox, task)
    }

    /// Waits for the next task on a mailbox.
    pub async fn receive(&self, mailbox: &str) -> SimResult<Task> {
        let request = Request::Receive {
            mailbox: mailbox.to_string(),
            timeout: None,
        };
        into_task(self.syscall(request).await)
    }

    /// Waits for the next task on a mailbox for at most `timeout` seconds.
    pub async fn receive_timeout(&self, mailbox: &str, timeout: SimTime) -> SimResult<Task> {
        let request = Request::Receive {
            mailbox: mailbox.to_string(),
            timeout: Some(timeout),
        };
        into_task(self.syscall(request).await)
    }

    /// Computes `flops` on the actor's host or VM.
    pub async fn execute(&self, flops: Flops) -> SimResult<()> {
        self.syscall(Request::Execute(flops)).await.map(|_| ())
    }

    /// Lets `duration` seconds of simulated time pass.
    pub async fn sleep(&self, duration: SimTime) -> SimResult<()> {
        self.syscall(Request::Sleep(duration)).await.map(|_| ())
    }

    /// Live-migrates a VM to `dst`, blocking until the memory image is across.
    pub async fn migrate(&self, vm: VmId, dst: HostId) -> SimResult<()> {
        self.syscall(Request::Migrate { vm, dst }).await.map(|_| ())
    }

    /// Opens a file on a storage attached to the actor's host.
    ///
    /// A missing file is created empty. The handle starts at position 0.
    pub fn open(&self, storage: &str, path: &str) -> SimResult<File> {
        let mut kernel = self.sim.kernel.borrow_mut();
        let storage = kernel.storage_id(storage)?;
        kernel.open(self.id, storage, path)
    }

    /// Reads up to `bytes` from the file's position, at the storage's read
    /// bandwidth. Returns the number of bytes read; the position moves past
    /// them.
    pub async fn read(&self, file: &mut File, bytes: Bytes) -> SimResult<Bytes> {
        let request = Request::Read {
            storage: file.storage(),
            path: file.path().to_string(),
            offset: file.tell(),
            bytes,
        };
        let read = into_bytes(self.syscall(request).await)?;
        file.advance(read);
        Ok(read)
    }

    /// Writes `bytes` at the file's position, at the storage's write
    /// bandwidth. A write that does not fit in the free space is shortened.
    /// Returns the number of bytes written; the file then ends at the new
    /// position.
    pub async fn write(&self, file: &mut File, bytes: Bytes) -> SimResult<Bytes> {
        let request = Request::Write {
            storage: file.storage(),
            path: file.path().to_string(),
            offset: file.tell(),
            bytes,
        };
        let written = into_bytes(self.syscall(request).await)?;
        file.advance(written);
        Ok(written)
    }

    fn syscall(&self, request: Request) -> Syscall {
        Syscall {
            kernel: Rc::clone(&self.sim.kernel),
            actor: self.id,
            request: Some(request),
        }
    }
}

fn into_task(outcome: Outcome) -> SimResult<Task> {
    match outcome? {
        Resumed::Task(task) => Ok(task),
        other => unreachable!("receive resumed with {:?}", other),
    }
}

fn into_bytes(outcome: Outcome) -> SimResult<Bytes> {
    match outcome? {
        Resumed::Bytes(bytes) => Ok(bytes),
        other => unreachable!("disk access resumed with {:?}", other),
    }
}

/// Suspension point of a blocking call.
struct Syscall {
    kernel: Rc<RefCell<Kernel>>,
    actor: ActorId,
    request: Option<Request>,
}

impl Future for Syscall {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Outcome> {
        let this = &mut *self;
        let mut kernel = this.kernel.borrow_mut();
        if let Some(request) = this.request.take() {
            return match kernel.issue(this.actor, request) {
                Issued::Ready(outcome) => Poll::Ready(outcome),
                Issued::Blocked => Poll::Pending,
            };
        }
        match kernel.take_outcome(this.actor) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ActorState::Sleeping.is_blocked());
        assert!(ActorState::BlockedOnIo.is_blocked());
        assert!(!ActorState::Runnable.is_blocked());
        assert!(ActorState::Terminated(ExitStatus::Killed).is_terminated());
        assert!(!ActorState::Terminated(ExitStatus::Completed).is_blocked());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ActorState::BlockedOnReceive("mb".into()).to_string(),
            "receiving on 'mb'"
        );
        assert_eq!(
            ActorState::Terminated(ExitStatus::Failed(SimError::TaskCancelled)).to_string(),
            "failed: task cancelled"
        );
    }
}
