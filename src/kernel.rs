//! The simulation kernel.
//!
//! All mutable simulation state lives here: the event scheduler, the resource
//! model, the platform and its storages, VMs, actors and mailboxes. Actor contexts reach it
//! through a shared `Rc<RefCell<Kernel>>`, and the engine drives it by
//! polling actors and dispatching events.
//!
//! Blocking calls go through [`Kernel::issue`]. A call either completes
//! right away ([`Issued::Ready`]) or records what the actor waits for
//! ([`Wait`]); the event or kernel operation that ends the wait stores an
//! [`Outcome`] on the actor and pushes it onto the ready queue.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::actor::{ActorFuture, ActorState, ExitStatus};
use crate::config::{ConfigResult, PlatformConfig};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventId, EventKind};
use crate::mailbox::{Envelope, Mailbox, PendingSend};
use crate::platform::{Platform, Route};
use crate::resource::{ActivityKind, ResourceId, ResourceModel};
use crate::scheduler::EventScheduler;
use crate::storage::{File, StorageInfo, WriteReservation};
use crate::task::Task;
use crate::types::{ActivityId, ActorId, Bytes, Flops, HostId, SimTime, Site, StorageId, VmId};
use crate::vm::{Migration, Vm, VmOp, VmState};

/// What a blocked actor waits for.
#[derive(Clone, Debug)]
pub(crate) enum Wait {
    Exec(ActivityId),
    Receive {
        mailbox: String,
        timeout: Option<(EventId, SimTime)>,
    },
    Sleep(EventId),
    Migration {
        vm: VmId,
        activity: ActivityId,
    },
    Io {
        activity: ActivityId,
        io: DiskAccess,
    },
}

/// A disk read or write in flight.
#[derive(Clone, Debug)]
pub(crate) struct DiskAccess {
    storage: StorageId,
    path: String,
    offset: Bytes,
    amount: Bytes,
    /// Set for writes.
    reservation: Option<WriteReservation>,
}

/// Value a blocking call resumes with.
#[derive(Clone, Debug)]
pub(crate) enum Resumed {
    Done,
    Task(Task),
    Bytes(Bytes),
}

pub(crate) type Outcome = SimResult<Resumed>;

/// A blocking call.
#[derive(Clone, Debug)]
pub(crate) enum Request {
    Receive {
        mailbox: String,
        timeout: Option<SimTime>,
    },
    Execute(Flops),
    Sleep(SimTime),
    Migrate {
        vm: VmId,
        dst: HostId,
    },
    Read {
        storage: StorageId,
        path: String,
        offset: Bytes,
        bytes: Bytes,
    },
    Write {
        storage: StorageId,
        path: String,
        offset: Bytes,
        bytes: Bytes,
    },
}

/// Result of issuing a blocking call.
pub(crate) enum Issued {
    Ready(Outcome),
    Blocked,
}

#[derive(Debug)]
struct ActorRecord {
    name: String,
    site: Site,
    args: Vec<String>,
    state: ActorState,
    wait: Option<Wait>,
    outcome: Option<Outcome>,
    /// Set once the actor's host went down; every later blocking call fails.
    failure: Option<SimError>,
    /// Runnable, but its site is inactive.
    parked: bool,
}

#[derive(Debug)]
struct Transfer {
    mailbox: String,
    envelope: Envelope,
    receiver: ActorId,
    src: HostId,
    dst: HostId,
    latency: SimTime,
}

fn check_amount(what: &str, value: f64) -> SimResult<()> {
    if value.is_nan() || value < 0.0 {
        return Err(SimError::InvalidAmount(format!(
            "{} must be non-negative, got {}",
            what, value
        )));
    }
    Ok(())
}

pub(crate) struct Kernel {
    scheduler: EventScheduler,
    resources: ResourceModel,
    platform: Platform,
    vms: BTreeMap<VmId, Vm>,
    vm_index: HashMap<String, VmId>,
    next_vm: u32,
    actors: BTreeMap<ActorId, ActorRecord>,
    next_actor: u64,
    mailboxes: HashMap<String, Mailbox>,
    transfers: HashMap<ActivityId, Transfer>,
    ready: VecDeque<ActorId>,
    /// Bodies of actors spawned since the engine last looked.
    pub(crate) spawned: Vec<(ActorId, ActorFuture)>,
    /// Actors killed since the engine last looked; their bodies must be dropped.
    pub(crate) reaped: Vec<ActorId>,
    stop_requested: bool,
}

impl Kernel {
    /// Builds the platform and boots the configured VMs.
    pub fn new(config: &PlatformConfig) -> ConfigResult<Self> {
        let mut resources = ResourceModel::new();
        let platform = Platform::build(config, &mut resources)?;
        let mut kernel = Kernel {
            scheduler: EventScheduler::new(),
            resources,
            platform,
            vms: BTreeMap::new(),
            vm_index: HashMap::new(),
            next_vm: 0,
            actors: BTreeMap::new(),
            next_actor: 0,
            mailboxes: HashMap::new(),
            transfers: HashMap::new(),
            ready: VecDeque::new(),
            spawned: Vec::new(),
            reaped: Vec::new(),
            stop_requested: false,
        };

        for vm in &config.vms {
            let host = kernel.platform.host_id(&vm.host)?;
            let id = kernel.create_vm(&vm.name, host, vm.vcpus, vm.ram)?;
            if vm.start {
                kernel.start_vm(id)?;
            }
        }
        Ok(kernel)
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn scheduler_mut(&mut self) -> &mut EventScheduler {
        &mut self.scheduler
    }

    pub fn events_processed(&self) -> u64 {
        self.scheduler.processed()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn vm_id(&self, name: &str) -> SimResult<VmId> {
        self.vm_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownVm(name.to_string()))
    }

    /// Resolves a host or VM name into a site.
    pub fn resolve_site(&self, name: &str) -> SimResult<Site> {
        if let Ok(host) = self.platform.host_id(name) {
            return Ok(Site::Host(host));
        }
        self.vm_id(name).map(Site::Vm)
    }

    pub fn vm(&self, id: VmId) -> SimResult<&Vm> {
        self.vms.get(&id).ok_or_else(|| SimError::unknown_vm(id))
    }

    fn vm_mut(&mut self, id: VmId) -> SimResult<&mut Vm> {
        self.vms.get_mut(&id).ok_or_else(|| SimError::unknown_vm(id))
    }

    fn actor(&self, id: ActorId) -> SimResult<&ActorRecord> {
        self.actors.get(&id).ok_or(SimError::UnknownActor(id))
    }

    /// Physical host backing a site.
    pub fn host_of(&self, site: Site) -> SimResult<HostId> {
        match site {
            Site::Host(h) => Ok(h),
            Site::Vm(v) => Ok(self.vm(v)?.host),
        }
    }

    fn actor_host(&self, id: ActorId) -> SimResult<HostId> {
        self.host_of(self.actor(id)?.site)
    }

    fn host_on(&self, host: HostId) -> bool {
        self.platform.host(host).map(|h| h.on).unwrap_or(false)
    }

    fn site_active(&self, site: Site) -> bool {
        match site {
            Site::Host(h) => self.host_on(h),
            Site::Vm(v) => self
                .vms
                .get(&v)
                .is_some_and(|vm| vm.state.is_active() && self.host_on(vm.host)),
        }
    }

    // ------------------------------------------------------------------
    // Actor lifecycle
    // ------------------------------------------------------------------

    /// Creates the record of a new actor and queues it.
    pub fn register_actor(&mut self, name: &str, site: Site, args: Vec<String>) -> SimResult<ActorId> {
        let host = match site {
            Site::Host(h) => h,
            Site::Vm(v) => {
                let vm = self.vm(v)?;
                if vm.state == VmState::Destroyed {
                    return Err(SimError::InvalidTransition {
                        vm: vm.name.clone(),
                        op: "spawn an actor on",
                        state: vm.state,
                    });
                }
                vm.host
            }
        };
        let host = self.platform.host(host)?;
        if !host.on {
            return Err(SimError::HostFailure(host.name.clone()));
        }

        let id = ActorId(self.next_actor);
        self.next_actor += 1;
        self.actors.insert(
            id,
            ActorRecord {
                name: name.to_string(),
                site,
                args,
                state: ActorState::Runnable,
                wait: None,
                outcome: None,
                failure: None,
                parked: false,
            },
        );
        self.ready.push_back(id);
        debug!(actor = %id, name, %site, time = self.now(), "actor spawned");
        Ok(id)
    }

    /// Pops the next actor to poll.
    ///
    /// Actors whose site is inactive are parked instead and come back when
    /// the site is started or resumed. Actors hit by a host failure are always
    /// polled so that they observe it.
    pub fn next_ready(&mut self) -> Option<ActorId> {
        while let Some(id) = self.ready.pop_front() {
            let Some(rec) = self.actors.get(&id) else {
                continue;
            };
            if rec.state.is_terminated() {
                continue;
            }
            if rec.failure.is_none() && !self.site_active(rec.site) {
                if let Some(rec) = self.actors.get_mut(&id) {
                    rec.parked = true;
                }
                continue;
            }
            return Some(id);
        }
        None
    }

    fn unpark(&mut self, vm: VmId) {
        for (id, rec) in self.actors.iter_mut() {
            if rec.parked && rec.site == Site::Vm(vm) {
                rec.parked = false;
                self.ready.push_back(*id);
            }
        }
    }

    fn block(&mut self, id: ActorId, wait: Wait, state: ActorState) {
        if let Some(rec) = self.actors.get_mut(&id) {
            rec.wait = Some(wait);
            rec.state = state;
        }
    }

    fn wake(&mut self, id: ActorId, outcome: Outcome) {
        if let Some(rec) = self.actors.get_mut(&id) {
            if rec.state.is_terminated() {
                return;
            }
            rec.wait = None;
            rec.outcome = Some(outcome);
            rec.state = ActorState::Runnable;
            self.ready.push_back(id);
        }
    }

    pub fn take_outcome(&mut self, id: ActorId) -> Option<Outcome> {
        self.actors.get_mut(&id)?.outcome.take()
    }

    pub fn is_terminated(&self, id: ActorId) -> bool {
        self.actors
            .get(&id)
            .map_or(true, |rec| rec.state.is_terminated())
    }

    /// Records the value an actor body returned.
    pub fn finish(&mut self, id: ActorId, result: SimResult<()>) -> SimResult<()> {
        let name = self.actor(id)?.name.clone();
        let status = match result {
            Ok(()) => {
                debug!(actor = %id, name = %name, time = self.now(), "actor completed");
                ExitStatus::Completed
            }
            Err(e) => {
                warn!(actor = %id, name = %name, time = self.now(), error = %e, "actor failed");
                ExitStatus::Failed(e)
            }
        };
        self.terminate(id, status)
    }

    /// Forcibly terminates an actor. No-op when it already terminated.
    pub fn kill(&mut self, id: ActorId) -> SimResult<()> {
        if self.actor(id)?.state.is_terminated() {
            return Ok(());
        }
        debug!(actor = %id, time = self.now(), "actor killed");
        self.terminate(id, ExitStatus::Killed)?;
        self.reaped.push(id);
        Ok(())
    }

    fn terminate(&mut self, id: ActorId, status: ExitStatus) -> SimResult<()> {
        let Some(rec) = self.actors.get_mut(&id) else {
            return Err(SimError::UnknownActor(id));
        };
        if rec.state.is_terminated() {
            return Ok(());
        }
        let wait = rec.wait.take();
        rec.outcome = None;
        rec.parked = false;
        rec.state = ActorState::Terminated(status);
        self.release(id, wait)
    }

    /// Aborts whatever an actor is blocked on: a computation, a receive, a
    /// sleep, a disk access or a migration.
    ///
    /// Returns whether anything was cancelled.
    pub fn cancel(&mut self, id: ActorId) -> SimResult<bool> {
        if self.actor(id)?.wait.is_none() {
            return Ok(false);
        }
        let wait = self.actors.get_mut(&id).and_then(|rec| rec.wait.take());
        self.release(id, wait)?;
        debug!(actor = %id, time = self.now(), "activity cancelled");
        self.wake(id, Err(SimError::TaskCancelled));
        Ok(true)
    }

    /// Undoes whatever a wait holds: activities, timers, the receiver slot.
    fn release(&mut self, id: ActorId, wait: Option<Wait>) -> SimResult<()> {
        match wait {
            None => Ok(()),
            Some(Wait::Exec(activity)) => {
                self.drop_activity(activity);
                self.refresh()
            }
            Some(Wait::Receive { mailbox, timeout }) => {
                if let Some(mb) = self.mailboxes.get_mut(&mailbox) {
                    mb.clear_receiver(id);
                }
                if let Some((event, _)) = timeout {
                    self.scheduler.cancel(event);
                }
                Ok(())
            }
            Some(Wait::Sleep(event)) => {
                self.scheduler.cancel(event);
                Ok(())
            }
            Some(Wait::Migration { vm, activity }) => {
                self.abort_migration(vm, activity);
                self.refresh()
            }
            Some(Wait::Io { activity, io }) => {
                self.drop_activity(activity);
                if let Some(reservation) = io.reservation {
                    self.platform.storage_mut(io.storage)?.cancel_write(reservation);
                }
                self.refresh()
            }
        }
    }

    /// Marks an actor as hit by a host failure and unblocks it.
    fn fail(&mut self, id: ActorId, error: SimError) -> SimResult<()> {
        let Some(rec) = self.actors.get_mut(&id) else {
            return Ok(());
        };
        if rec.state.is_terminated() {
            return Ok(());
        }
        rec.failure = Some(error.clone());
        let wait = rec.wait.take();
        let parked = std::mem::take(&mut rec.parked);

        if wait.is_some() {
            self.release(id, wait)?;
            self.wake(id, Err(error));
        } else if parked {
            self.ready.push_back(id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocking calls
    // ------------------------------------------------------------------

    /// Issues a blocking call on behalf of an actor.
    pub fn issue(&mut self, id: ActorId, request: Request) -> Issued {
        match self.try_issue(id, request) {
            Ok(issued) => issued,
            Err(e) => Issued::Ready(Err(e)),
        }
    }

    fn try_issue(&mut self, id: ActorId, request: Request) -> SimResult<Issued> {
        let rec = self.actor(id)?;
        if rec.state.is_terminated() {
            // A killed body never resumes.
            return Ok(Issued::Blocked);
        }
        if let Some(failure) = &rec.failure {
            return Err(failure.clone());
        }
        match request {
            Request::Execute(flops) => self.start_exec(id, flops),
            Request::Sleep(duration) => self.start_sleep(id, duration),
            Request::Receive { mailbox, timeout } => self.start_receive(id, mailbox, timeout),
            Request::Migrate { vm, dst } => self.start_migration(id, vm, dst),
            Request::Read {
                storage,
                path,
                offset,
                bytes,
            } => self.start_io(id, storage, path, offset, bytes, false),
            Request::Write {
                storage,
                path,
                offset,
                bytes,
            } => self.start_io(id, storage, path, offset, bytes, true),
        }
    }

    /// Constraints and per-activity bound of a computation on `site`.
    fn exec_binding(&self, site: Site) -> SimResult<(Vec<ResourceId>, f64)> {
        match site {
            Site::Host(h) => {
                let host = self.platform.host(h)?;
                Ok((vec![host.cpu], host.speed))
            }
            Site::Vm(v) => {
                let vm = self.vm(v)?;
                let host = self.platform.host(vm.host)?;
                Ok((vec![vm.cpu, host.cpu], host.speed))
            }
        }
    }

    fn start_exec(&mut self, id: ActorId, flops: Flops) -> SimResult<Issued> {
        check_amount("flops", flops)?;
        let site = self.actor(id)?.site;
        let (resources, bound) = self.exec_binding(site)?;
        let now = self.now();
        let activity = self.resources.start(
            now,
            ActivityKind::Exec,
            Some(id),
            flops,
            resources,
            Some(bound),
        );
        debug!(actor = %id, %activity, flops, time = now, "execution started");
        self.block(id, Wait::Exec(activity), ActorState::BlockedOnCompute);
        self.refresh()?;
        Ok(Issued::Blocked)
    }

    fn start_sleep(&mut self, id: ActorId, duration: SimTime) -> SimResult<Issued> {
        check_amount("sleep duration", duration)?;
        let event = self
            .scheduler
            .schedule_in(duration, EventKind::Timeout { actor: id })?;
        self.block(id, Wait::Sleep(event), ActorState::Sleeping);
        Ok(Issued::Blocked)
    }

    fn start_receive(
        &mut self,
        id: ActorId,
        name: String,
        timeout: Option<SimTime>,
    ) -> SimResult<Issued> {
        if let Some(t) = timeout {
            check_amount("timeout", t)?;
        }
        let dst = self.actor_host(id)?;
        let mb = self
            .mailboxes
            .entry(name.clone())
            .or_insert_with(|| Mailbox::new(name.clone()));
        if let Some(other) = mb.receiver() {
            if other != id {
                return Err(SimError::MailboxBusy(name));
            }
        }
        if let Some(envelope) = mb.pop() {
            return Ok(Issued::Ready(Ok(Resumed::Task(envelope.task))));
        }
        mb.set_receiver(id);

        // Sends issued while nobody listened now know where to go.
        let mut unreachable = None;
        for send in mb.take_pending() {
            if let Err(e) = self.launch(&name, send, id, dst) {
                unreachable.get_or_insert(e);
            }
        }
        if let Some(e) = unreachable {
            if let Some(mb) = self.mailboxes.get_mut(&name) {
                mb.clear_receiver(id);
            }
            self.refresh()?;
            return Err(e);
        }

        let timeout = match timeout {
            Some(d) => Some((
                self.scheduler
                    .schedule_in(d, EventKind::Timeout { actor: id })?,
                d,
            )),
            None => None,
        };
        self.block(
            id,
            Wait::Receive {
                mailbox: name.clone(),
                timeout,
            },
            ActorState::BlockedOnReceive(name),
        );
        self.refresh()?;
        Ok(Issued::Blocked)
    }

    fn start_migration(&mut self, issuer: ActorId, vm_id: VmId, dst: HostId) -> SimResult<Issued> {
        let dst_host = self.platform.host(dst)?;
        if !dst_host.on {
            return Err(SimError::HostFailure(dst_host.name.clone()));
        }
        let vm = self.vm(vm_id)?;
        if vm.host == dst && vm.state == VmState::Running {
            return Ok(Issued::Ready(Ok(Resumed::Done)));
        }
        vm.check(VmOp::Migrate)?;
        self.check_admission(dst, vm_id)?;

        let vm = self.vm(vm_id)?;
        let (src, ram, name) = (vm.host, vm.ram, vm.name.clone());
        let route = self.platform.route(src, dst)?;
        let now = self.now();
        let activity = self.resources.start(
            now,
            ActivityKind::Migration,
            Some(issuer),
            ram,
            route.resources,
            route.bound,
        );

        let vm = self.vm_mut(vm_id)?;
        vm.apply(VmOp::Migrate)?;
        vm.migration = Some(Migration {
            activity,
            dst,
            issuer,
            started_at: now,
        });
        info!(
            vm = %name,
            from = %self.platform.host(src)?.name,
            to = %self.platform.host(dst)?.name,
            time = now,
            "migration started"
        );
        self.block(
            issuer,
            Wait::Migration { vm: vm_id, activity },
            ActorState::BlockedOnMigration,
        );
        self.refresh()?;
        Ok(Issued::Blocked)
    }

    fn start_io(
        &mut self,
        id: ActorId,
        storage: StorageId,
        path: String,
        offset: Bytes,
        bytes: Bytes,
        write: bool,
    ) -> SimResult<Issued> {
        check_amount("bytes", bytes)?;
        check_amount("offset", offset)?;
        self.check_attached(id, storage)?;

        let disk = self.platform.storage_mut(storage)?;
        let (amount, reservation, resource) = if write {
            let reservation = disk.reserve_write(&path, offset, bytes);
            (reservation.written, Some(reservation), disk.write)
        } else {
            (disk.readable(&path, offset, bytes)?, None, disk.read)
        };
        let now = self.now();
        let activity = self.resources.start(
            now,
            ActivityKind::Io,
            Some(id),
            amount,
            vec![resource],
            None,
        );
        debug!(
            actor = %id,
            %activity,
            %storage,
            path = %path,
            amount,
            write,
            time = now,
            "disk access started"
        );
        self.block(
            id,
            Wait::Io {
                activity,
                io: DiskAccess {
                    storage,
                    path,
                    offset,
                    amount,
                    reservation,
                },
            },
            ActorState::BlockedOnIo,
        );
        self.refresh()?;
        Ok(Issued::Blocked)
    }

    fn finish_io(&mut self, actor: ActorId, activity: ActivityId) -> SimResult<()> {
        let io = match self.actors.get(&actor).and_then(|rec| rec.wait.as_ref()) {
            Some(Wait::Io { activity: a, io }) if *a == activity => io.clone(),
            _ => return Ok(()),
        };
        if let Some(reservation) = io.reservation {
            self.platform
                .storage_mut(io.storage)?
                .commit_write(&io.path, io.offset, reservation);
        }
        self.wake(actor, Ok(Resumed::Bytes(io.amount)));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Posts a task on a mailbox. Never blocks.
    pub fn send(&mut self, id: ActorId, mailbox: &str, task: Task) -> SimResult<()> {
        if let Some(failure) = &self.actor(id)?.failure {
            return Err(failure.clone());
        }
        check_amount("bytes", task.bytes)?;
        let src = self.actor_host(id)?;

        let receiver = self.mailboxes.get(mailbox).and_then(|mb| mb.receiver());
        let target = match receiver {
            Some(r) => {
                let dst = self.actor_host(r)?;
                Some((self.platform.route(src, dst)?, r, dst))
            }
            None => None,
        };

        let mb = self
            .mailboxes
            .entry(mailbox.to_string())
            .or_insert_with(|| Mailbox::new(mailbox));
        let envelope = mb.stamp(id, task);
        match target {
            Some((route, receiver, dst)) => {
                self.start_transfer(mailbox, envelope, route, receiver, src, dst);
                self.refresh()
            }
            None => {
                debug!(actor = %id, mailbox, task = %envelope.task.name, "send deferred until a receiver posts");
                mb.defer(PendingSend { envelope, src });
                Ok(())
            }
        }
    }

    /// Starts a deferred send towards `receiver`.
    ///
    /// A send whose source host went down is abandoned. One with no route to
    /// the receiver is abandoned too, and the error is returned so that the
    /// receive fails instead of waiting forever.
    fn launch(&mut self, mailbox: &str, send: PendingSend, receiver: ActorId, dst: HostId) -> SimResult<()> {
        if !self.host_on(send.src) {
            self.abandon(mailbox, &send.envelope);
            return Ok(());
        }
        match self.platform.route(send.src, dst) {
            Ok(route) => {
                self.start_transfer(mailbox, send.envelope, route, receiver, send.src, dst);
                Ok(())
            }
            Err(e) => {
                warn!(mailbox, task = %send.envelope.task.name, error = %e, "dropping deferred send");
                self.abandon(mailbox, &send.envelope);
                Err(e)
            }
        }
    }

    fn abandon(&mut self, mailbox: &str, envelope: &Envelope) {
        if let Some(mb) = self.mailboxes.get_mut(mailbox) {
            mb.abandon(envelope.sender, envelope.seq);
        }
    }

    fn start_transfer(
        &mut self,
        mailbox: &str,
        envelope: Envelope,
        route: Route,
        receiver: ActorId,
        src: HostId,
        dst: HostId,
    ) {
        let now = self.now();
        let activity = self.resources.start(
            now,
            ActivityKind::Transfer,
            Some(envelope.sender),
            envelope.task.bytes,
            route.resources,
            route.bound,
        );
        debug!(
            %activity,
            mailbox,
            task = %envelope.task.name,
            bytes = envelope.task.bytes,
            time = now,
            "transfer started"
        );
        self.transfers.insert(
            activity,
            Transfer {
                mailbox: mailbox.to_string(),
                envelope,
                receiver,
                src,
                dst,
                latency: route.latency,
            },
        );
        if self.frozen(activity) {
            self.resources.suspend(now, activity);
        }
    }

    /// Hands the oldest visible task of a mailbox to its blocked receiver.
    fn deliver(&mut self, mailbox: &str) {
        let Some(mb) = self.mailboxes.get_mut(mailbox) else {
            return;
        };
        let Some(receiver) = mb.receiver() else {
            return;
        };
        let Some(envelope) = mb.pop() else {
            return;
        };
        mb.clear_receiver(receiver);
        if let Some(ActorRecord {
            wait: Some(Wait::Receive {
                timeout: Some((event, _)),
                ..
            }),
            ..
        }) = self.actors.get(&receiver)
        {
            self.scheduler.cancel(*event);
        }
        self.wake(receiver, Ok(Resumed::Task(envelope.task)));
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Applies the effect of a fired event.
    pub fn dispatch(&mut self, event: Event) -> SimResult<()> {
        debug!(time = event.time, id = %event.id, event = %event.kind, "dispatch");
        match event.kind {
            EventKind::TaskArrival { activity } => self.on_arrival(activity),
            EventKind::TransferComplete { activity }
            | EventKind::ComputeComplete { activity }
            | EventKind::IoComplete { activity } => self.on_activity_done(activity),
            EventKind::Timeout { actor } => self.on_timeout(actor, event.id),
        }
    }

    fn on_activity_done(&mut self, activity: ActivityId) -> SimResult<()> {
        let now = self.now();
        let Some(done) = self.resources.remove(now, activity) else {
            return Ok(());
        };
        match done.kind {
            ActivityKind::Exec => {
                if let Some(owner) = done.owner {
                    if self.waits_on(owner, activity) {
                        self.wake(owner, Ok(Resumed::Done));
                    }
                }
            }
            ActivityKind::Transfer => {
                if let Some(transfer) = self.transfers.get(&activity) {
                    let latency = transfer.latency;
                    self.scheduler
                        .schedule_in(latency, EventKind::TaskArrival { activity })?;
                }
            }
            ActivityKind::Io => {
                if let Some(owner) = done.owner {
                    self.finish_io(owner, activity)?;
                }
            }
            ActivityKind::Migration => self.finish_migration(activity)?,
        }
        self.refresh()
    }

    fn on_arrival(&mut self, activity: ActivityId) -> SimResult<()> {
        let Some(transfer) = self.transfers.remove(&activity) else {
            return Ok(());
        };
        let name = transfer.mailbox;
        let task = transfer.envelope.task.name.clone();
        let mb = self
            .mailboxes
            .entry(name.clone())
            .or_insert_with(|| Mailbox::new(name.clone()));
        let released = mb.arrive(transfer.envelope);
        debug!(
            %activity,
            mailbox = mb.name(),
            task = %task,
            released,
            held = mb.held_len(),
            "task arrived"
        );
        self.deliver(&name);
        Ok(())
    }

    fn on_timeout(&mut self, actor: ActorId, event: EventId) -> SimResult<()> {
        enum Expired {
            Sleep,
            Receive(String, SimTime),
        }

        let expired = match self.actors.get(&actor).and_then(|rec| rec.wait.as_ref()) {
            Some(Wait::Sleep(e)) if *e == event => Expired::Sleep,
            Some(Wait::Receive {
                mailbox,
                timeout: Some((e, d)),
            }) if *e == event => Expired::Receive(mailbox.clone(), *d),
            _ => return Ok(()),
        };

        match expired {
            Expired::Sleep => self.wake(actor, Ok(Resumed::Done)),
            Expired::Receive(mailbox, delay) => {
                if let Some(mb) = self.mailboxes.get_mut(&mailbox) {
                    mb.clear_receiver(actor);
                }
                debug!(actor = %actor, mailbox = %mailbox, "receive timed out");
                self.wake(actor, Err(SimError::Timeout(delay)));
            }
        }
        Ok(())
    }

    fn waits_on(&self, actor: ActorId, activity: ActivityId) -> bool {
        match self.actors.get(&actor).and_then(|rec| rec.wait.as_ref()) {
            Some(Wait::Exec(a)) => *a == activity,
            Some(Wait::Migration { activity: a, .. }) => *a == activity,
            Some(Wait::Io { activity: a, .. }) => *a == activity,
            _ => false,
        }
    }

    /// Brings rates and completion events in line with the current activities.
    fn refresh(&mut self) -> SimResult<()> {
        let now = self.now();
        self.resources.update(now);

        let stale: Vec<_> = self
            .resources
            .activities()
            .filter_map(|a| {
                let eta = self.resources.eta(a.id);
                let scheduled = a.completion().map(|(_, t)| t);
                (eta != scheduled).then_some((a.id, a.kind, eta, a.completion()))
            })
            .collect();

        for (id, kind, eta, previous) in stale {
            if let Some((event, _)) = previous {
                self.scheduler.cancel(event);
            }
            let completion = match eta {
                Some(t) => {
                    let kind = match kind {
                        ActivityKind::Exec => EventKind::ComputeComplete { activity: id },
                        ActivityKind::Io => EventKind::IoComplete { activity: id },
                        ActivityKind::Transfer | ActivityKind::Migration => {
                            EventKind::TransferComplete { activity: id }
                        }
                    };
                    let t = t.max(now);
                    Some((self.scheduler.schedule(t, kind)?, t))
                }
                None => None,
            };
            self.resources.set_completion(id, completion);
        }
        Ok(())
    }

    fn drop_activity(&mut self, activity: ActivityId) {
        let now = self.now();
        if let Some(removed) = self.resources.remove(now, activity) {
            if let Some((event, _)) = removed.completion() {
                self.scheduler.cancel(event);
            }
        }
    }

    // ------------------------------------------------------------------
    // Virtual machines
    // ------------------------------------------------------------------

    /// Cores and memory committed on `host` by VMs other than `except`.
    fn committed(&self, host: HostId, except: Option<VmId>) -> (u32, Bytes) {
        self.vms
            .values()
            .filter(|v| Some(v.id) != except && v.state.holds_capacity())
            .filter(|v| v.host == host || v.migrating_to() == Some(host))
            .fold((0, 0.0), |(cores, ram), v| (cores + v.vcpus, ram + v.ram))
    }

    fn check_admission(&self, host_id: HostId, vm_id: VmId) -> SimResult<()> {
        let host = self.platform.host(host_id)?;
        let vm = self.vm(vm_id)?;
        let (cores, ram) = self.committed(host_id, Some(vm_id));

        if cores + vm.vcpus > host.cores {
            return Err(SimError::InsufficientCapacity {
                host: host.name.clone(),
                vm: vm.name.clone(),
                reason: format!(
                    "{} of {} cores committed, {} more requested",
                    cores, host.cores, vm.vcpus
                ),
            });
        }
        if let Some(limit) = host.ram {
            if ram + vm.ram > limit {
                return Err(SimError::InsufficientCapacity {
                    host: host.name.clone(),
                    vm: vm.name.clone(),
                    reason: format!(
                        "{} of {} bytes committed, {} more requested",
                        ram, limit, vm.ram
                    ),
                });
            }
        }
        Ok(())
    }

    /// Cores of `host` not committed to any VM.
    pub fn free_cores(&self, host: HostId) -> SimResult<u32> {
        let cores = self.platform.host(host)?.cores;
        Ok(cores.saturating_sub(self.committed(host, None).0))
    }

    pub fn create_vm(&mut self, name: &str, host: HostId, vcpus: u32, ram: Bytes) -> SimResult<VmId> {
        if self.vm_index.contains_key(name) || self.platform.host_id(name).is_ok() {
            return Err(SimError::DuplicateName(name.to_string()));
        }
        if vcpus == 0 {
            return Err(SimError::InvalidAmount(format!(
                "VM '{}' needs at least one vcpu",
                name
            )));
        }
        check_amount("ram", ram)?;

        let h = self.platform.host(host)?;
        let capacity = vcpus.min(h.cores) as f64 * h.speed;
        let host_name = h.name.clone();
        let cpu = self.resources.add_constraint(format!("{}:cpu", name), capacity);
        let id = VmId(self.next_vm);
        self.next_vm += 1;
        self.vms.insert(
            id,
            Vm {
                id,
                name: name.to_string(),
                host,
                vcpus,
                ram,
                state: VmState::Created,
                cpu,
                migration: None,
            },
        );
        self.vm_index.insert(name.to_string(), id);
        info!(vm = name, host = %host_name, vcpus, ram, "VM created");
        Ok(id)
    }

    pub fn start_vm(&mut self, id: VmId) -> SimResult<()> {
        let vm = self.vm(id)?;
        vm.check(VmOp::Start)?;
        let host = self.platform.host(vm.host)?;
        if !host.on {
            return Err(SimError::HostFailure(host.name.clone()));
        }
        self.check_admission(vm.host, id)?;

        let vm = self.vm_mut(id)?;
        vm.apply(VmOp::Start)?;
        info!(vm = %vm.name, "VM started");
        self.unpark(id);
        Ok(())
    }

    /// Actors whose site decides whether an activity may progress.
    ///
    /// A transfer belongs to its sender and its receiver, computations and
    /// disk accesses to their owner. Migrations belong to no site.
    fn parties(&self, activity: ActivityId) -> Vec<ActorId> {
        let Some(a) = self.resources.get(activity) else {
            return Vec::new();
        };
        match a.kind {
            ActivityKind::Migration => Vec::new(),
            ActivityKind::Transfer => self
                .transfers
                .get(&activity)
                .map(|t| vec![t.envelope.sender, t.receiver])
                .unwrap_or_default(),
            ActivityKind::Exec | ActivityKind::Io => a.owner.into_iter().collect(),
        }
    }

    /// Returns true when a party of the activity sits in a suspended VM.
    fn frozen(&self, activity: ActivityId) -> bool {
        self.parties(activity).into_iter().any(|actor| {
            matches!(
                self.actors.get(&actor).map(|rec| rec.site),
                Some(Site::Vm(v)) if self.vms.get(&v).is_some_and(|vm| vm.state == VmState::Suspended)
            )
        })
    }

    /// Activities with a party inside `vm`.
    fn activities_in(&self, vm: VmId) -> Vec<ActivityId> {
        self.resources
            .activities()
            .map(|a| a.id)
            .filter(|a| {
                self.parties(*a).into_iter().any(|actor| {
                    self.actors
                        .get(&actor)
                        .is_some_and(|rec| rec.site == Site::Vm(vm))
                })
            })
            .collect()
    }

    /// Resumes the activities of `vm` that no other suspended VM holds back.
    fn thaw(&mut self, vm: VmId) {
        let now = self.now();
        for activity in self.activities_in(vm) {
            if !self.frozen(activity) {
                self.resources.resume(now, activity);
            }
        }
    }

    /// Freezes every computation, disk access and transfer with a party
    /// inside the VM.
    pub fn suspend_vm(&mut self, id: VmId) -> SimResult<()> {
        let now = self.now();
        let vm = self.vm_mut(id)?;
        vm.apply(VmOp::Suspend)?;
        info!(vm = %vm.name, time = now, "VM suspended");
        let frozen = self.activities_in(id);
        debug!(vm = %id, activities = frozen.len(), "activities frozen");
        for activity in frozen {
            self.resources.suspend(now, activity);
        }
        self.refresh()
    }

    pub fn resume_vm(&mut self, id: VmId) -> SimResult<()> {
        let now = self.now();
        let vm = self.vm_mut(id)?;
        vm.apply(VmOp::Resume)?;
        info!(vm = %vm.name, time = now, "VM resumed");
        self.thaw(id);
        self.refresh()?;
        self.unpark(id);
        Ok(())
    }

    /// Kills every resident actor, aborts a pending migration and frees the
    /// VM's share of its host.
    pub fn destroy_vm(&mut self, id: VmId) -> SimResult<()> {
        let now = self.now();
        let vm = self.vm_mut(id)?;
        vm.apply(VmOp::Destroy)?;
        let migration = vm.migration.take();
        let (cpu, name) = (vm.cpu, vm.name.clone());

        if let Some(m) = migration {
            let issuer_waiting = self.waits_on(m.issuer, m.activity);
            self.drop_activity(m.activity);
            if issuer_waiting {
                self.wake(m.issuer, Err(SimError::TaskCancelled));
            }
        }

        let residents = self.residents(Site::Vm(id));
        for actor in &residents {
            self.kill(*actor)?;
        }
        // Transfers of killed actors still reach their mailbox.
        self.thaw(id);
        self.resources.set_capacity(now, cpu, 0.0);
        info!(vm = %name, killed = residents.len(), time = now, "VM destroyed");
        self.refresh()
    }

    fn abort_migration(&mut self, vm: VmId, activity: ActivityId) {
        self.drop_activity(activity);
        if let Some(v) = self.vms.get_mut(&vm) {
            if v.migration.as_ref().is_some_and(|m| m.activity == activity) {
                v.migration = None;
                if v.state == VmState::Migrating {
                    v.state = VmState::Running;
                }
                info!(vm = %v.name, "migration aborted");
            }
        }
    }

    /// Rebinds a VM and everything running in it to the migration destination.
    fn finish_migration(&mut self, activity: ActivityId) -> SimResult<()> {
        let Some(vm_id) = self
            .vms
            .values()
            .find(|v| v.migration.as_ref().is_some_and(|m| m.activity == activity))
            .map(|v| v.id)
        else {
            return Ok(());
        };

        let now = self.now();
        let vm = self.vm_mut(vm_id)?;
        let Some(migration) = vm.migration.take() else {
            return Ok(());
        };
        vm.apply(VmOp::FinishMigration)?;
        let src = vm.host;
        vm.host = migration.dst;
        let (cpu, vcpus, name) = (vm.cpu, vm.vcpus, vm.name.clone());

        let src_host = self.platform.host(src)?;
        let dst_host = self.platform.host(migration.dst)?;
        let (src_cpu, src_name) = (src_host.cpu, src_host.name.clone());
        let (dst_cpu, speed, cores, dst_name) = (
            dst_host.cpu,
            dst_host.speed,
            dst_host.cores,
            dst_host.name.clone(),
        );

        self.resources
            .set_capacity(now, cpu, vcpus.min(cores) as f64 * speed);
        for a in self.resources.users_of(cpu) {
            self.resources.rebind(now, a, src_cpu, dst_cpu, Some(speed));
        }
        info!(
            vm = %name,
            from = %src_name,
            to = %dst_name,
            time = now,
            duration = now - migration.started_at,
            "migration complete"
        );

        if self.waits_on(migration.issuer, activity) {
            self.wake(migration.issuer, Ok(Resumed::Done));
        }
        Ok(())
    }

    pub fn vm_state(&self, id: VmId) -> SimResult<VmState> {
        Ok(self.vm(id)?.state)
    }

    // ------------------------------------------------------------------
    // Storages
    // ------------------------------------------------------------------

    pub fn storage_id(&self, name: &str) -> SimResult<StorageId> {
        self.platform.storage_id(name)
    }

    pub fn storage_info(&self, id: StorageId) -> SimResult<StorageInfo> {
        let disk = self.platform.storage(id)?;
        Ok(StorageInfo {
            name: disk.name.clone(),
            host: self.platform.host(disk.host)?.name.clone(),
            size: disk.size,
            used: disk.used(),
            free: disk.free(),
            files: disk.files().count(),
        })
    }

    /// Storages attached to a host.
    pub fn storages_of(&self, host: HostId) -> Vec<StorageId> {
        self.platform
            .storages()
            .iter()
            .filter(|s| s.host == host)
            .map(|s| s.id)
            .collect()
    }

    fn check_attached(&self, actor: ActorId, storage: StorageId) -> SimResult<()> {
        let host = self.actor_host(actor)?;
        let disk = self.platform.storage(storage)?;
        if disk.host != host {
            return Err(SimError::StorageNotAttached {
                storage: disk.name.clone(),
                host: self.platform.host(host)?.name.clone(),
            });
        }
        Ok(())
    }

    /// Opens a file on a storage of the actor's host, creating it empty if
    /// it does not exist.
    pub fn open(&mut self, actor: ActorId, storage: StorageId, path: &str) -> SimResult<File> {
        if let Some(failure) = &self.actor(actor)?.failure {
            return Err(failure.clone());
        }
        self.check_attached(actor, storage)?;
        self.platform.storage_mut(storage)?.create(path);
        Ok(File::new(storage, path))
    }

    pub fn file_size(&self, file: &File) -> SimResult<Bytes> {
        self.platform.storage(file.storage())?.file_size(file.path())
    }

    pub fn move_file(&mut self, file: &mut File, to: &str) -> SimResult<()> {
        self.platform
            .storage_mut(file.storage())?
            .move_file(file.path(), to)?;
        file.set_path(to);
        Ok(())
    }

    pub fn remove_file(&mut self, file: &File) -> SimResult<()> {
        let disk = self.platform.storage_mut(file.storage())?;
        let freed = disk.remove_file(file.path())?;
        debug!(storage = %disk.name, path = file.path(), freed, "file removed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    /// Powers a host off.
    ///
    /// Actors on the host or on its VMs fail with `HostFailure`, its VMs are
    /// destroyed, migrations from or to it are aborted and transfers crossing
    /// it are dropped.
    pub fn turn_off(&mut self, host_id: HostId) -> SimResult<()> {
        let now = self.now();
        let host = self.platform.host_mut(host_id)?;
        if !host.on {
            return Ok(());
        }
        host.on = false;
        let (cpu, name) = (host.cpu, host.name.clone());
        warn!(host = %name, time = now, "host turned off");
        let error = SimError::HostFailure(name);

        let hosted: Vec<VmId> = self
            .vms
            .values()
            .filter(|v| v.host == host_id && v.state != VmState::Destroyed)
            .map(|v| v.id)
            .collect();

        let inbound: Vec<(VmId, Migration)> = self
            .vms
            .values()
            .filter(|v| v.host != host_id && v.migrating_to() == Some(host_id))
            .filter_map(|v| v.migration.clone().map(|m| (v.id, m)))
            .collect();
        for (vm, m) in inbound {
            let issuer_waiting = self.waits_on(m.issuer, m.activity);
            self.abort_migration(vm, m.activity);
            if issuer_waiting {
                self.wake(m.issuer, Err(error.clone()));
            }
        }

        let victims: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|(_, rec)| !rec.state.is_terminated())
            .filter(|(_, rec)| match rec.site {
                Site::Host(h) => h == host_id,
                Site::Vm(v) => hosted.contains(&v),
            })
            .map(|(id, _)| *id)
            .collect();
        for actor in victims {
            self.fail(actor, error.clone())?;
        }

        for vm in hosted {
            let v = self.vm_mut(vm)?;
            v.apply(VmOp::Destroy)?;
            let migration = v.migration.take();
            let (vm_cpu, vm_name) = (v.cpu, v.name.clone());
            if let Some(m) = migration {
                let issuer_waiting = self.waits_on(m.issuer, m.activity);
                self.drop_activity(m.activity);
                if issuer_waiting {
                    self.wake(m.issuer, Err(error.clone()));
                }
            }
            self.resources.set_capacity(now, vm_cpu, 0.0);
            info!(vm = %vm_name, time = now, "VM destroyed by host failure");
        }

        let crossing: Vec<ActivityId> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.src == host_id || t.dst == host_id)
            .map(|(a, _)| *a)
            .collect();
        let mut touched = Vec::new();
        for activity in crossing {
            if let Some(t) = self.transfers.remove(&activity) {
                self.drop_activity(activity);
                warn!(%activity, mailbox = %t.mailbox, task = %t.envelope.task.name, "transfer dropped by host failure");
                self.abandon(&t.mailbox, &t.envelope);
                touched.push(t.mailbox);
            }
        }
        for (name, mb) in self.mailboxes.iter_mut() {
            if mb.drop_pending_from(host_id) > 0 {
                touched.push(name.clone());
            }
        }
        touched.sort();
        touched.dedup();
        for mailbox in touched {
            self.deliver(&mailbox);
        }

        self.resources.set_capacity(now, cpu, 0.0);
        self.refresh()
    }

    /// Powers a host back on.
    pub fn turn_on(&mut self, host_id: HostId) -> SimResult<()> {
        let now = self.now();
        let host = self.platform.host_mut(host_id)?;
        if host.on {
            return Ok(());
        }
        host.on = true;
        let (cpu, capacity) = (host.cpu, host.capacity());
        info!(host = %host.name, time = now, "host turned on");
        self.resources.set_capacity(now, cpu, capacity);
        self.refresh()
    }

    /// Number of running activities on a host's CPU.
    pub fn host_load(&self, host: HostId) -> SimResult<usize> {
        Ok(self.resources.load(self.platform.host(host)?.cpu))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn actor_state(&self, id: ActorId) -> SimResult<ActorState> {
        Ok(self.actor(id)?.state.clone())
    }

    pub fn actor_name(&self, id: ActorId) -> SimResult<String> {
        Ok(self.actor(id)?.name.clone())
    }

    pub fn actor_site(&self, id: ActorId) -> SimResult<Site> {
        Ok(self.actor(id)?.site)
    }

    pub fn actor_args(&self, id: ActorId) -> SimResult<Vec<String>> {
        Ok(self.actor(id)?.args.clone())
    }

    /// Remaining flops (or bytes, for a migration or a disk access) of what
    /// the actor waits on.
    pub fn remaining(&self, id: ActorId) -> Option<f64> {
        match self.actors.get(&id)?.wait.as_ref()? {
            Wait::Exec(a) | Wait::Migration { activity: a, .. } | Wait::Io { activity: a, .. } => {
                self.resources.remaining_at(*a, self.now())
            }
            _ => None,
        }
    }

    /// Live actors on a site.
    pub fn residents(&self, site: Site) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|(_, rec)| rec.site == site && !rec.state.is_terminated())
            .map(|(id, _)| *id)
            .collect()
    }

    /// All actors, in spawn order.
    pub fn actor_summaries(&self) -> Vec<(ActorId, String, ActorState)> {
        self.actors
            .iter()
            .map(|(id, rec)| (*id, rec.name.clone(), rec.state.clone()))
            .collect()
    }

    /// Number of tasks visible in a mailbox.
    pub fn mailbox_len(&self, name: &str) -> usize {
        self.mailboxes.get(name).map_or(0, |mb| mb.len())
    }

    /// Number of sends waiting for a receiver on a mailbox.
    pub fn mailbox_pending(&self, name: &str) -> usize {
        self.mailboxes.get(name).map_or(0, |mb| mb.pending_len())
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn take_stop_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_requested)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}
