//! The simulation driver.
//!
//! [`Simulation`] owns the kernel and the actor bodies. Its main loop
//! alternates two phases until nothing is left to do:
//!
//! 1. Poll every ready actor, in wake order, until each one blocks or ends.
//! 2. Pop the earliest event, advance the clock to it and apply its effect,
//!    which usually makes some actors ready again.
//!
//! Actors are polled with a no-op waker: the kernel, not the waker, knows
//! when a blocked actor can make progress.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_task::noop_waker_ref;
use serde::Serialize;
use tracing::{info, warn};

use crate::actor::{ActorContext, ActorFuture, ActorState, ExitStatus, SimContext};
use crate::config::{ActorConfig, ConfigError, ConfigResult, PlatformConfig, SimulationParams};
use crate::error::SimResult;
use crate::kernel::Kernel;
use crate::registry::ActorRegistry;
use crate::types::{ActorId, HostId, SimTime, Site, VmId};

/// Summary of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Simulated time when the run stopped.
    pub final_time: SimTime,
    /// Events fired since the simulation was created.
    pub events_processed: u64,
    /// Actors whose body returned `Ok`.
    pub completed: usize,
    /// Actors whose body returned an error.
    pub failed: usize,
    /// Actors that were killed.
    pub killed: usize,
    /// Actors still waiting when the run stopped, with what they wait on.
    pub blocked: Vec<(String, String)>,
    /// Whether an actor asked the run to stop.
    pub stopped: bool,
}

/// A complete simulation: platform, kernel state and actors.
///
/// # Example
///
/// ```
/// use gridlet::config::PlatformBuilder;
/// use gridlet::engine::Simulation;
///
/// let config = PlatformBuilder::new().host("h", 1e9, 2).build().unwrap();
/// let mut sim = Simulation::new(&config).unwrap();
/// let h = sim.host("h").unwrap();
/// for i in 0..2 {
///     sim.spawn(&format!("w{}", i), h, vec![], |ctx| async move {
///         ctx.execute(1e9).await
///     })
///     .unwrap();
/// }
/// // Two cores, one task each: both finish after one second.
/// assert_eq!(sim.run().unwrap().final_time, 1.0);
/// ```
pub struct Simulation {
    kernel: Rc<RefCell<Kernel>>,
    actors: HashMap<ActorId, ActorFuture>,
    deployment: Vec<ActorConfig>,
    params: SimulationParams,
}

impl Simulation {
    /// Builds the platform described by `config` and boots its VMs.
    ///
    /// Actors listed in the configuration are only created by [`deploy`](Self::deploy).
    pub fn new(config: &PlatformConfig) -> ConfigResult<Self> {
        config.validate()?;
        let kernel = Kernel::new(config)?;
        info!(
            hosts = config.hosts.len(),
            links = config.links.len(),
            vms = config.vms.len(),
            "platform loaded"
        );
        Ok(Self {
            kernel: Rc::new(RefCell::new(kernel)),
            actors: HashMap::new(),
            deployment: config.actors.clone(),
            params: config.simulation.clone(),
        })
    }

    /// Loads a platform file (YAML or JSON, by extension).
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config = PlatformConfig::from_file(path)?;
        Self::new(&config)
    }

    /// Spawns every actor of the configured deployment.
    ///
    /// # Arguments
    /// * `registry` - Maps the deployment's function names to actor bodies
    ///
    /// # Returns
    /// The identifiers of the spawned actors, in deployment order.
    pub fn deploy(&mut self, registry: &ActorRegistry) -> ConfigResult<Vec<ActorId>> {
        let ctx = self.context();
        let mut ids = Vec::with_capacity(self.deployment.len());
        for actor in &self.deployment {
            let factory = registry
                .get(&actor.function)
                .ok_or_else(|| ConfigError::UnknownFunction(actor.function.clone()))?;
            let site = ctx.site(&actor.host)?;
            let id = ctx.spawn_boxed(&actor.name, site, actor.args.clone(), |c| factory(c))?;
            ids.push(id);
        }
        info!(actors = ids.len(), "deployment done");
        Ok(ids)
    }

    /// A handle on the kernel, for driving the simulation from outside actors.
    pub fn context(&self) -> SimContext {
        SimContext::new(Rc::clone(&self.kernel))
    }

    /// Spawns an actor. See [`SimContext::spawn`].
    pub fn spawn<F, Fut>(
        &mut self,
        name: &str,
        site: impl Into<Site>,
        args: Vec<String>,
        body: F,
    ) -> SimResult<ActorId>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = SimResult<()>> + 'static,
    {
        self.context().spawn(name, site, args, body)
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.kernel.borrow().now()
    }

    pub fn host(&self, name: &str) -> SimResult<HostId> {
        self.context().host(name)
    }

    pub fn vm(&self, name: &str) -> SimResult<VmId> {
        self.context().vm(name)
    }

    pub fn actor_state(&self, actor: ActorId) -> SimResult<ActorState> {
        self.kernel.borrow().actor_state(actor)
    }

    /// Global parameters from the configuration.
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Runs until no event is left, up to the configured `max_time`.
    pub fn run(&mut self) -> SimResult<RunReport> {
        self.run_until(self.params.max_time.unwrap_or(f64::INFINITY))
    }

    /// Runs until no event is left or the next event lies past `deadline`.
    ///
    /// When stopping at a deadline, the clock is moved to the deadline.
    pub fn run_until(&mut self, deadline: SimTime) -> SimResult<RunReport> {
        let mut stopped = false;
        loop {
            self.run_ready()?;
            if self.kernel.borrow_mut().take_stop_request() {
                stopped = true;
                break;
            }

            let mut kernel = self.kernel.borrow_mut();
            let next = kernel.scheduler_mut().peek_time();
            match next {
                None => break,
                Some(t) if t > deadline => {
                    kernel.scheduler_mut().advance_to(deadline);
                    break;
                }
                Some(_) => {
                    if let Some(event) = kernel.scheduler_mut().run_next() {
                        kernel.dispatch(event)?;
                    }
                }
            }
        }

        let report = self.report(stopped);
        info!(
            time = report.final_time,
            events = report.events_processed,
            completed = report.completed,
            failed = report.failed,
            killed = report.killed,
            "simulation finished"
        );
        for (name, state) in &report.blocked {
            warn!(actor = %name, state = %state, "actor still blocked at end of run");
        }
        Ok(report)
    }

    /// Polls ready actors, then fires at most one event.
    ///
    /// Returns `false` once there is nothing left to do, or when an actor
    /// asked the run to stop.
    pub fn step(&mut self) -> SimResult<bool> {
        self.run_ready()?;
        let mut kernel = self.kernel.borrow_mut();
        if kernel.take_stop_request() {
            info!(time = kernel.now(), "stop requested");
            return Ok(false);
        }
        match kernel.scheduler_mut().run_next() {
            Some(event) => {
                kernel.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Polls actors until none is ready.
    fn run_ready(&mut self) -> SimResult<()> {
        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            self.adopt_and_reap();
            if self.kernel.borrow().stop_requested() {
                break;
            }
            let next = self.kernel.borrow_mut().next_ready();
            let Some(id) = next else {
                break;
            };
            let Some(mut body) = self.actors.remove(&id) else {
                continue;
            };

            match body.as_mut().poll(&mut cx) {
                Poll::Ready(result) => {
                    drop(body);
                    self.kernel.borrow_mut().finish(id, result)?;
                }
                Poll::Pending => {
                    if !self.kernel.borrow().is_terminated(id) {
                        self.actors.insert(id, body);
                    }
                }
            }
        }
        self.adopt_and_reap();
        Ok(())
    }

    /// Takes ownership of newly spawned bodies and drops killed ones.
    fn adopt_and_reap(&mut self) {
        let (spawned, reaped) = {
            let mut kernel = self.kernel.borrow_mut();
            (
                std::mem::take(&mut kernel.spawned),
                std::mem::take(&mut kernel.reaped),
            )
        };
        self.actors.extend(spawned);
        for id in reaped {
            self.actors.remove(&id);
        }
    }

    fn report(&self, stopped: bool) -> RunReport {
        let kernel = self.kernel.borrow();
        let mut report = RunReport {
            final_time: kernel.now(),
            events_processed: kernel.events_processed(),
            stopped,
            ..RunReport::default()
        };
        for (_, name, state) in kernel.actor_summaries() {
            match state {
                ActorState::Terminated(ExitStatus::Completed) => report.completed += 1,
                ActorState::Terminated(ExitStatus::Failed(_)) => report.failed += 1,
                ActorState::Terminated(ExitStatus::Killed) => report.killed += 1,
                ActorState::Runnable => {}
                blocked => report.blocked.push((name, blocked.to_string())),
            }
        }
        report
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        // Pending bodies hold contexts that point back at the kernel.
        let spawned = std::mem::take(&mut self.kernel.borrow_mut().spawned);
        drop(spawned);
        self.actors.clear();
    }
}
