//! Independent replicas of a simulation, run side by side.
//!
//! A single simulation is strictly sequential: its kernel lives behind an
//! `Rc<RefCell<_>>` and never leaves the thread that built it. Parameter
//! sweeps and repeated experiments are parallel at a coarser grain instead:
//! each replica is built and run entirely on one worker thread.
//!
//! # Feature Flag
//!
//! Parallel execution requires the `parallel` feature:
//! ```toml
//! [dependencies]
//! gridlet = { version = "0.1", features = ["parallel"] }
//! ```
//!
//! Without it, replicas run one after the other.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use tracing::debug;

use crate::engine::{RunReport, Simulation};
use crate::error::SimError;

/// Runs replicas of a simulation.
///
/// # Example
///
/// ```
/// use gridlet::config::{ConfigResult, PlatformBuilder};
/// use gridlet::engine::Simulation;
/// use gridlet::parallel::ReplicaRunner;
///
/// let reports = ReplicaRunner::new().with_threads(2).run(3, |i| -> ConfigResult<Simulation> {
///     let config = PlatformBuilder::new().host("h", 1.0, 1).build()?;
///     let mut sim = Simulation::new(&config)?;
///     let h = sim.host("h")?;
///     sim.spawn("s", h, vec![], move |ctx| async move { ctx.sleep(i as f64).await })?;
///     Ok(sim)
/// });
/// let times: Vec<f64> = reports.iter().map(|r| r.as_ref().unwrap().final_time).collect();
/// assert_eq!(times, vec![0.0, 1.0, 2.0]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReplicaRunner {
    num_threads: usize,
}

impl ReplicaRunner {
    /// Creates a runner using rayon's default thread count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads (0 = rayon default).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Builds and runs `count` replicas.
    ///
    /// # Arguments
    /// * `count` - Number of replicas
    /// * `build` - Builds replica `i`; called on the thread that runs it
    ///
    /// # Returns
    /// One report per replica, in index order. A replica whose build or run
    /// fails yields its error without stopping the others.
    pub fn run<F, E>(&self, count: usize, build: F) -> Vec<Result<RunReport, E>>
    where
        F: Fn(usize) -> Result<Simulation, E> + Send + Sync,
        E: From<SimError> + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if self.num_threads > 0 {
                if let Ok(pool) = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.num_threads)
                    .build()
                {
                    return pool.install(|| {
                        (0..count)
                            .into_par_iter()
                            .map(|i| run_one(i, &build))
                            .collect()
                    });
                }
            }
            (0..count)
                .into_par_iter()
                .map(|i| run_one(i, &build))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            (0..count).map(|i| run_one(i, &build)).collect()
        }
    }
}

fn run_one<F, E>(index: usize, build: &F) -> Result<RunReport, E>
where
    F: Fn(usize) -> Result<Simulation, E>,
    E: From<SimError>,
{
    let mut sim = build(index)?;
    let report = sim.run()?;
    debug!(replica = index, time = report.final_time, "replica finished");
    Ok(report)
}

/// Runs `count` replicas with the default runner.
pub fn run_replicas<F, E>(count: usize, build: F) -> Vec<Result<RunReport, E>>
where
    F: Fn(usize) -> Result<Simulation, E> + Send + Sync,
    E: From<SimError> + Send,
{
    ReplicaRunner::new().run(count, build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformBuilder;
    use crate::error::SimResult;

    fn build(i: usize) -> SimResult<Simulation> {
        let config = PlatformBuilder::new()
            .host("h", 10.0, 1)
            .build()
            .expect("valid platform");
        let mut sim = Simulation::new(&config).expect("platform loads");
        let h = sim.host("h")?;
        let flops = 10.0 * (i + 1) as f64;
        sim.spawn("w", h, vec![], move |ctx| async move { ctx.execute(flops).await })?;
        Ok(sim)
    }

    #[test]
    fn test_reports_in_index_order() {
        let reports = run_replicas(4, build);
        let times: Vec<f64> = reports
            .into_iter()
            .map(|r| r.unwrap().final_time)
            .collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_with_threads() {
        let reports = ReplicaRunner::new().with_threads(2).run(2, build);
        assert!(reports.iter().all(|r| r.as_ref().unwrap().completed == 1));
    }

    #[test]
    fn test_zero_replicas() {
        assert!(run_replicas(0, build).is_empty());
    }
}
