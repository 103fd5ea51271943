//! Master/Worker Cloud Example
//!
//! A master on a physical host dispatches tasks to workers running inside
//! VMs. Halfway through, it exercises the VM lifecycle:
//! - suspends the first VM for a while, freezing its worker
//! - consolidates every VM onto its own host, which only succeeds while the
//!   host has cores and memory left
//! - finally tells every worker to stop
//!
//! Run with:
//! ```text
//! cargo run --example masterworker -- demos/platforms/masterworker.yaml
//! ```

use std::process::ExitCode;

use tracing::{info, warn};

use gridlet::config::PlatformConfig;
use gridlet::{ActorContext, ActorRegistry, SimError, SimResult, Simulation, Task, TaskKind};

// ============================================================================
// Configuration
// ============================================================================

const SUSPEND_AT: f64 = 1.0;
const SUSPEND_FOR: f64 = 2.0;
const FINALIZE: &str = "finalize";
const MASTER_USAGE: &str = "master args: <tasks> <flops per task> <bytes per task> <workers>";

/// What the master dispatches, read from its deployment arguments.
#[derive(Clone, Copy, Debug)]
struct Plan {
    tasks: usize,
    flops: f64,
    bytes: f64,
    workers: usize,
}

impl Plan {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [tasks, flops, bytes, workers] => Some(Self {
                tasks: tasks.parse().ok()?,
                flops: flops.parse().ok().filter(|&f: &f64| f >= 0.0)?,
                bytes: bytes.parse().ok().filter(|&b: &f64| b >= 0.0)?,
                workers: workers.parse().ok().filter(|&w| w > 0)?,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Actors
// ============================================================================

async fn master(ctx: ActorContext, plan: Plan) -> SimResult<()> {
    let Plan {
        tasks,
        flops,
        bytes,
        workers,
    } = plan;

    for i in 0..tasks {
        let task = Task::new(format!("Task{:02}", i), flops, bytes);
        ctx.send(&format!("worker-{}", i % workers), task)?;
    }
    info!(tasks, workers, "all tasks dispatched");

    let vms: Vec<_> = (0..workers)
        .map(|i| ctx.vm(&format!("VM{:02}", i)))
        .collect::<SimResult<_>>()?;

    ctx.sleep(SUSPEND_AT).await?;
    if let Some(&first) = vms.first() {
        ctx.suspend_vm(first)?;
        ctx.sleep(SUSPEND_FOR).await?;
        ctx.resume_vm(first)?;
    }

    let home = ctx.host_id()?;
    for &vm in &vms {
        match ctx.migrate(vm, home).await {
            Ok(()) => info!(%vm, free_cores = ctx.free_cores(home)?, "VM consolidated"),
            Err(e @ SimError::InsufficientCapacity { .. }) => warn!(%vm, error = %e, "VM left in place"),
            Err(e) => return Err(e),
        }
    }

    for i in 0..workers {
        let stop = Task::signal(TaskKind::Custom {
            tag: FINALIZE.to_string(),
            data: serde_json::Value::Null,
        });
        ctx.send(&format!("worker-{}", i), stop)?;
    }
    Ok(())
}

async fn worker(ctx: ActorContext) -> SimResult<()> {
    let me = ctx.name();
    let mut done = 0;
    loop {
        let task = ctx.receive(&me).await?;
        if matches!(&task.kind, TaskKind::Custom { tag, .. } if tag == FINALIZE) {
            info!(done, "worker exiting");
            return Ok(());
        }
        ctx.execute(task.flops).await?;
        done += 1;
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: masterworker <platform.yaml|platform.json>");
        return ExitCode::from(1);
    };

    let config = match PlatformConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            return ExitCode::from(1);
        }
    };
    let plan = config
        .actors
        .iter()
        .find(|a| a.function == "master")
        .and_then(|a| Plan::parse(&a.args));
    let Some(plan) = plan else {
        eprintln!("{}: no usable master in the deployment", path);
        eprintln!("  {}", MASTER_USAGE);
        return ExitCode::from(1);
    };
    gridlet::init_logging(&config.simulation.log_level);

    let mut registry = ActorRegistry::new();
    registry.register("master", move |ctx| master(ctx, plan));
    registry.register("worker", worker);

    let result = Simulation::new(&config).and_then(|mut sim| {
        sim.deploy(&registry)?;
        Ok(sim.run()?)
    });

    match result {
        Ok(report) => {
            println!("Simulation finished at t = {:.6} s", report.final_time);
            println!("  Events processed: {}", report.events_processed);
            println!("  Completed: {}", report.completed);
            println!("  Failed:    {}", report.failed);
            for (name, state) in &report.blocked {
                println!("  Still blocked: {} ({})", name, state);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            ExitCode::from(1)
        }
    }
}
