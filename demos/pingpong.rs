//! Ping-Pong Example
//!
//! Two actors on two hosts bounce a timestamped task back and forth. Each
//! side measures the one-way delay, which is the size of the task divided
//! by the bottleneck bandwidth of the route, plus the route's latency.
//!
//! Run with:
//! ```text
//! cargo run --example pingpong -- demos/platforms/pingpong.yaml
//! ```

use std::process::ExitCode;

use tracing::info;

use gridlet::config::PlatformConfig;
use gridlet::{ActorContext, ActorRegistry, SimResult, Simulation, Task, TaskKind};

const DEFAULT_PAYLOAD: f64 = 1e6;

// ============================================================================
// Actors
// ============================================================================

async fn pinger(ctx: ActorContext, bytes: f64) -> SimResult<()> {
    let args = ctx.args();
    let peer = args.first().cloned().unwrap_or_else(|| "ponger".to_string());
    let me = ctx.name();

    let ping = Task::new("ping", 0.0, bytes).with_kind(TaskKind::Timestamped { sent_at: ctx.now() });
    info!(to = %peer, bytes, "ping sent");
    ctx.send(&peer, ping)?;

    let pong = ctx.receive(&me).await?;
    let sent_at = pong.sent_at().unwrap_or_default();
    info!(delay = ctx.now() - sent_at, "pong received");
    Ok(())
}

async fn ponger(ctx: ActorContext) -> SimResult<()> {
    let args = ctx.args();
    let peer = args.first().cloned().unwrap_or_else(|| "pinger".to_string());
    let me = ctx.name();

    let ping = ctx.receive(&me).await?;
    let sent_at = ping.sent_at().unwrap_or_default();
    info!(delay = ctx.now() - sent_at, "ping received");

    let pong = Task::new("pong", 0.0, ping.bytes).with_kind(TaskKind::Timestamped { sent_at: ctx.now() });
    ctx.send(&peer, pong)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: pingpong <platform.yaml|platform.json>");
        return ExitCode::from(1);
    };

    let config = match PlatformConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            return ExitCode::from(1);
        }
    };
    // pinger args: [peer] [payload bytes]
    let payload = config
        .actors
        .iter()
        .find(|a| a.function == "pinger")
        .and_then(|a| a.args.get(1))
        .map(|raw| raw.parse::<f64>().ok().filter(|b| *b >= 0.0))
        .unwrap_or(Some(DEFAULT_PAYLOAD));
    let Some(bytes) = payload else {
        eprintln!("{}: the pinger's payload must be a non-negative byte count", path);
        return ExitCode::from(1);
    };
    gridlet::init_logging(&config.simulation.log_level);

    let mut registry = ActorRegistry::new();
    registry.register("pinger", move |ctx| pinger(ctx, bytes));
    registry.register("ponger", ponger);

    let result = Simulation::new(&config).and_then(|mut sim| {
        sim.deploy(&registry)?;
        Ok(sim.run()?)
    });

    match result {
        Ok(report) => {
            println!("Simulation finished at t = {:.6} s", report.final_time);
            println!("  Events processed: {}", report.events_processed);
            println!("  Actors completed: {}", report.completed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            ExitCode::from(1)
        }
    }
}
