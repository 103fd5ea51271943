//! Performance benchmarks for the gridlet kernel.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench simulation_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gridlet::config::ConfigResult;
use gridlet::event::EventKind;
use gridlet::resource::{ActivityKind, ResourceModel};
use gridlet::scheduler::EventScheduler;
use gridlet::types::ActorId;
use gridlet::{run_replicas, PlatformBuilder, Simulation, Task};

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    for num_events in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*num_events as u64));
        group.bench_with_input(
            BenchmarkId::new("schedule_and_drain", num_events),
            num_events,
            |b, &num_events| {
                b.iter(|| {
                    let mut scheduler = EventScheduler::new();
                    for i in 0..num_events as u64 {
                        // Scatter times so the heap actually reorders.
                        let time = ((i * 7919) % 1000) as f64;
                        scheduler
                            .schedule(time, EventKind::Timeout { actor: actor(i) })
                            .unwrap();
                    }
                    while let Some(event) = scheduler.run_next() {
                        black_box(event);
                    }
                });
            },
        );
    }

    group.finish();
}

fn actor(i: u64) -> ActorId {
    // Actor ids are only minted by the kernel; round-trip one through serde.
    serde_json::from_value(serde_json::json!(i)).unwrap()
}

// ============================================================================
// Resource Model Benchmarks
// ============================================================================

fn bench_max_min_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("max_min");

    for num_activities in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*num_activities as u64));
        group.bench_with_input(
            BenchmarkId::new("activities", num_activities),
            num_activities,
            |b, &num_activities| {
                let mut model = ResourceModel::new();
                let links: Vec<_> = (0..16)
                    .map(|i| model.add_constraint(format!("link{}", i), 1e8 * (1 + i % 4) as f64))
                    .collect();
                for i in 0..num_activities {
                    let route = vec![links[i % 16], links[(i * 5 + 3) % 16]];
                    model.start(0.0, ActivityKind::Transfer, None, 1e9, route, None);
                }

                let mut now = 0.0;
                b.iter(|| {
                    now += 1e-3;
                    model.set_capacity(now, links[0], 1e8 + now);
                    model.update(now);
                    black_box(model.len());
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// End-to-end Benchmarks
// ============================================================================

fn bench_compute_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_contention");

    for actors in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*actors as u64));
        group.bench_with_input(BenchmarkId::new("actors", actors), actors, |b, &actors| {
            b.iter(|| {
                let config = PlatformBuilder::new().host("h", 1e9, 4).build().unwrap();
                let mut sim = Simulation::new(&config).unwrap();
                let h = sim.host("h").unwrap();
                for i in 0..actors {
                    // Staggered sizes make every completion change the share.
                    let flops = 1e9 * (1 + i % 10) as f64;
                    sim.spawn(&format!("w{}", i), h, vec![], move |ctx| async move {
                        ctx.execute(flops).await
                    })
                    .unwrap();
                }
                black_box(sim.run().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_pingpong(c: &mut Criterion) {
    let mut group = c.benchmark_group("pingpong");

    for rounds in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*rounds as u64));
        group.bench_with_input(BenchmarkId::new("rounds", rounds), rounds, |b, &rounds| {
            b.iter(|| {
                let config = PlatformBuilder::new()
                    .host("a", 1e9, 1)
                    .host("b", 1e9, 1)
                    .link("l", 1.25e8, 1e-4)
                    .route("a", "b", &["l"])
                    .build()
                    .unwrap();
                let mut sim = Simulation::new(&config).unwrap();
                let a = sim.host("a").unwrap();
                let bh = sim.host("b").unwrap();
                sim.spawn("ping", a, vec![], move |ctx| async move {
                    for _ in 0..rounds {
                        ctx.send("pong", Task::new("ping", 0.0, 1e3))?;
                        ctx.receive("ping").await?;
                    }
                    Ok(())
                })
                .unwrap();
                sim.spawn("pong", bh, vec![], move |ctx| async move {
                    for _ in 0..rounds {
                        ctx.receive("pong").await?;
                        ctx.send("ping", Task::new("pong", 0.0, 1e3))?;
                    }
                    Ok(())
                })
                .unwrap();
                black_box(sim.run().unwrap());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Replica Benchmarks
// ============================================================================

fn bench_replicas(c: &mut Criterion) {
    let mut group = c.benchmark_group("replicas");
    group.sample_size(20);

    for count in [1, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("count", count), count, |b, &count| {
            b.iter(|| {
                let reports = run_replicas(count, |i| -> ConfigResult<Simulation> {
                    let config = PlatformBuilder::new().host("h", 1e9, 2).build()?;
                    let mut sim = Simulation::new(&config)?;
                    let h = sim.host("h")?;
                    for w in 0..50 {
                        let flops = 1e8 * (1 + (w + i) % 7) as f64;
                        sim.spawn(&format!("w{}", w), h, vec![], move |ctx| async move {
                            ctx.execute(flops).await
                        })?;
                    }
                    Ok(sim)
                });
                black_box(reports);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_scheduler,
    bench_max_min_solve,
    bench_compute_contention,
    bench_pingpong,
    bench_replicas,
);

criterion_main!(benches);
