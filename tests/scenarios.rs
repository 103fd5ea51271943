//! End-to-end scenarios.
//!
//! These tests drive complete applications through the public API:
//! - a mutual-exclusion coordinator with several clients
//! - ping-pong between two hosts
//! - master/worker over VMs, with suspend, resume and migration
//! - deployment from a platform file

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use gridlet::{
    ActorContext, ActorRegistry, ActorState, ExitStatus, PlatformBuilder, RunReport, SimError,
    SimResult, Simulation, Task, TaskKind, VmState,
};

// ============================================================================
// Mutual exclusion
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum Discipline {
    /// Waiting requests are pushed at the back and granted from the back.
    Lifo,
    /// Waiting requests are pushed at the front and granted from the back.
    Fifo,
}

async fn coordinator(ctx: ActorContext, clients: usize, discipline: Discipline) -> SimResult<()> {
    let mut waiting: VecDeque<String> = VecDeque::new();
    let mut busy = false;
    let mut released = 0;

    while released < clients {
        let task = ctx.receive("coordinator").await?;
        match task.kind {
            TaskKind::Request { reply_to } if busy => match discipline {
                Discipline::Lifo => waiting.push_back(reply_to),
                Discipline::Fifo => waiting.push_front(reply_to),
            },
            TaskKind::Request { reply_to } => {
                busy = true;
                ctx.send(&reply_to, Task::signal(TaskKind::Grant))?;
            }
            TaskKind::Release => {
                released += 1;
                busy = false;
                if let Some(next) = waiting.pop_back() {
                    busy = true;
                    ctx.send(&next, Task::signal(TaskKind::Grant))?;
                }
            }
            other => panic!("unexpected task kind {:?}", other),
        }
    }
    Ok(())
}

async fn client(
    ctx: ActorContext,
    delay: f64,
    hold: f64,
    order: Rc<RefCell<Vec<String>>>,
) -> SimResult<()> {
    let me = ctx.name();
    ctx.sleep(delay).await?;
    ctx.send(
        "coordinator",
        Task::signal(TaskKind::Request {
            reply_to: me.clone(),
        }),
    )?;
    let grant = ctx.receive(&me).await?;
    assert_eq!(grant.kind, TaskKind::Grant);
    order.borrow_mut().push(me);
    ctx.sleep(hold).await?;
    ctx.send("coordinator", Task::signal(TaskKind::Release))
}

fn run_mutex(discipline: Discipline) -> (Vec<String>, RunReport) {
    let config = PlatformBuilder::new()
        .host("server", 1e9, 1)
        .host("c0", 1e9, 1)
        .host("c1", 1e9, 1)
        .host("c2", 1e9, 1)
        .link("lan", 1e8, 1e-3)
        .default_route(&["lan"])
        .build()
        .unwrap();
    let mut sim = Simulation::new(&config).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let server = sim.host("server").unwrap();
    sim.spawn("coordinator", server, vec![], move |ctx| {
        coordinator(ctx, 3, discipline)
    })
    .unwrap();
    for i in 0..3 {
        let host = sim.host(&format!("c{}", i)).unwrap();
        let order = Rc::clone(&order);
        sim.spawn(&format!("C{}", i), host, vec![], move |ctx| {
            client(ctx, i as f64, 5.0, order)
        })
        .unwrap();
    }

    let report = sim.run().unwrap();
    let order = order.borrow().clone();
    (order, report)
}

#[test]
fn test_mutex_grants_most_recent_request() {
    let (order, report) = run_mutex(Discipline::Lifo);
    assert_eq!(order, vec!["C0", "C2", "C1"]);
    assert_eq!(report.completed, 4);
    assert!(report.blocked.is_empty());
}

#[test]
fn test_mutex_front_insert_is_fifo() {
    let (order, report) = run_mutex(Discipline::Fifo);
    assert_eq!(order, vec!["C0", "C1", "C2"]);
    assert_eq!(report.completed, 4);
}

// ============================================================================
// Ping-pong
// ============================================================================

#[test]
fn test_pingpong_delay_matches_model() {
    let bytes = 1e6;
    let config = PlatformBuilder::new()
        .host("Tremblay", 1e9, 1)
        .host("Jupiter", 1e9, 1)
        .link("l1", 1e6, 0.01)
        .link("l2", 2e6, 0.005)
        .route("Tremblay", "Jupiter", &["l1", "l2"])
        .build()
        .unwrap();
    // Slowest link sets the bandwidth phase, latencies add up.
    let expected = bytes / 1e6 + 0.015;

    let mut sim = Simulation::new(&config).unwrap();
    let delays = Rc::new(RefCell::new(Vec::new()));
    let tremblay = sim.host("Tremblay").unwrap();
    let jupiter = sim.host("Jupiter").unwrap();

    let pinger_delays = Rc::clone(&delays);
    sim.spawn("pinger", tremblay, vec![], move |ctx| async move {
        let ping = Task::new("ping", 0.0, bytes).with_kind(TaskKind::Timestamped {
            sent_at: ctx.now(),
        });
        ctx.send("ponger", ping)?;
        let pong = ctx.receive("pinger").await?;
        let sent_at = pong.sent_at().unwrap();
        pinger_delays.borrow_mut().push(ctx.now() - sent_at);
        Ok(())
    })
    .unwrap();

    let ponger_delays = Rc::clone(&delays);
    sim.spawn("ponger", jupiter, vec![], move |ctx| async move {
        let ping = ctx.receive("ponger").await?;
        let sent_at = ping.sent_at().unwrap();
        ponger_delays.borrow_mut().push(ctx.now() - sent_at);
        let pong = Task::new("pong", 0.0, bytes).with_kind(TaskKind::Timestamped {
            sent_at: ctx.now(),
        });
        ctx.send("pinger", pong)
    })
    .unwrap();

    let report = sim.run().unwrap();
    let delays = delays.borrow();
    assert_eq!(delays.len(), 2);
    for d in delays.iter() {
        assert!((d - expected).abs() < 1e-9, "delay {} != {}", d, expected);
    }
    assert!((report.final_time - 2.0 * expected).abs() < 1e-9);
    assert_eq!(report.completed, 2);
}

// ============================================================================
// Master / worker over VMs
// ============================================================================

#[test]
fn test_suspend_freezes_and_resume_restores_progress() {
    let config = PlatformBuilder::new()
        .host("Jupiter", 1e9, 2)
        .vm("VM0", "Jupiter", 1, 1e8)
        .build()
        .unwrap();
    let mut sim = Simulation::new(&config).unwrap();
    let jupiter = sim.host("Jupiter").unwrap();
    let vm0 = sim.vm("VM0").unwrap();

    let worker = sim
        .spawn("worker", vm0, vec![], |ctx| async move { ctx.execute(10e9).await })
        .unwrap();
    sim.spawn("master", jupiter, vec![], move |ctx| async move {
        ctx.sleep(2.0).await?;
        ctx.suspend_vm(vm0)?;
        assert_eq!(ctx.vm_state(vm0)?, VmState::Suspended);
        assert_eq!(ctx.remaining(worker), Some(8e9));

        ctx.sleep(3.0).await?;
        assert_eq!(ctx.remaining(worker), Some(8e9));
        assert_eq!(ctx.host_load(jupiter)?, 0);

        ctx.resume_vm(vm0)?;
        assert_eq!(ctx.host_load(jupiter)?, 1);
        Ok(())
    })
    .unwrap();

    let report = sim.run().unwrap();
    assert_eq!(report.final_time, 13.0);
    assert_eq!(
        sim.actor_state(worker).unwrap(),
        ActorState::Terminated(ExitStatus::Completed)
    );
}

#[test]
fn test_consolidation_needs_residual_capacity() {
    let config = PlatformBuilder::new()
        .host("Jupiter", 1e9, 2)
        .host("Fafard", 1e9, 2)
        .host("Ginette", 1e9, 2)
        .link("backbone", 1e8, 0.0)
        .default_route(&["backbone"])
        .vm("VM0", "Jupiter", 1, 1e8)
        .vm("VM1", "Fafard", 1, 1e8)
        .vm("VM2", "Ginette", 1, 1e8)
        .build()
        .unwrap();
    let mut sim = Simulation::new(&config).unwrap();
    let jupiter = sim.host("Jupiter").unwrap();
    let (vm0, vm1, vm2) = (
        sim.vm("VM0").unwrap(),
        sim.vm("VM1").unwrap(),
        sim.vm("VM2").unwrap(),
    );

    let worker = sim
        .spawn("worker", vm1, vec![], |ctx| async move { ctx.execute(3e9).await })
        .unwrap();
    sim.spawn("master", jupiter, vec![], move |ctx| async move {
        // 1e8 bytes of memory over a 1e8 B/s link.
        ctx.migrate(vm1, jupiter).await?;
        assert_eq!(ctx.now(), 1.0);
        assert_eq!(ctx.vm_host(vm1)?, jupiter);
        assert_eq!(ctx.vm_state(vm1)?, VmState::Running);
        assert_eq!(ctx.free_cores(jupiter)?, 0);

        let err = ctx.migrate(vm2, jupiter).await.unwrap_err();
        assert!(matches!(err, SimError::InsufficientCapacity { .. }));
        assert_eq!(ctx.vm_state(vm2)?, VmState::Running);

        ctx.destroy_vm(vm0)?;
        ctx.migrate(vm2, jupiter).await?;
        assert_eq!(ctx.now(), 2.0);
        assert_eq!(ctx.vm_host(vm2)?, jupiter);

        // Already there.
        ctx.migrate(vm2, jupiter).await?;
        assert_eq!(ctx.now(), 2.0);
        Ok(())
    })
    .unwrap();

    let report = sim.run().unwrap();
    assert_eq!(report.failed, 0);
    // The worker kept its rate across the move.
    assert!((report.final_time - 3.0).abs() < 1e-9);
    assert_eq!(
        sim.actor_state(worker).unwrap(),
        ActorState::Terminated(ExitStatus::Completed)
    );
}

#[test]
fn test_admission_counts_memory() {
    let config = PlatformBuilder::new()
        .host_with_ram("small", 1e9, 4, 1.5e8)
        .build()
        .unwrap();
    let sim = Simulation::new(&config).unwrap();
    let ctx = sim.context();
    let small = ctx.host("small").unwrap();

    let a = ctx.create_vm("a", small, 1, 1e8).unwrap();
    let b = ctx.create_vm("b", small, 1, 1e8).unwrap();
    ctx.start_vm(a).unwrap();
    assert!(matches!(
        ctx.start_vm(b),
        Err(SimError::InsufficientCapacity { .. })
    ));
    assert_eq!(ctx.vm_state(b).unwrap(), VmState::Created);

    ctx.destroy_vm(a).unwrap();
    ctx.start_vm(b).unwrap();
    assert_eq!(ctx.vm_state(b).unwrap(), VmState::Running);
}

#[test]
fn test_illegal_vm_transitions() {
    let config = PlatformBuilder::new()
        .host("h", 1e9, 2)
        .vm("VM00", "h", 1, 0.0)
        .build()
        .unwrap();
    let sim = Simulation::new(&config).unwrap();
    let ctx = sim.context();
    let vm = ctx.vm("VM00").unwrap();

    assert!(matches!(
        ctx.resume_vm(vm),
        Err(SimError::InvalidTransition { state: VmState::Running, .. })
    ));
    ctx.suspend_vm(vm).unwrap();
    assert!(matches!(
        ctx.start_vm(vm),
        Err(SimError::InvalidTransition { state: VmState::Suspended, .. })
    ));
    ctx.destroy_vm(vm).unwrap();
    assert!(matches!(
        ctx.destroy_vm(vm),
        Err(SimError::InvalidTransition { state: VmState::Destroyed, .. })
    ));
    assert!(matches!(
        ctx.spawn("late", vm, vec![], |_ctx| async { Ok(()) }),
        Err(SimError::InvalidTransition { .. })
    ));
}

// ============================================================================
// Deployment from a platform file
// ============================================================================

const MASTER_WORKER_YAML: &str = r#"
simulation:
  log_level: warn

hosts:
  - name: Jupiter
    speed: 1e9
    cores: 2
  - name: Fafard
    speed: 1e9
    cores: 2

links:
  - name: backbone
    bandwidth: 1.25e8
    latency: 1e-4

default_route: [backbone]

vms:
  - name: VM0
    host: Jupiter
  - name: VM1
    host: Fafard

actors:
  - name: master
    host: Jupiter
    function: master
    args: ["4", "1e9", "1e6"]
  - name: worker-0
    host: VM0
    function: worker
  - name: worker-1
    host: VM1
    function: worker
"#;

fn master_worker_registry(log: Rc<RefCell<Vec<(String, String)>>>) -> ActorRegistry {
    let mut registry = ActorRegistry::new();
    registry.register("master", |ctx| async move {
        let args = ctx.args();
        let count: usize = args[0].parse().unwrap();
        let flops: f64 = args[1].parse().unwrap();
        let bytes: f64 = args[2].parse().unwrap();
        for i in 0..count {
            let task = Task::new(format!("Task{:02}", i), flops, bytes);
            ctx.send(&format!("worker-{}", i % 2), task)?;
        }
        for w in 0..2 {
            let stop = Task::signal(TaskKind::Custom {
                tag: "finalize".into(),
                data: serde_json::Value::Null,
            });
            ctx.send(&format!("worker-{}", w), stop)?;
        }
        Ok(())
    });

    // Registered bodies must be `Send + Sync`; the log goes through a
    // thread-local instead of a captured `Rc`.
    LOG.with(|l| *l.borrow_mut() = Some(log));
    registry.register("worker", |ctx| async move {
        let me = ctx.name();
        loop {
            let task = ctx.receive(&me).await?;
            if let TaskKind::Custom { tag, .. } = &task.kind {
                if tag == "finalize" {
                    return Ok(());
                }
            }
            ctx.execute(task.flops).await?;
            LOG.with(|l| {
                if let Some(log) = l.borrow().as_ref() {
                    log.borrow_mut().push((me.clone(), task.name.clone()));
                }
            });
        }
    });
    registry
}

thread_local! {
    static LOG: RefCell<Option<Rc<RefCell<Vec<(String, String)>>>>> = RefCell::new(None);
}

#[test]
fn test_master_worker_from_yaml_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(MASTER_WORKER_YAML.as_bytes()).unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let registry = master_worker_registry(Rc::clone(&log));
    let mut sim = Simulation::from_file(file.path()).unwrap();
    assert_eq!(sim.params().log_level, "warn");
    let ids = sim.deploy(&registry).unwrap();
    assert_eq!(ids.len(), 3);

    let report = sim.run().unwrap();
    assert_eq!(report.completed, 3);
    assert!(report.blocked.is_empty());
    // Two 1 Gflop tasks per worker at 1 Gflop/s, after the first transfer.
    assert!(report.final_time > 2.0 && report.final_time < 2.1);

    let log = log.borrow();
    let worker0: Vec<_> = log
        .iter()
        .filter(|(w, _)| w == "worker-0")
        .map(|(_, t)| t.as_str())
        .collect();
    assert_eq!(worker0, vec!["Task00", "Task02"]);
}

#[test]
fn test_json_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("platform.json");
    let config = PlatformBuilder::new()
        .host("h", 100.0, 1)
        .actor("napper", "h", "nap", &["2"])
        .build()
        .unwrap();
    config.to_json_file(&path).unwrap();

    let mut registry = ActorRegistry::new();
    registry.register("nap", |ctx| async move {
        let secs: f64 = ctx.args()[0].parse().unwrap();
        ctx.sleep(secs).await
    });

    let mut sim = Simulation::from_file(&path).unwrap();
    sim.deploy(&registry).unwrap();
    assert_eq!(sim.run().unwrap().final_time, 2.0);
}
