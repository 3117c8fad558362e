//! End-to-end episodes through the real worker thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use powerdown::config::PowerdownConfig;
use powerdown::coordinator::{Coordinator, Phase};
use powerdown::hooks::{HookRef, HookRegistry, ShutdownHook};
use powerdown::platform::{DryRunPowerControl, PowerAction, PowerControl};
use powerdown::worker::{TickScheduler, Worker};

/// Acknowledges on the `ready_after`-th poll.
struct StagedHook {
    ready_after: usize,
    calls: AtomicUsize,
}

impl StagedHook {
    fn new(ready_after: usize) -> Arc<Self> {
        Arc::new(Self {
            ready_after,
            calls: AtomicUsize::new(0),
        })
    }
}

impl ShutdownHook for StagedHook {
    fn can_shutdown(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after
    }
}

struct Harness {
    registry: Arc<HookRegistry>,
    power: Arc<DryRunPowerControl>,
    coordinator: Arc<Coordinator>,
    // Keeps the worker thread alive for the duration of the test.
    _worker: Arc<Worker>,
}

fn harness(cfg: PowerdownConfig) -> Harness {
    let worker = Arc::new(Worker::spawn().unwrap());
    let registry = Arc::new(HookRegistry::new(cfg.max_hooks));
    let power = Arc::new(DryRunPowerControl::new());
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&registry),
        Arc::clone(&worker) as Arc<dyn TickScheduler>,
        Arc::clone(&power) as Arc<dyn PowerControl>,
        &cfg,
    ));
    Harness {
        registry,
        power,
        coordinator,
        _worker: worker,
    }
}

fn wait_for_terminal(coordinator: &Coordinator) {
    let give_up = Instant::now() + Duration::from_secs(5);
    while coordinator.phase() != Phase::Terminal {
        assert!(Instant::now() < give_up, "episode never reached Terminal");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn staged_hooks_complete_an_episode() {
    let h = harness(PowerdownConfig {
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_secs(3),
        ..PowerdownConfig::default()
    });

    let immediate = StagedHook::new(1);
    let slow = StagedHook::new(3);
    h.registry.register(immediate.clone() as HookRef).unwrap();
    h.registry.register(slow.clone() as HookRef).unwrap();

    h.coordinator.request(false, false).unwrap();
    wait_for_terminal(&h.coordinator);

    assert_eq!(h.power.performed(), vec![PowerAction::Shutdown]);
    // The immediate hook acknowledged on its first poll and was not asked again.
    assert_eq!(immediate.calls.load(Ordering::SeqCst), 1);
    assert!(slow.calls.load(Ordering::SeqCst) >= 3);
}

#[test]
fn deadline_forces_a_stuck_hook() {
    let h = harness(PowerdownConfig {
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_millis(150),
        ..PowerdownConfig::default()
    });

    let stuck = StagedHook::new(usize::MAX);
    h.registry.register(stuck as HookRef).unwrap();

    let started = Instant::now();
    h.coordinator.request(true, false).unwrap();
    wait_for_terminal(&h.coordinator);

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(h.power.performed(), vec![PowerAction::Reboot]);
}

#[test]
fn concurrent_requests_resolve_to_one_platform_action() {
    let h = harness(PowerdownConfig {
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_secs(3),
        ..PowerdownConfig::default()
    });

    h.registry.register(StagedHook::new(2) as HookRef).unwrap();

    let mut joins = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&h.coordinator);
        joins.push(thread::spawn(move || {
            coordinator.request(false, false).unwrap();
        }));
    }
    for join in joins {
        join.join().unwrap();
    }

    wait_for_terminal(&h.coordinator);
    assert_eq!(h.power.performed(), vec![PowerAction::Shutdown]);
}
