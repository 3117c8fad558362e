use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PowerdownConfig;
use crate::error::Error;
use crate::hooks::HookRegistry;
use crate::platform::{PowerAction, PowerControl};
use crate::worker::TickScheduler;

/// Where the coordinator is in a shutdown episode.
///
/// `Terminal` is not left automatically: the expected outcome of `Executing`
/// is loss of power or a restart. If the platform action fails silently, a
/// fresh request starts a new episode from `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Requested,
    Polling,
    Executing,
    Terminal,
}

/// One accepted shutdown/reboot request. Immutable after acceptance; the
/// deadline is fixed at acceptance time from `max-wait`.
#[derive(Debug, Clone, Copy)]
struct ShutdownRequest {
    action: PowerAction,
    deadline: Instant,
}

struct Inner {
    phase: Phase,
    request: Option<ShutdownRequest>,
}

/// The shutdown/reboot state machine.
///
/// `request` may be called from any context and never blocks: it performs a
/// capability check, one atomic exchange, a short critical section and a
/// non-blocking enqueue onto the tick scheduler. All hook polling happens in
/// `tick`, which only ever runs on the scheduler's worker.
pub struct Coordinator {
    registry: Arc<HookRegistry>,
    scheduler: Arc<dyn TickScheduler>,
    power: Arc<dyn PowerControl>,
    poll_interval: Duration,
    max_wait: Duration,
    episode_active: AtomicBool,
    inner: Mutex<Inner>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<HookRegistry>,
        scheduler: Arc<dyn TickScheduler>,
        power: Arc<dyn PowerControl>,
        cfg: &PowerdownConfig,
    ) -> Self {
        Self {
            registry,
            scheduler,
            power,
            poll_interval: cfg.poll_interval,
            max_wait: cfg.max_wait,
            episode_active: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                request: None,
            }),
        }
    }

    /// Ask the platform to shut down, reboot, or reboot into the bootloader.
    ///
    /// Returns before any hook has been invoked; polling then continues on
    /// the worker until every hook acknowledges or `max-wait` elapses,
    /// whichever comes first, at which point the platform action runs. A
    /// request while an episode is already in flight coalesces into it and
    /// leaves its deadline untouched.
    pub fn request(self: &Arc<Self>, reboot: bool, to_bootloader: bool) -> Result<(), Error> {
        self.request_at(reboot, to_bootloader, Instant::now())
    }

    /// Current phase; callers that want to outlive the request can wait for
    /// `Phase::Terminal`.
    pub fn phase(&self) -> Phase {
        self.inner.lock().expect("coordinator state poisoned").phase
    }

    fn request_at(
        self: &Arc<Self>,
        reboot: bool,
        to_bootloader: bool,
        now: Instant,
    ) -> Result<(), Error> {
        let caps = self.power.capabilities();
        let action = match (reboot, to_bootloader) {
            (false, _) => {
                if !caps.shutdown {
                    return Err(Error::UnsupportedOperation("platform cannot power off"));
                }
                PowerAction::Shutdown
            }
            (true, false) => {
                if !caps.reboot {
                    return Err(Error::UnsupportedOperation("platform cannot reboot"));
                }
                PowerAction::Reboot
            }
            (true, true) => {
                if !caps.reboot || !caps.bootloader {
                    return Err(Error::UnsupportedOperation(
                        "platform has no bootloader mode",
                    ));
                }
                PowerAction::RebootToBootloader
            }
        };

        // Idempotent coalescing: whoever flips the flag owns the episode;
        // everyone else returns success without touching it.
        if self.episode_active.swap(true, Ordering::AcqRel) {
            debug!(%action, "shutdown already in flight, coalescing request");
            return Ok(());
        }

        self.registry.begin_episode();
        {
            let mut inner = self.inner.lock().expect("coordinator state poisoned");
            inner.phase = Phase::Requested;
            inner.request = Some(ShutdownRequest {
                action,
                deadline: now + self.max_wait,
            });
        }
        info!(%action, max_wait = ?self.max_wait, hooks = self.registry.len(), "shutdown requested");

        let coord = Arc::clone(self);
        self.scheduler
            .schedule(Duration::ZERO, Box::new(move || coord.tick(Instant::now())));
        Ok(())
    }

    /// One polling tick. Runs only on the scheduler's worker, never from the
    /// requesting context, and never concurrently with another tick.
    fn tick(self: &Arc<Self>, now: Instant) {
        let (action, deadline) = {
            let mut inner = self.inner.lock().expect("coordinator state poisoned");
            match (inner.phase, inner.request) {
                (Phase::Requested | Phase::Polling, Some(req)) => {
                    inner.phase = Phase::Polling;
                    (req.action, req.deadline)
                }
                _ => {
                    debug!("stale tick, no episode in flight");
                    return;
                }
            }
        };

        // Poll outside any lock; hooks must not run under the registry's
        // critical section.
        let snapshot = self.registry.snapshot();
        let mut newly_acked = Vec::new();
        for entry in &snapshot {
            if !entry.acked && entry.hook.can_shutdown() {
                newly_acked.push(Arc::clone(&entry.hook));
            }
        }
        if !newly_acked.is_empty() {
            self.registry.acknowledge(&newly_acked);
        }

        let complete = self.registry.all_acknowledged();
        if !complete && now < deadline {
            let coord = Arc::clone(self);
            self.scheduler.schedule(
                self.poll_interval,
                Box::new(move || coord.tick(Instant::now())),
            );
            return;
        }

        if complete {
            info!(%action, "all shutdown hooks acknowledged");
        } else {
            let pending = self
                .registry
                .snapshot()
                .iter()
                .filter(|e| !e.acked)
                .count();
            warn!(%action, pending, "shutdown deadline elapsed, forcing platform action");
        }

        {
            let mut inner = self.inner.lock().expect("coordinator state poisoned");
            inner.phase = Phase::Executing;
        }
        if let Err(err) = self.power.perform(action) {
            // Nothing to recover here; on real hardware success does not
            // return at all.
            warn!(%action, error = %err, "platform power action failed");
        }
        {
            let mut inner = self.inner.lock().expect("coordinator state poisoned");
            inner.phase = Phase::Terminal;
        }
        self.episode_active.store(false, Ordering::Release);
    }
}
