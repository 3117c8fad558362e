use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Error;

/// A subsystem's shutdown callback, polled while a power-down or reboot is
/// pending.
///
/// Implementations must return immediately: `true` once the subsystem has
/// flushed whatever it needs to and power may be cut, `false` while it still
/// needs time. The coordinator polls every registered hook until all have
/// answered `true` or the episode deadline passes.
pub trait ShutdownHook: Send + Sync {
    fn can_shutdown(&self) -> bool;
}

/// Shared handle to a registered hook. Registry identity is the `Arc`
/// allocation, so the same handle cannot be registered twice but two distinct
/// instances of the same type can.
pub type HookRef = Arc<dyn ShutdownHook>;

struct HookEntry {
    hook: HookRef,
    acked: bool,
}

/// One entry as seen by a polling tick: the hook plus whether it had already
/// acknowledged when the snapshot was taken.
#[derive(Clone)]
pub struct HookSnapshot {
    pub hook: HookRef,
    pub acked: bool,
}

/// Bounded, process-lifetime set of shutdown hooks.
///
/// All access goes through one short critical section; the lock is never held
/// across a hook invocation (the registry never invokes hooks at all), so
/// register/unregister stay safe to call while a shutdown episode is mid-poll.
pub struct HookRegistry {
    entries: Mutex<Vec<HookEntry>>,
    capacity: usize,
}

impl HookRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add a hook. New entries start unacknowledged and join any episode
    /// already in progress.
    pub fn register(&self, hook: HookRef) -> Result<(), Error> {
        let mut entries = self.entries.lock().expect("hook registry poisoned");
        if entries.iter().any(|e| Arc::ptr_eq(&e.hook, &hook)) {
            return Err(Error::DuplicateHook);
        }
        if entries.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                limit: self.capacity,
            });
        }
        entries.push(HookEntry { hook, acked: false });
        Ok(())
    }

    /// Remove a hook. Removing an entry that had not yet acknowledged counts
    /// as its acknowledgment: the completeness check only ever looks at
    /// entries that still exist, so removal can never stall a shutdown.
    pub fn unregister(&self, hook: &HookRef) -> Result<(), Error> {
        let mut entries = self.entries.lock().expect("hook registry poisoned");
        let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(&e.hook, hook)) else {
            return Err(Error::NotRegistered);
        };
        let entry = entries.remove(pos);
        if !entry.acked {
            debug!("hook removed before acknowledging");
        }
        Ok(())
    }

    /// Atomic copy of the current entries. Finite and restartable; never
    /// observes a half-applied register or unregister.
    pub fn snapshot(&self) -> Vec<HookSnapshot> {
        self.entries
            .lock()
            .expect("hook registry poisoned")
            .iter()
            .map(|e| HookSnapshot {
                hook: Arc::clone(&e.hook),
                acked: e.acked,
            })
            .collect()
    }

    /// Clear every acknowledgment flag at the start of a shutdown episode.
    pub fn begin_episode(&self) {
        let mut entries = self.entries.lock().expect("hook registry poisoned");
        for entry in entries.iter_mut() {
            entry.acked = false;
        }
    }

    /// Mark hooks that answered `true` during a tick.
    pub fn acknowledge(&self, hooks: &[HookRef]) {
        let mut entries = self.entries.lock().expect("hook registry poisoned");
        for entry in entries.iter_mut() {
            if hooks.iter().any(|h| Arc::ptr_eq(h, &entry.hook)) {
                entry.acked = true;
            }
        }
    }

    /// Whether every currently registered hook has acknowledged. Entries
    /// removed mid-episode no longer exist and therefore no longer count.
    pub fn all_acknowledged(&self) -> bool {
        self.entries
            .lock()
            .expect("hook registry poisoned")
            .iter()
            .all(|e| e.acked)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("hook registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
