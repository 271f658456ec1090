//! Per-handle serialization arena.
//!
//! One entry per container name, each with a fair async gate: operations
//! on the same handle run strictly one at a time, queueing FIFO behind
//! the in-flight one (tokio's mutex wakes waiters in arrival order).
//! Explicit queue accounting keeps the ordering auditable and lets the
//! configured depth limit or reject-when-busy policy apply before a
//! waiter parks.

use crate::error::OrchestratorError;
use crate::handle::HandleState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use crun_types::QueueConfig;

pub(crate) struct HandleEntry {
    state: StdMutex<HandleState>,
    gate: Arc<Mutex<()>>,
    waiting: AtomicUsize,
}

pub(crate) struct HandleArena {
    entries: DashMap<String, Arc<HandleEntry>>,
    queue: QueueConfig,
}

impl HandleArena {
    pub fn new(queue: QueueConfig) -> Self {
        Self {
            entries: DashMap::new(),
            queue,
        }
    }

    fn entry(&self, name: &str) -> Arc<HandleEntry> {
        self.entries
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(HandleEntry {
                    state: StdMutex::new(HandleState::new(name)),
                    gate: Arc::new(Mutex::new(())),
                    waiting: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// Current cached state for a handle, if one exists.
    pub fn state(&self, name: &str) -> Option<HandleState> {
        self.entries
            .get(name)
            .map(|e| e.state.lock().expect("handle state poisoned").clone())
    }

    /// Serialize an operation on `name`. Queues FIFO behind an in-flight
    /// operation by default; rejects when configured to, or when the
    /// queue depth limit is exceeded.
    pub async fn acquire(&self, name: &str) -> Result<OperationPermit, OrchestratorError> {
        let entry = self.entry(name);
        let guard = match entry.gate.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                if self.queue.reject_when_busy {
                    return Err(OrchestratorError::Busy {
                        container: name.to_owned(),
                    });
                }
                let depth = entry.waiting.fetch_add(1, Ordering::SeqCst) + 1;
                if depth > self.queue.depth_limit {
                    entry.waiting.fetch_sub(1, Ordering::SeqCst);
                    return Err(OrchestratorError::QueueFull {
                        container: name.to_owned(),
                        depth,
                    });
                }
                let guard = entry.gate.clone().lock_owned().await;
                entry.waiting.fetch_sub(1, Ordering::SeqCst);
                guard
            }
        };
        Ok(OperationPermit {
            entry,
            _guard: guard,
        })
    }
}

/// Exclusive access to one handle for the duration of an operation.
pub(crate) struct OperationPermit {
    entry: Arc<HandleEntry>,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for OperationPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationPermit").finish_non_exhaustive()
    }
}

impl OperationPermit {
    pub fn with_state<R>(&self, f: impl FnOnce(&mut HandleState) -> R) -> R {
        let mut state = self.entry.state.lock().expect("handle state poisoned");
        f(&mut state)
    }

    pub fn state(&self) -> HandleState {
        self.with_state(|s| s.clone())
    }
}
