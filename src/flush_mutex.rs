//! A single-slot async mutex for gating flush attempts, with a force-release
//! escape hatch for shutdown.
//!
//! This generalizes the corpus's "chained promise" mutex pattern (a mutex
//! implemented as a chain of resolved futures rather than a kernel
//! primitive) into an explicit generation counter: each successful `acquire`
//! bumps the generation, and the `FlushGuard` it returns remembers the
//! generation it was issued under. `force_release` bumps the generation and
//! wakes every waiter without needing the guard itself; the original
//! holder's `Drop` checks its remembered generation before releasing, so a
//! guard that has already been superseded by a force-release is a no-op on
//! drop instead of releasing a lock someone else now holds.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::sync_ext::MutexExt;

struct State {
    locked: bool,
    generation: u64,
}

/// A mutex guarding a single in-flight flush, with a `force_release` path
/// used at shutdown to unblock anyone waiting on it.
pub struct FlushMutex {
    state: std::sync::Mutex<State>,
    notify: Notify,
}

impl Default for FlushMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushMutex {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(State { locked: false, generation: 0 }),
            notify: Notify::new(),
        }
    }

    /// Acquire the mutex, waiting for any in-flight holder to release (or be
    /// force-released) first.
    pub async fn acquire(self: &Arc<Self>) -> FlushGuard {
        loop {
            {
                let mut state = self.state.lock_unpoisoned();
                if !state.locked {
                    state.locked = true;
                    state.generation += 1;
                    return FlushGuard {
                        mutex: Arc::clone(self),
                        generation: state.generation,
                        released: false,
                    };
                }
            }
            self.notify.notified().await;
        }
    }

    /// Whether a flush is currently in flight.
    pub fn is_locked(&self) -> bool {
        self.state.lock_unpoisoned().locked
    }

    /// Force the mutex open regardless of who holds it, e.g. at shutdown.
    /// The original holder's guard becomes a no-op on drop.
    pub fn force_release(&self) {
        let mut state = self.state.lock_unpoisoned();
        state.locked = false;
        state.generation += 1;
        drop(state);
        self.notify.notify_waiters();
    }
}

/// Holds the flush mutex until dropped. Idempotent: a guard whose generation
/// has been superseded by a `force_release` releases nothing on drop.
pub struct FlushGuard {
    mutex: Arc<FlushMutex>,
    generation: u64,
    released: bool,
}

impl FlushGuard {
    /// Release early, ahead of drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.mutex.state.lock_unpoisoned();
        if state.generation == self.generation {
            state.locked = false;
            state.generation += 1;
            drop(state);
            self.mutex.notify.notify_waiters();
        }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
