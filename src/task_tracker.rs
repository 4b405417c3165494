//! Tracks outstanding background persistence tasks so `shutdown()` can wait
//! for every in-flight write before returning, generalizing the corpus's
//! debounce-plus-outstanding-work-set shutdown drain.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct TaskTracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// RAII marker for one outstanding unit of work; decrements the count and
/// wakes any waiter on drop.
pub struct TaskGuard<'a> {
    tracker: &'a TaskTracker,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self { outstanding: AtomicUsize::new(0), idle: Notify::new() }
    }

    pub fn begin(&self) -> TaskGuard<'_> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        TaskGuard { tracker: self }
    }

    /// Wait until there are zero outstanding tasks. Safe to call
    /// concurrently with new `begin()` calls racing in; such tasks simply
    /// extend the wait.
    pub async fn wait_idle(&self) {
        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.idle.notified().await;
        }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}
