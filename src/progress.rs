//! Fan-out of `ProgressEvent`s to interested subscribers.
//!
//! Mirrors the corpus's `register_*_listener` idiom: subscribers are plain
//! closures stored behind `Arc<dyn Fn>`, guarded by a poison-tolerant mutex
//! since the vector is only ever touched synchronously. Each invocation is
//! isolated with `catch_unwind` so one panicking subscriber cannot prevent
//! the rest from being notified.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::debug_eprintln;
use crate::model::ProgressEvent;
use crate::sync_ext::MutexExt;

type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync + 'static>;

struct Subscriber {
    id: u64,
    listener: Listener,
}

/// Registry of progress subscribers for one queue instance.
#[derive(Default)]
pub struct ProgressTracker {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Handle returned by `on_progress`; dropping it does nothing, call
/// `unsubscribe()` explicitly to detach the listener.
pub struct Subscription {
    id: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for every future progress event. Returns a
    /// `Subscription` that can later be passed to `unsubscribe`.
    pub fn on_progress<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock_unpoisoned()
            .push(Subscriber { id, listener: Arc::new(listener) });
        Subscription { id }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers
            .lock_unpoisoned()
            .retain(|s| s.id != subscription.id);
    }

    /// Remove every registered subscriber, e.g. at shutdown.
    pub fn clear(&self) {
        self.subscribers.lock_unpoisoned().clear();
    }

    /// Notify every current subscriber. Listeners are cloned out of the lock
    /// first so a subscriber that calls back into `on_progress`/`unsubscribe`
    /// does not deadlock on the same mutex.
    pub fn notify(&self, event: &ProgressEvent) {
        let listeners: Vec<Listener> = self
            .subscribers
            .lock_unpoisoned()
            .iter()
            .map(|s| s.listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                debug_eprintln!("progress subscriber panicked, continuing with the rest");
            }
        }
    }
}
