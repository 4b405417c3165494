//! The embedding queue core: owns the in-memory queue, the flush mutex,
//! backpressure policy, and orchestrates the progress tracker, failed-item
//! handler and flush worker.
//!
//! Split across files the way the corpus splits a large component into one
//! file per concern re-exported from this `mod.rs`: enqueue, flush,
//! mutation (path rename/delete) and stats each get their own module.

mod enqueue;
mod flush;
mod mutation;
mod stats;

pub use enqueue::EnqueueOutcome;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::QueueConfig;
use crate::debug_eprintln;
use crate::failed_items::FailedItemsHandler;
use crate::flush_mutex::FlushMutex;
use crate::model::EmbeddingItem;
use crate::persistence;
use crate::progress::ProgressTracker;
use crate::sync_ext::MutexExt;
use crate::task_tracker::TaskTracker;
use crate::vector_store::VectorStore;

struct PersistDebounceState {
    armed: bool,
}

pub(crate) struct Inner {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) queue: AsyncMutex<VecDeque<EmbeddingItem>>,
    pub(crate) failed: FailedItemsHandler,
    pub(crate) progress: ProgressTracker,
    pub(crate) flush_mutex: Arc<FlushMutex>,
    pub(crate) is_flushing: AtomicBool,
    pub(crate) retry_count: AtomicU32,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) initialized: AtomicBool,
    pub(crate) high_watermark_armed: AtomicBool,
    pub(crate) critical_watermark_armed: AtomicBool,
    pub(crate) persist_debounce: std::sync::Mutex<PersistDebounceState>,
    pub(crate) flush_timer_armed: AtomicBool,
    pub(crate) flush_timer_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    pub(crate) persist_tasks: TaskTracker,
}

/// A durable, bounded, persistent embedding write-queue.
///
/// Cheap to clone: internally an `Arc`, so every clone shares the same
/// in-memory state and persistence files.
#[derive(Clone)]
pub struct EmbeddingQueue {
    pub(crate) inner: Arc<Inner>,
}

impl EmbeddingQueue {
    pub fn new(config: QueueConfig, store: Arc<dyn VectorStore>) -> Self {
        let failed = FailedItemsHandler::new(config.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                queue: AsyncMutex::new(VecDeque::new()),
                failed,
                progress: ProgressTracker::new(),
                flush_mutex: Arc::new(FlushMutex::new()),
                is_flushing: AtomicBool::new(false),
                retry_count: AtomicU32::new(0),
                shutting_down: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                high_watermark_armed: AtomicBool::new(false),
                critical_watermark_armed: AtomicBool::new(false),
                persist_debounce: std::sync::Mutex::new(PersistDebounceState { armed: false }),
                flush_timer_armed: AtomicBool::new(false),
                flush_timer_handle: std::sync::Mutex::new(None),
                persist_tasks: TaskTracker::new(),
            }),
        }
    }

    /// Register a progress listener; see `ProgressTracker::on_progress`.
    pub fn on_progress<F>(&self, listener: F) -> crate::progress::Subscription
    where
        F: Fn(&crate::model::ProgressEvent) + Send + Sync + 'static,
    {
        self.inner.progress.on_progress(listener)
    }

    /// Rehydrate the three persistence files and schedule a flush if the
    /// queue is non-empty. Corrupt files are quarantined, not propagated.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(items) =
            persistence::load::<Vec<EmbeddingItem>>(&self.inner.config.queue_path())?
        {
            let mut queue = self.inner.queue.lock().await;
            *queue = items.into();
        }
        self.inner.failed.initialize().await?;
        self.inner.initialized.store(true, Ordering::SeqCst);

        let len = self.inner.queue.lock().await.len();
        if len > 0 {
            self.schedule_flush();
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Block new enqueues, cancel timers, drain outstanding persistence and
    /// perform a final persist of all three files.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.flush_mutex.force_release();
        self.inner.persist_tasks.wait_idle().await;

        if let Err(err) = self.persist_queue().await {
            debug_eprintln!("failed final queue persist at shutdown: {err:#}");
        }
        if let Err(err) = self.inner.failed.persist_all() {
            debug_eprintln!("failed final failed-item persist at shutdown: {err:#}");
        }
        self.inner.progress.clear();
    }

    /// Schedule a debounced persist of the main queue. Coalesces rapid
    /// calls into a single write after `persist_debounce_ms`.
    pub(crate) fn schedule_persist(&self) {
        let mut state = self.inner.persist_debounce.lock_unpoisoned();
        if state.armed {
            return;
        }
        state.armed = true;
        drop(state);

        let this = self.clone();
        let guard = self.inner.persist_tasks.begin();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.config.persist_debounce()).await;
            {
                let mut state = this.inner.persist_debounce.lock_unpoisoned();
                state.armed = false;
            }
            if let Err(err) = this.persist_queue().await {
                debug_eprintln!("debounced queue persist failed: {err:#}");
            }
            drop(guard);
        });
    }

    pub(crate) async fn persist_queue(&self) -> Result<()> {
        let queue = self.inner.queue.lock().await;
        if queue.is_empty() {
            let path = self.inner.config.queue_path();
            drop(queue);
            return persistence::remove_if_exists(&path);
        }
        let items: Vec<&EmbeddingItem> = queue.iter().collect();
        persistence::persist(&self.inner.config.queue_path(), &items)
    }

    pub(crate) fn emit(&self, event: crate::model::ProgressEvent) {
        self.inner.progress.notify(&event);
    }
}
