//! Durable, bounded, persistent embedding write-queue.
//!
//! Decouples a CPU/LLM-bound analysis pipeline from a remote vector
//! database: producers enqueue embedding records, a background flusher
//! batches them into the store with bounded memory, atomic on-disk
//! checkpoints, retry with exponential backoff, and a dead-letter queue for
//! items that never succeed.

#[macro_export]
macro_rules! debug_eprintln {
    ($($arg:tt)*) => {{
        #[cfg(debug_assertions)]
        {
            eprintln!($($arg)*);
        }
        // In release builds we still want the arguments to be "used" so we
        // don't get unused variable/import warnings, but we do not want to
        // evaluate potentially expensive formatting expressions.
        #[cfg(not(debug_assertions))]
        {
            let _ = || {
                let _ = format_args!($($arg)*);
            };
        }
    }};
}

pub mod config;
pub mod error;
mod failed_items;
mod flush_mutex;
mod flush_worker;
pub mod manager;
pub mod model;
mod persistence;
pub mod progress;
pub mod queue;
mod sync_ext;
mod task_tracker;
pub mod vector_store;

pub use config::QueueConfig;
pub use error::QueueError;
pub use manager::{QueueManager, StageQueueConfig};
pub use model::{
    DeadLetterEntry, EmbeddingItem, FailedEntry, ItemKind, ProgressEvent, ProgressPhase,
    QueueHealth, QueueStats,
};
pub use progress::Subscription;
pub use queue::{EmbeddingQueue, EnqueueOutcome};
pub use vector_store::{FileUpsertItem, FolderUpsertItem, UpsertOutcome, VectorStore};
