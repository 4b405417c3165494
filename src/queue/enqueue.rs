use std::sync::atomic::Ordering;

use crate::error::QueueError;
use crate::model::EmbeddingItem;

use super::EmbeddingQueue;

/// Result of an `enqueue` call: `{success, reason?, warnings[]}` wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub success: bool,
    pub reason: Option<&'static str>,
    pub warnings: Vec<&'static str>,
}

impl EnqueueOutcome {
    fn ok(warnings: Vec<&'static str>) -> Self {
        Self { success: true, reason: None, warnings }
    }

    fn err(error: QueueError) -> Self {
        Self { success: false, reason: Some(error.reason()), warnings: Vec::new() }
    }
}

fn validate(item: &EmbeddingItem) -> Result<(), QueueError> {
    if item.id.is_empty() {
        return Err(QueueError::InvalidItem);
    }
    if item.vector.is_empty() {
        return Err(QueueError::InvalidVectorFormat);
    }
    if item.vector.iter().any(|v| !v.is_finite()) {
        return Err(QueueError::InvalidVectorValues);
    }
    Ok(())
}

impl EmbeddingQueue {
    /// Validate and append an item to the queue, diverting to the failed
    /// map on overflow rather than rejecting outright. Schedules a debounced
    /// persist and either an immediate or delayed flush.
    pub async fn enqueue(&self, item: EmbeddingItem) -> EnqueueOutcome {
        if self.is_shutting_down() {
            return EnqueueOutcome::err(QueueError::ShuttingDown);
        }

        if let Err(error) = validate(&item) {
            return EnqueueOutcome::err(error);
        }

        let mut warnings = Vec::new();
        let mut queue = self.inner.queue.lock().await;

        if queue.len() >= self.inner.config.max_queue_size {
            drop(queue);
            self.inner.failed.divert(item, "queue_overflow");
            return EnqueueOutcome::err(QueueError::QueueOverflow);
        }

        queue.push_back(item);
        let len = queue.len();
        let should_flush_now = len >= self.inner.config.batch_size;
        drop(queue);

        self.update_watermark_warnings(len, &mut warnings);

        self.schedule_persist();
        if should_flush_now {
            let this = self.clone();
            tokio::spawn(async move {
                this.flush().await;
            });
        } else {
            self.schedule_flush();
        }

        EnqueueOutcome::ok(warnings)
    }

    fn update_watermark_warnings(&self, len: usize, warnings: &mut Vec<&'static str>) {
        let high = self.inner.config.high_watermark_len();
        let critical = self.inner.config.critical_watermark_len();

        if len >= critical {
            if !self.inner.critical_watermark_armed.swap(true, Ordering::SeqCst) {
                warnings.push("critical_watermark");
            }
        } else if len < critical / 2 {
            self.inner.critical_watermark_armed.store(false, Ordering::SeqCst);
        }

        if len >= high {
            if !self.inner.high_watermark_armed.swap(true, Ordering::SeqCst) {
                warnings.push("high_watermark");
            }
        } else if len < high / 2 {
            self.inner.high_watermark_armed.store(false, Ordering::SeqCst);
        }
    }

    /// Arm a single delayed-flush timer, a no-op if one is already pending.
    pub(crate) fn schedule_flush(&self) {
        use crate::sync_ext::MutexExt;
        if self.inner.flush_timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.inner.config.flush_delay()).await;
            this.inner.flush_timer_armed.store(false, Ordering::SeqCst);
            *this.inner.flush_timer_handle.lock_unpoisoned() = None;
            this.flush().await;
        });
        *self.inner.flush_timer_handle.lock_unpoisoned() = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::vector_store::{FileUpsertItem, FolderUpsertItem, UpsertOutcome, VectorStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct OnlineStore;

    #[async_trait]
    impl VectorStore for OnlineStore {
        async fn initialize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_online(&self) -> bool {
            true
        }
        async fn batch_upsert_files(&self, _items: &[FileUpsertItem]) -> anyhow::Result<UpsertOutcome> {
            Ok(UpsertOutcome::ok())
        }
        async fn batch_upsert_folders(&self, _items: &[FolderUpsertItem]) -> anyhow::Result<UpsertOutcome> {
            Ok(UpsertOutcome::ok())
        }
        async fn upsert_file(&self, _item: &FileUpsertItem) -> anyhow::Result<UpsertOutcome> {
            Ok(UpsertOutcome::ok())
        }
        async fn upsert_folder(&self, _item: &FolderUpsertItem) -> anyhow::Result<UpsertOutcome> {
            Ok(UpsertOutcome::ok())
        }
    }

    fn item(id: &str) -> EmbeddingItem {
        EmbeddingItem {
            id: id.to_string(),
            vector: vec![1.0, 2.0],
            model: "m".to_string(),
            updated_at: 0,
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_vector() {
        let dir = tempdir().unwrap();
        let config = QueueConfig::new(dir.path());
        let queue = EmbeddingQueue::new(config, Arc::new(OnlineStore));
        let mut bad = item("file:/a");
        bad.vector.clear();

        let outcome = queue.enqueue(bad).await;
        assert!(!outcome.success);
        assert_eq!(outcome.reason, Some("invalid_vector_format"));
    }

    #[tokio::test]
    async fn enqueue_rejects_non_finite_vector() {
        let dir = tempdir().unwrap();
        let config = QueueConfig::new(dir.path());
        let queue = EmbeddingQueue::new(config, Arc::new(OnlineStore));
        let mut bad = item("file:/a");
        bad.vector[0] = f64::NAN;

        let outcome = queue.enqueue(bad).await;
        assert!(!outcome.success);
        assert_eq!(outcome.reason, Some("invalid_vector_values"));
    }

    #[tokio::test]
    async fn enqueue_overflow_diverts_to_failed_map() {
        let dir = tempdir().unwrap();
        let mut config = QueueConfig::new(dir.path());
        config.max_queue_size = 1;
        config.batch_size = 100;
        config.flush_delay_ms = 60_000;
        let queue = EmbeddingQueue::new(config, Arc::new(OnlineStore));

        let first = queue.enqueue(item("file:/a")).await;
        assert!(first.success);

        let second = queue.enqueue(item("file:/b")).await;
        assert!(!second.success);
        assert_eq!(second.reason, Some("queue_overflow"));
        assert_eq!(queue.inner.failed.failed_count(), 1);
    }

    #[tokio::test]
    async fn shutting_down_rejects_enqueue() {
        let dir = tempdir().unwrap();
        let config = QueueConfig::new(dir.path());
        let queue = EmbeddingQueue::new(config, Arc::new(OnlineStore));
        queue.shutdown().await;

        let outcome = queue.enqueue(item("file:/a")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.reason, Some("shutting_down"));
    }
}
