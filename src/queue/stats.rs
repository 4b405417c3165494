use std::sync::atomic::Ordering;

use crate::model::{DeadLetterEntry, QueueHealth, QueueStats};

use super::EmbeddingQueue;

impl EmbeddingQueue {
    pub async fn get_stats(&self) -> QueueStats {
        let queue_length = self.inner.queue.lock().await.len();
        let max = self.inner.config.max_queue_size.max(1);
        let capacity_percent = (queue_length as f64 / max as f64) * 100.0;

        let critical = self.inner.config.critical_watermark_len();
        let high = self.inner.config.high_watermark_len();
        let health = if queue_length >= critical {
            QueueHealth::Critical
        } else if queue_length >= high {
            QueueHealth::Warning
        } else {
            QueueHealth::Healthy
        };

        QueueStats {
            queue_length,
            capacity_percent,
            health,
            is_flushing: self.inner.is_flushing.load(Ordering::SeqCst),
            retry_count: self.inner.retry_count.load(Ordering::SeqCst),
            failed_count: self.inner.failed.failed_count(),
            dead_letter_count: self.inner.failed.dead_letter_count(),
            high_watermark_armed: self.inner.high_watermark_armed.load(Ordering::SeqCst),
            critical_watermark_armed: self.inner.critical_watermark_armed.load(Ordering::SeqCst),
            initialized: self.is_initialized(),
        }
    }

    /// List dead-letter entries, most recently failed first.
    pub fn dead_letter_entries(&self, limit: Option<usize>) -> Vec<DeadLetterEntry> {
        self.inner.failed.dead_letter_entries(limit)
    }

    pub fn clear_dead_letter_queue(&self) -> anyhow::Result<()> {
        self.inner.failed.clear_dead_letter()
    }

    /// Move one dead-letter entry back to the main queue and schedule a
    /// flush. Returns whether an entry with that id was found.
    pub async fn retry_dead_letter_item(&self, id: &str) -> bool {
        match self.inner.failed.retry_dead_letter_item(id) {
            Some(item) => {
                self.inner.queue.lock().await.push_back(item);
                self.schedule_persist();
                self.schedule_flush();
                true
            }
            None => false,
        }
    }

    /// Move every dead-letter entry back to the main queue and schedule a
    /// flush. Returns the number of entries requeued.
    pub async fn retry_all_dead_letter_items(&self) -> usize {
        let items = self.inner.failed.retry_all_dead_letter();
        let count = items.len();
        if count > 0 {
            let mut queue = self.inner.queue.lock().await;
            queue.extend(items);
            drop(queue);
            self.schedule_persist();
            self.schedule_flush();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::model::EmbeddingItem;
    use crate::vector_store::{FileUpsertItem, FolderUpsertItem, UpsertOutcome, VectorStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct NeverOnlineStore;

    #[async_trait]
    impl VectorStore for NeverOnlineStore {
        async fn initialize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_online(&self) -> bool {
            false
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

    #[tokio::test]
    async fn get_stats_reports_health_bands() {
        let dir = tempdir().unwrap();
        let mut config = QueueConfig::new(dir.path());
        config.max_queue_size = 10;
        config.high_watermark = 0.5;
        config.critical_watermark = 0.8;
        config.flush_delay_ms = 60_000;
        let queue = EmbeddingQueue::new(config, Arc::new(NeverOnlineStore));

        for i in 0..6 {
            queue
                .enqueue(EmbeddingItem {
                    id: format!("file:/{i}"),
                    vector: vec![1.0],
                    model: "m".to_string(),
                    updated_at: 0,
                    meta: Default::default(),
                })
                .await;
        }

        let stats = queue.get_stats().await;
        assert_eq!(stats.queue_length, 6);
        assert_eq!(stats.health, QueueHealth::Warning);
    }
}
