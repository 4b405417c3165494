//! Registry of named queue instances sharing a vector store handle.
//!
//! Per the redesign away from a process-wide module singleton: a host
//! application owns one `QueueManager` and threads it through (or wraps it
//! in its own `once_cell`/DI container if it wants process-wide sharing) —
//! that choice belongs to the host, not this crate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::debug_eprintln;
use crate::queue::EmbeddingQueue;
use crate::sync_ext::MutexExt;
use crate::vector_store::VectorStore;

/// Per-stage override of the default configuration, applied on top of a
/// base `QueueConfig` when a stage is first registered.
#[derive(Debug, Clone, Default)]
pub struct StageQueueConfig {
    pub batch_size: Option<usize>,
    pub flush_delay_ms: Option<u64>,
    pub parallel_flush_concurrency: Option<usize>,
}

impl StageQueueConfig {
    fn apply(&self, mut config: QueueConfig) -> QueueConfig {
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.flush_delay_ms {
            config.flush_delay_ms = v;
        }
        if let Some(v) = self.parallel_flush_concurrency {
            config.parallel_flush_concurrency = v;
        }
        config
    }
}

/// Owns a lazily created singleton analysis queue plus any number of named
/// stage queues, all sharing one vector store handle.
pub struct QueueManager {
    base_config: QueueConfig,
    store: Arc<dyn VectorStore>,
    singleton: std::sync::Mutex<Option<EmbeddingQueue>>,
    stages: std::sync::Mutex<HashMap<String, EmbeddingQueue>>,
}

impl QueueManager {
    pub fn new(base_config: QueueConfig, store: Arc<dyn VectorStore>) -> Self {
        Self {
            base_config,
            store,
            singleton: std::sync::Mutex::new(None),
            stages: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Lazily create and fetch the default analysis-stage queue.
    pub async fn singleton(&self) -> anyhow::Result<EmbeddingQueue> {
        {
            let guard = self.singleton.lock_unpoisoned();
            if let Some(queue) = guard.as_ref() {
                return Ok(queue.clone());
            }
        }

        let queue = EmbeddingQueue::new(self.base_config.clone(), self.store.clone());
        queue.initialize().await?;

        let mut guard = self.singleton.lock_unpoisoned();
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        *guard = Some(queue.clone());
        Ok(queue)
    }

    /// Lazily create and fetch a named stage queue. `config` is only
    /// consulted the first time a stage name is registered.
    pub async fn stage(
        &self,
        name: &str,
        config: StageQueueConfig,
    ) -> anyhow::Result<EmbeddingQueue> {
        {
            let guard = self.stages.lock_unpoisoned();
            if let Some(queue) = guard.get(name) {
                return Ok(queue.clone());
            }
        }

        let stage_config = config.apply(self.base_config.clone().with_stage(name));
        let queue = EmbeddingQueue::new(stage_config, self.store.clone());
        queue.initialize().await?;

        let mut guard = self.stages.lock_unpoisoned();
        if let Some(existing) = guard.get(name) {
            return Ok(existing.clone());
        }
        guard.insert(name.to_string(), queue.clone());
        Ok(queue)
    }

    /// Shut down every queue registered so far (singleton and named
    /// stages), draining outstanding persistence on each.
    pub async fn shutdown_all(&self) {
        let singleton = self.singleton.lock_unpoisoned().clone();
        if let Some(queue) = singleton {
            queue.shutdown().await;
        }

        let stages: Vec<EmbeddingQueue> = self.stages.lock_unpoisoned().values().cloned().collect();
        for queue in stages {
            queue.shutdown().await;
        }
        debug_eprintln!("queue manager shut down all registered queues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{FileUpsertItem, FolderUpsertItem, UpsertOutcome, VectorStore};
    use async_trait::async_trait;
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

    #[tokio::test]
    async fn singleton_is_created_once() {
        let dir = tempdir().unwrap();
        let manager = QueueManager::new(QueueConfig::new(dir.path()), Arc::new(OnlineStore));

        let a = manager.singleton().await.unwrap();
        let b = manager.singleton().await.unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[tokio::test]
    async fn stage_queues_are_isolated_by_name() {
        let dir = tempdir().unwrap();
        let manager = QueueManager::new(QueueConfig::new(dir.path()), Arc::new(OnlineStore));

        let analysis = manager.stage("analysis", StageQueueConfig::default()).await.unwrap();
        let organize = manager.stage("organize", StageQueueConfig::default()).await.unwrap();

        assert!(!Arc::ptr_eq(&analysis.inner, &organize.inner));
        assert_ne!(
            analysis.inner.config.queue_path(),
            organize.inner.config.queue_path()
        );
    }

    #[tokio::test]
    async fn stage_config_override_applies_on_first_registration() {
        let dir = tempdir().unwrap();
        let manager = QueueManager::new(QueueConfig::new(dir.path()), Arc::new(OnlineStore));
        let override_config = StageQueueConfig { batch_size: Some(7), ..Default::default() };

        let stage = manager.stage("organize", override_config).await.unwrap();
        assert_eq!(stage.inner.config.batch_size, 7);
    }
}
