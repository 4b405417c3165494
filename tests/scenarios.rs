//! End-to-end scenarios exercising the queue against an in-process mock
//! vector store, wired through `tokio::test`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use embedding_queue::{
    EmbeddingItem, EmbeddingQueue, QueueConfig, QueueHealth, UpsertOutcome, VectorStore,
};
use embedding_queue::vector_store::{FileUpsertItem, FolderUpsertItem};
use tempfile::tempdir;

struct MockStore {
    online: AtomicBool,
    poison_ids: Vec<String>,
    upserted_files: Mutex<Vec<String>>,
    upserted_folders: Mutex<Vec<String>>,
}

impl MockStore {
    fn online() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            poison_ids: Vec::new(),
            upserted_files: Mutex::new(Vec::new()),
            upserted_folders: Mutex::new(Vec::new()),
        })
    }

    fn with_poison(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            poison_ids: ids.iter().map(|s| s.to_string()).collect(),
            upserted_files: Mutex::new(Vec::new()),
            upserted_folders: Mutex::new(Vec::new()),
        })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(false),
            poison_ids: Vec::new(),
            upserted_files: Mutex::new(Vec::new()),
            upserted_folders: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VectorStore for MockStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn batch_upsert_files(&self, items: &[FileUpsertItem]) -> anyhow::Result<UpsertOutcome> {
        if items.iter().any(|i| self.poison_ids.contains(&i.id)) {
            return Ok(UpsertOutcome::failure("poison item in batch"));
        }
        self.upserted_files
            .lock()
            .unwrap()
            .extend(items.iter().map(|i| i.id.clone()));
        Ok(UpsertOutcome::ok())
    }

    async fn batch_upsert_folders(&self, items: &[FolderUpsertItem]) -> anyhow::Result<UpsertOutcome> {
        self.upserted_folders
            .lock()
            .unwrap()
            .extend(items.iter().map(|i| i.id.clone()));
        Ok(UpsertOutcome::ok())
    }

    async fn upsert_file(&self, item: &FileUpsertItem) -> anyhow::Result<UpsertOutcome> {
        if self.poison_ids.contains(&item.id) {
            return Ok(UpsertOutcome::failure("poison item"));
        }
        self.upserted_files.lock().unwrap().push(item.id.clone());
        Ok(UpsertOutcome::ok())
    }

    async fn upsert_folder(&self, item: &FolderUpsertItem) -> anyhow::Result<UpsertOutcome> {
        self.upserted_folders.lock().unwrap().push(item.id.clone());
        Ok(UpsertOutcome::ok())
    }
}

fn item(id: &str) -> EmbeddingItem {
    EmbeddingItem {
        id: id.to_string(),
        vector: vec![0.1, 0.2, 0.3],
        model: "test-model".to_string(),
        updated_at: 0,
        meta: HashMap::new(),
    }
}

#[tokio::test]
async fn s1_happy_path_batches_and_drains() {
    let dir = tempdir().unwrap();
    let mut config = QueueConfig::new(dir.path());
    config.batch_size = 2;
    config.flush_delay_ms = 50;
    let store = MockStore::online();
    let queue = EmbeddingQueue::new(config.clone(), store.clone());
    queue.initialize().await.unwrap();

    let phases = Arc::new(Mutex::new(Vec::new()));
    let phases_clone = phases.clone();
    queue.on_progress(move |event| {
        if let Some(phase) = event.phase {
            phases_clone.lock().unwrap().push(phase);
        }
    });

    queue.enqueue(item("file:/a")).await;
    queue.enqueue(item("file:/b")).await;
    queue.enqueue(item("folder:x")).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let files = store.upserted_files.lock().unwrap().clone();
    let folders = store.upserted_folders.lock().unwrap().clone();
    assert!(files.contains(&"file:/a".to_string()));
    assert!(files.contains(&"file:/b".to_string()));
    assert!(folders.contains(&"folder:x".to_string()));
    assert!(!config.queue_path().exists());

    let stats = queue.get_stats().await;
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.health, QueueHealth::Healthy);

    use embedding_queue::ProgressPhase;
    let seen = phases.lock().unwrap().clone();
    assert!(seen.contains(&ProgressPhase::Start));
    assert!(seen.contains(&ProgressPhase::Processing) || seen.contains(&ProgressPhase::Complete));
    assert!(seen.contains(&ProgressPhase::Complete));
}

#[tokio::test]
async fn s2_offline_then_recover_empties_queue_with_no_failures() {
    let dir = tempdir().unwrap();
    let mut config = QueueConfig::new(dir.path());
    config.max_retry_count = 5;
    config.backoff_base_ms = 100;
    config.backoff_max_ms = 1_000;
    config.flush_delay_ms = 50;
    let store = MockStore::offline();
    let queue = EmbeddingQueue::new(config, store.clone());
    queue.initialize().await.unwrap();

    let offline_events = Arc::new(AtomicUsize::new(0));
    let offline_clone = offline_events.clone();
    use embedding_queue::ProgressPhase;
    queue.on_progress(move |event| {
        if event.phase == Some(ProgressPhase::Offline) {
            offline_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    queue.enqueue(item("file:/a")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    store.online.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let stats = queue.get_stats().await;
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.failed_count, 0);
    assert!(offline_events.load(Ordering::SeqCst) >= 2);
    assert!(store.upserted_files.lock().unwrap().contains(&"file:/a".to_string()));
}

#[tokio::test]
async fn s3_offline_exceeding_cap_moves_item_to_failed_map() {
    let dir = tempdir().unwrap();
    let mut config = QueueConfig::new(dir.path());
    config.max_retry_count = 2;
    config.backoff_base_ms = 20;
    config.backoff_max_ms = 100;
    config.flush_delay_ms = 10;
    let store = MockStore::offline();
    let queue = EmbeddingQueue::new(config, store);
    queue.initialize().await.unwrap();

    let fatal_seen = Arc::new(AtomicBool::new(false));
    let fatal_clone = fatal_seen.clone();
    use embedding_queue::ProgressPhase;
    queue.on_progress(move |event| {
        if event.phase == Some(ProgressPhase::FatalError) {
            fatal_clone.store(true, Ordering::SeqCst);
        }
    });

    queue.enqueue(item("file:/a")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = queue.get_stats().await;
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.failed_count, 1);
    assert!(fatal_seen.load(Ordering::SeqCst));
}

#[tokio::test]
async fn s4_poison_item_reaches_dead_letter_and_can_be_requeued() {
    let dir = tempdir().unwrap();
    let mut config = QueueConfig::new(dir.path());
    config.item_max_retries = 2;
    config.batch_size = 1;
    config.flush_delay_ms = 10;
    config.backoff_base_ms = 10;
    config.backoff_max_ms = 50;
    let store = MockStore::with_poison(&["file:/bad"]);
    let queue = EmbeddingQueue::new(config, store.clone());
    queue.initialize().await.unwrap();

    for id in ["file:/a", "file:/b", "file:/c", "file:/bad", "file:/d"] {
        queue.enqueue(item(id)).await;
    }

    tokio::time::sleep(Duration::from_millis(600)).await;

    let dead_letter = queue.dead_letter_entries(None);
    let bad_entry = dead_letter.iter().find(|e| e.item_id == "file:/bad");
    assert!(bad_entry.is_some(), "expected file:/bad to reach the dead-letter queue");
    let bad_entry = bad_entry.unwrap();
    assert_eq!(bad_entry.retry_count, 3);
    assert_eq!(bad_entry.item_type, embedding_queue::ItemKind::File);

    let files = store.upserted_files.lock().unwrap().clone();
    for id in ["file:/a", "file:/b", "file:/c", "file:/d"] {
        assert!(files.contains(&id.to_string()), "expected {id} to be upserted");
    }

    let requeued = queue.retry_dead_letter_item("file:/bad").await;
    assert!(requeued);
    assert!(queue.dead_letter_entries(None).is_empty());
}

#[tokio::test]
async fn s6_backpressure_diverts_overflow_item_and_later_retries_it() {
    let dir = tempdir().unwrap();
    let mut config = QueueConfig::new(dir.path());
    config.max_queue_size = 10;
    config.batch_size = 10;
    config.flush_delay_ms = 20;
    config.backoff_base_ms = 10;
    config.backoff_max_ms = 50;
    let store = MockStore::online();
    let queue = EmbeddingQueue::new(config, store.clone());
    queue.initialize().await.unwrap();

    let mut overflow_seen = false;
    for i in 0..11 {
        let outcome = queue.enqueue(item(&format!("file:/{i}"))).await;
        if i == 10 {
            assert!(!outcome.success);
            assert_eq!(outcome.reason, Some("queue_overflow"));
            overflow_seen = true;
        }
    }
    assert!(overflow_seen);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = queue.get_stats().await;
    assert_eq!(stats.failed_count, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let files = store.upserted_files.lock().unwrap().clone();
    assert!(files.contains(&"file:/10".to_string()));
}
