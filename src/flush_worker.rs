//! Dispatches one batch to the vector store: bulk upsert first, falling back
//! to semaphore-gated per-item upserts on failure.
//!
//! Grounded on the corpus's retry-then-fallback embeddings worker: attempt
//! the batch call under a timeout, and if it fails (structured or raised)
//! fall through to per-item calls bounded by a concurrency semaphore rather
//! than giving up on the whole batch.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::QueueConfig;
use crate::model::{EmbeddingItem, ProgressEvent, ProgressPhase};
use crate::progress::ProgressTracker;
use crate::vector_store::{FileUpsertItem, FolderUpsertItem, VectorStore};

/// Outcome of processing one kind-homogeneous batch.
pub struct BatchOutcome {
    pub succeeded_ids: Vec<String>,
    pub failed: Vec<(EmbeddingItem, String)>,
}

/// Runs the bulk-then-per-item upsert strategy for one batch of items of a
/// single kind (all files or all folders).
pub struct ParallelFlushWorker<'a> {
    config: &'a QueueConfig,
    progress: &'a ProgressTracker,
}

impl<'a> ParallelFlushWorker<'a> {
    pub fn new(config: &'a QueueConfig, progress: &'a ProgressTracker) -> Self {
        Self { config, progress }
    }

    pub async fn process_files(
        &self,
        store: &Arc<dyn VectorStore>,
        items: &[EmbeddingItem],
        processed_count: &mut usize,
        total: usize,
    ) -> BatchOutcome {
        if items.is_empty() {
            return BatchOutcome { succeeded_ids: Vec::new(), failed: Vec::new() };
        }

        let wire: Vec<FileUpsertItem> = items.iter().map(Into::into).collect();
        let bulk = timeout(
            self.config.batch_embedding_timeout(),
            store.batch_upsert_files(&wire),
        )
        .await;

        match bulk {
            Ok(Ok(outcome)) if outcome.success => {
                *processed_count += items.len();
                self.emit_progress(*processed_count, total);
                BatchOutcome {
                    succeeded_ids: items.iter().map(|i| i.id.clone()).collect(),
                    failed: Vec::new(),
                }
            }
            _ => {
                self.process_files_individually(store, items, processed_count, total)
                    .await
            }
        }
    }

    pub async fn process_folders(
        &self,
        store: &Arc<dyn VectorStore>,
        items: &[EmbeddingItem],
        processed_count: &mut usize,
        total: usize,
    ) -> BatchOutcome {
        if items.is_empty() {
            return BatchOutcome { succeeded_ids: Vec::new(), failed: Vec::new() };
        }

        let wire: Vec<FolderUpsertItem> = items.iter().map(Into::into).collect();
        let bulk = timeout(
            self.config.batch_embedding_timeout(),
            store.batch_upsert_folders(&wire),
        )
        .await;

        match bulk {
            Ok(Ok(outcome)) if outcome.success => {
                *processed_count += items.len();
                self.emit_progress(*processed_count, total);
                BatchOutcome {
                    succeeded_ids: items.iter().map(|i| i.id.clone()).collect(),
                    failed: Vec::new(),
                }
            }
            _ => {
                self.process_folders_individually(store, items, processed_count, total)
                    .await
            }
        }
    }

    async fn process_files_individually(
        &self,
        store: &Arc<dyn VectorStore>,
        items: &[EmbeddingItem],
        processed_count: &mut usize,
        total: usize,
    ) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_flush_concurrency));
        let timeout_dur = self.config.embedding_request_timeout();

        let futures = items.iter().map(|item| {
            let semaphore = semaphore.clone();
            let store = store.clone();
            let wire: FileUpsertItem = item.into();
            async move {
                let permit = semaphore.acquire_owned().await;
                let result = match permit {
                    Ok(_permit) => timeout(timeout_dur, store.upsert_file(&wire)).await,
                    Err(_) => return (item.clone(), Err("upsert semaphore closed".to_string())),
                };
                (item.clone(), normalize_result(result))
            }
        });

        let results = join_all(futures).await;
        self.fold_results(results, processed_count, total)
    }

    async fn process_folders_individually(
        &self,
        store: &Arc<dyn VectorStore>,
        items: &[EmbeddingItem],
        processed_count: &mut usize,
        total: usize,
    ) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_flush_concurrency));
        let timeout_dur = self.config.embedding_request_timeout();

        let futures = items.iter().map(|item| {
            let semaphore = semaphore.clone();
            let store = store.clone();
            let wire: FolderUpsertItem = item.into();
            async move {
                let permit = semaphore.acquire_owned().await;
                let result = match permit {
                    Ok(_permit) => timeout(timeout_dur, store.upsert_folder(&wire)).await,
                    Err(_) => return (item.clone(), Err("upsert semaphore closed".to_string())),
                };
                (item.clone(), normalize_result(result))
            }
        });

        let results = join_all(futures).await;
        self.fold_results(results, processed_count, total)
    }

    fn fold_results(
        &self,
        results: Vec<(EmbeddingItem, Result<(), String>)>,
        processed_count: &mut usize,
        total: usize,
    ) -> BatchOutcome {
        let mut succeeded_ids = Vec::new();
        let mut failed = Vec::new();

        for (item, result) in results {
            match result {
                Ok(()) => {
                    *processed_count += 1;
                    succeeded_ids.push(item.id);
                }
                Err(error) => {
                    failed.push((item, error));
                }
            }
            self.emit_progress(*processed_count, total);
        }

        BatchOutcome { succeeded_ids, failed }
    }

    fn emit_progress(&self, processed_count: usize, total: usize) {
        let percent = if total == 0 { 100.0 } else { (processed_count as f64 / total as f64) * 100.0 };
        self.progress.notify(&ProgressEvent {
            phase: Some(ProgressPhase::Processing),
            total: Some(total),
            completed: Some(processed_count),
            percent: Some(percent),
            ..Default::default()
        });
    }
}

/// Normalize a timed-out / raised / structured-failure result into a single
/// `Result<(), String>` shape for the fold step.
fn normalize_result(
    result: Result<anyhow::Result<crate::vector_store::UpsertOutcome>, tokio::time::error::Elapsed>,
) -> Result<(), String> {
    match result {
        Ok(Ok(outcome)) if outcome.success => Ok(()),
        Ok(Ok(outcome)) => Err(outcome.error.unwrap_or_else(|| "upsert reported failure".to_string())),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("upsert timed out".to_string()),
    }
}
