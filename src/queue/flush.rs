use std::collections::HashSet;
use std::sync::atomic::Ordering;

use anyhow::Context;

use crate::debug_eprintln;
use crate::flush_worker::ParallelFlushWorker;
use crate::model::{EmbeddingItem, ItemKind, ProgressEvent, ProgressPhase};

use super::EmbeddingQueue;

enum FlushOutcome {
    Completed,
    Offline,
}

impl EmbeddingQueue {
    /// Run the full flush algorithm: acquire the flush mutex, snapshot a
    /// batch, dispatch it to the vector store, remove processed items by
    /// id-set, persist, and opportunistically requeue due retries.
    pub async fn flush(&self) {
        let guard = match tokio::time::timeout(
            self.inner.config.mutex_acquire_timeout(),
            self.inner.flush_mutex.acquire(),
        )
        .await
        {
            Ok(guard) => guard,
            Err(_) => {
                debug_eprintln!("flush mutex acquisition timed out; force-releasing");
                self.inner.flush_mutex.force_release();
                self.inner.flush_mutex.acquire().await
            }
        };

        if self.inner.is_flushing.load(Ordering::SeqCst) {
            return;
        }
        let queue_len = self.inner.queue.lock().await.len();
        if queue_len == 0 {
            return;
        }
        self.inner.is_flushing.store(true, Ordering::SeqCst);
        self.cancel_pending_flush_timer();

        let result = self.run_flush_batch().await;
        self.inner.is_flushing.store(false, Ordering::SeqCst);
        drop(guard);

        match result {
            Ok(FlushOutcome::Completed) => {
                self.inner.retry_count.store(0, Ordering::SeqCst);
            }
            Ok(FlushOutcome::Offline) => {}
            Err(err) => {
                debug_eprintln!("flush failed: {err:#}");
                self.emit(ProgressEvent {
                    phase: Some(ProgressPhase::Error),
                    error: Some(err.to_string()),
                    ..Default::default()
                });
                let retry_count = self.inner.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = self.inner.config.backoff_delay(retry_count);
                self.spawn_retry_timer(delay);
            }
        }
    }

    /// Wait for any in-flight flush to finish, then run one more. If the
    /// wait exceeds `force_flush_timeout`, skip the extra flush and persist
    /// the in-memory state instead so pending work is not lost.
    pub async fn force_flush(&self) {
        match tokio::time::timeout(
            self.inner.config.force_flush_timeout(),
            self.inner.flush_mutex.acquire(),
        )
        .await
        {
            Ok(guard) => {
                drop(guard);
                self.flush().await;
            }
            Err(_) => {
                if let Err(err) = self.persist_queue().await {
                    debug_eprintln!("force_flush persist-only path failed: {err:#}");
                }
            }
        }
    }

    fn cancel_pending_flush_timer(&self) {
        use crate::sync_ext::MutexExt;
        if let Some(handle) = self.inner.flush_timer_handle.lock_unpoisoned().take() {
            handle.abort();
        }
        self.inner.flush_timer_armed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn spawn_retry_timer(&self, delay: std::time::Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.is_shutting_down() {
                return;
            }
            this.flush().await;
        });
    }

    async fn run_flush_batch(&self) -> anyhow::Result<FlushOutcome> {
        let batch: Vec<EmbeddingItem> = {
            let queue = self.inner.queue.lock().await;
            queue.iter().take(self.inner.config.batch_size).cloned().collect()
        };

        if !self.inner.store.is_online() {
            self.run_offline_handler(&batch).await?;
            return Ok(FlushOutcome::Offline);
        }

        let total = batch.len();
        self.emit(ProgressEvent {
            phase: Some(ProgressPhase::Start),
            total: Some(total),
            ..Default::default()
        });

        let files: Vec<EmbeddingItem> =
            batch.iter().filter(|i| i.kind() == ItemKind::File).cloned().collect();
        let folders: Vec<EmbeddingItem> =
            batch.iter().filter(|i| i.kind() == ItemKind::Folder).cloned().collect();

        let worker = ParallelFlushWorker::new(&self.inner.config, &self.inner.progress);
        let mut processed = 0usize;
        let files_outcome = worker
            .process_files(&self.inner.store, &files, &mut processed, total)
            .await;
        let folders_outcome = worker
            .process_folders(&self.inner.store, &folders, &mut processed, total)
            .await;

        let failed_count = files_outcome.failed.len() + folders_outcome.failed.len();

        let mut removed_ids: HashSet<String> = HashSet::new();
        removed_ids.extend(files_outcome.succeeded_ids);
        removed_ids.extend(folders_outcome.succeeded_ids);

        for (item, error) in files_outcome.failed.into_iter().chain(folders_outcome.failed) {
            removed_ids.insert(item.id.clone());
            self.inner.failed.track_failed(item, error);
        }

        {
            let mut queue = self.inner.queue.lock().await;
            queue.retain(|it| !removed_ids.contains(&it.id));
        }

        self.persist_queue().await.context("persisting queue after flush")?;

        let due = self.inner.failed.take_due_retries();
        if !due.is_empty() {
            let mut queue = self.inner.queue.lock().await;
            for item in due.into_iter().rev() {
                queue.push_front(item);
            }
            drop(queue);
            self.persist_queue()
                .await
                .context("persisting queue after retry requeue")?;
        }

        let remaining = self.inner.queue.lock().await.len();
        if remaining > 0 {
            self.schedule_flush();
        }

        self.emit(ProgressEvent {
            phase: Some(ProgressPhase::Complete),
            total: Some(total),
            completed: Some(processed),
            failed: Some(failed_count),
            ..Default::default()
        });

        Ok(FlushOutcome::Completed)
    }

    async fn run_offline_handler(&self, batch: &[EmbeddingItem]) -> anyhow::Result<()> {
        let retry_count = self.inner.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ProgressEvent {
            phase: Some(ProgressPhase::Offline),
            retry_count: Some(retry_count),
            max_retries: Some(self.inner.config.max_retry_count),
            ..Default::default()
        });

        if retry_count >= self.inner.config.max_retry_count {
            let ids: HashSet<String> = batch.iter().map(|i| i.id.clone()).collect();
            {
                let mut queue = self.inner.queue.lock().await;
                queue.retain(|it| !ids.contains(&it.id));
            }
            for item in batch.iter().cloned() {
                self.inner.failed.divert(item, "Database offline");
            }
            self.inner.retry_count.store(0, Ordering::SeqCst);
            self.persist_queue().await.context("persisting queue after offline cap")?;
            self.emit(ProgressEvent {
                phase: Some(ProgressPhase::FatalError),
                error: Some("Database offline".to_string()),
                ..Default::default()
            });
        } else {
            let delay = self.inner.config.backoff_delay(retry_count);
            self.spawn_retry_timer(delay);
        }
        Ok(())
    }
}
