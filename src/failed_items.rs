//! Failed-item map and dead-letter queue, with backoff-gated retry and
//! capacity-pruned dead-letter storage.
//!
//! Grounded on the corpus's dead-letter queue pattern: a bounded ring of
//! failed operations guarded by a single lock, with an explicit statistics
//! snapshot and oldest-first pruning when the ring is full.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::Utc;

use crate::config::QueueConfig;
use crate::debug_eprintln;
use crate::model::{DeadLetterEntry, EmbeddingItem, FailedEntry, ItemKind};
use crate::persistence;
use crate::sync_ext::MutexExt;

/// Owns the failed-item map and the dead-letter queue for one
/// `EmbeddingQueue`. Both stores are private; callers only see the results
/// of the operations below and the snapshot accessors used by `get_stats`.
pub struct FailedItemsHandler {
    config: QueueConfig,
    failed: std::sync::Mutex<std::collections::HashMap<String, FailedEntry>>,
    dead_letter: std::sync::Mutex<VecDeque<DeadLetterEntry>>,
}

impl FailedItemsHandler {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            failed: std::sync::Mutex::new(std::collections::HashMap::new()),
            dead_letter: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        if let Some(failed) = persistence::load::<Vec<FailedEntry>>(&self.config.failed_path())? {
            let mut map = self.failed.lock_unpoisoned();
            for entry in failed {
                map.insert(entry.item.id.clone(), entry);
            }
        }
        if let Some(entries) =
            persistence::load::<Vec<DeadLetterEntry>>(&self.config.dead_letter_path())?
        {
            *self.dead_letter.lock_unpoisoned() = entries.into();
        }
        Ok(())
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock_unpoisoned().len()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letter.lock_unpoisoned().len()
    }

    /// Record a failed upsert attempt. Demotes the item to the dead-letter
    /// queue once its retry count exceeds `item_max_retries`.
    pub fn track_failed(&self, item: EmbeddingItem, error: impl Into<String>) {
        let error = error.into();
        let now = now_millis();
        let retry_count = {
            let mut map = self.failed.lock_unpoisoned();
            let entry = map
                .entry(item.id.clone())
                .and_modify(|e| {
                    e.retry_count += 1;
                    e.last_attempt = now;
                    e.error = error.clone();
                })
                .or_insert_with(|| FailedEntry {
                    item: item.clone(),
                    retry_count: 1,
                    last_attempt: now,
                    error: error.clone(),
                });
            entry.retry_count
        };

        if retry_count > self.config.item_max_retries {
            let mut map = self.failed.lock_unpoisoned();
            if let Some(entry) = map.remove(&item.id) {
                self.demote_to_dead_letter(entry.item, entry.error, entry.retry_count);
            }
        }

        if let Err(err) = self.persist_failed() {
            debug_eprintln!("failed to persist failed-item map: {err:#}");
        }
    }

    fn demote_to_dead_letter(&self, item: EmbeddingItem, error: String, retry_count: u32) {
        let item_id = item.id.clone();
        let item_type = item.kind();
        let entry = DeadLetterEntry {
            item,
            error,
            retry_count,
            failed_at: Utc::now().to_rfc3339(),
            item_id,
            item_type,
        };

        let mut queue = self.dead_letter.lock_unpoisoned();
        if queue.len() >= self.config.max_dead_letter_size {
            let drop_count = (self.config.max_dead_letter_size / 10).max(1);
            for _ in 0..drop_count {
                queue.pop_front();
            }
        }
        queue.push_back(entry);
        drop(queue);

        if let Err(err) = self.persist_dead_letter() {
            debug_eprintln!("failed to persist dead-letter queue: {err:#}");
        }
    }

    /// Backoff window for a failed-map entry: `base * 2^retry_count`,
    /// capped at `backoff_max_ms`. Distinct from `QueueConfig::backoff_delay`
    /// (used for flush-level retry scheduling), which shifts by
    /// `retry_count - 1` instead.
    fn retry_due_delay_ms(&self, retry_count: u32) -> i64 {
        let shift = retry_count.min(31);
        let scaled = self.config.backoff_base_ms.saturating_mul(1u64 << shift);
        scaled.min(self.config.backoff_max_ms) as i64
    }

    /// Sweep the failed map for entries whose backoff window has elapsed,
    /// and return the items that should be re-queued at the front.
    pub fn take_due_retries(&self) -> Vec<EmbeddingItem> {
        let now = now_millis();
        let mut map = self.failed.lock_unpoisoned();
        let due_ids: Vec<String> = map
            .iter()
            .filter(|(_, entry)| {
                let delay = self.retry_due_delay_ms(entry.retry_count);
                now - entry.last_attempt >= delay
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut items = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(entry) = map.remove(&id) {
                items.push(entry.item);
            }
        }
        drop(map);

        if !items.is_empty() {
            if let Err(err) = self.persist_failed() {
                debug_eprintln!("failed to persist failed-item map after retry sweep: {err:#}");
            }
        }
        items
    }

    pub fn dead_letter_entries(&self, limit: Option<usize>) -> Vec<DeadLetterEntry> {
        let queue = self.dead_letter.lock_unpoisoned();
        match limit {
            Some(n) => queue.iter().rev().take(n).cloned().collect(),
            None => queue.iter().cloned().collect(),
        }
    }

    pub fn clear_dead_letter(&self) -> Result<()> {
        self.dead_letter.lock_unpoisoned().clear();
        self.persist_dead_letter()
    }

    /// Move one dead-letter entry back to the main queue. Returns the item
    /// so the caller (the queue core) can re-enqueue it and schedule a flush.
    pub fn retry_dead_letter_item(&self, id: &str) -> Option<EmbeddingItem> {
        let mut queue = self.dead_letter.lock_unpoisoned();
        let pos = queue.iter().position(|e| e.item_id == id)?;
        let entry = queue.remove(pos)?;
        drop(queue);
        if let Err(err) = self.persist_dead_letter() {
            debug_eprintln!("failed to persist dead-letter queue after retry: {err:#}");
        }
        Some(entry.item)
    }

    /// Move every dead-letter entry back to the main queue.
    pub fn retry_all_dead_letter(&self) -> Vec<EmbeddingItem> {
        let mut queue = self.dead_letter.lock_unpoisoned();
        let items: Vec<EmbeddingItem> = queue.drain(..).map(|e| e.item).collect();
        drop(queue);
        if let Err(err) = self.persist_dead_letter() {
            debug_eprintln!("failed to persist dead-letter queue after retry_all: {err:#}");
        }
        items
    }

    /// Move an item directly to the failed map with a fixed reason, e.g.
    /// from queue-overflow backpressure or an offline-exhausted batch.
    pub fn divert(&self, item: EmbeddingItem, reason: impl Into<String>) {
        self.track_failed(item, reason);
    }

    pub fn remove_by_ids(&self, ids: &std::collections::HashSet<String>) -> usize {
        let mut map = self.failed.lock_unpoisoned();
        let before = map.len();
        map.retain(|id, _| !ids.contains(id));
        let removed = before - map.len();
        drop(map);
        if removed > 0 {
            if let Err(err) = self.persist_failed() {
                debug_eprintln!("failed to persist failed-item map after removal: {err:#}");
            }
        }
        removed
    }

    /// Rewrite `id`/`meta.path`/`meta.name` for matching entries in the
    /// failed map. Returns the number of entries changed.
    pub fn rename_path(&self, old_path: &str, new_path: &str) -> usize {
        let old_file = format!("file:{old_path}");
        let old_image = format!("image:{old_path}");
        let mut map = self.failed.lock_unpoisoned();
        let matching: Vec<String> = map
            .keys()
            .filter(|id| id.as_str() == old_file || id.as_str() == old_image)
            .cloned()
            .collect();

        let mut changed = 0;
        for old_id in matching {
            if let Some(mut entry) = map.remove(&old_id) {
                let new_id = if old_id == old_file {
                    format!("file:{new_path}")
                } else {
                    format!("image:{new_path}")
                };
                entry.item.id = new_id.clone();
                entry.item.set_meta_path(new_path);
                if let Some(name) = std::path::Path::new(new_path)
                    .file_name()
                    .and_then(|n| n.to_str())
                {
                    entry.item.set_meta_name(name);
                }
                map.insert(new_id, entry);
                changed += 1;
            }
        }
        drop(map);
        if changed > 0 {
            if let Err(err) = self.persist_failed() {
                debug_eprintln!("failed to persist failed-item map after rename: {err:#}");
            }
        }
        changed
    }

    pub fn persist_all(&self) -> Result<()> {
        self.persist_failed()?;
        self.persist_dead_letter()?;
        Ok(())
    }

    fn persist_failed(&self) -> Result<()> {
        let map = self.failed.lock_unpoisoned();
        if map.is_empty() {
            drop(map);
            return persistence::remove_if_exists(&self.config.failed_path());
        }
        let entries: Vec<&FailedEntry> = map.values().collect();
        persistence::persist(&self.config.failed_path(), &entries)
    }

    fn persist_dead_letter(&self) -> Result<()> {
        let queue = self.dead_letter.lock_unpoisoned();
        if queue.is_empty() {
            drop(queue);
            return persistence::remove_if_exists(&self.config.dead_letter_path());
        }
        let entries: Vec<&DeadLetterEntry> = queue.iter().collect();
        persistence::persist(&self.config.dead_letter_path(), &entries)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
