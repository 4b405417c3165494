//! Tuning for a single queue instance, matching §6.4's enumerated keys.
//!
//! Every field carries a `#[serde(default = ...)]` function so a host can
//! deserialize a partial config over the documented defaults, the same
//! pattern the corpus uses for its own settings structs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_batch_size() -> usize {
    100
}
fn default_flush_delay_ms() -> u64 {
    250
}
fn default_max_queue_size() -> usize {
    10_000
}
fn default_high_watermark() -> f64 {
    0.75
}
fn default_critical_watermark() -> f64 {
    0.90
}
fn default_max_retry_count() -> u32 {
    5
}
fn default_item_max_retries() -> u32 {
    5
}
fn default_max_dead_letter_size() -> usize {
    1_000
}
fn default_parallel_flush_concurrency() -> usize {
    4
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_mutex_acquire_ms() -> u64 {
    30_000
}
fn default_batch_embedding_max_ms() -> u64 {
    5 * 60_000
}
fn default_embedding_request_ms() -> u64 {
    30_000
}
fn default_persist_debounce_ms() -> u64 {
    500
}
fn default_force_flush_timeout_ms() -> u64 {
    30_000
}

/// Tuning knobs for one `EmbeddingQueue`. Two queues in the same process
/// (e.g. an analysis-stage queue and an organize-stage queue) may each hold
/// their own `QueueConfig` with independent paths and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory the three persistence files live in. The crate does not
    /// resolve an OS-specific user-data directory itself; the host supplies
    /// it (see SPEC_FULL.md Non-goals).
    pub data_dir: PathBuf,

    /// Filename stem for the main queue file, e.g. `pending_embeddings`.
    /// Stage queues pass a stem suffixed with their stage name, e.g.
    /// `pending_embeddings_organize`; the failed-items and dead-letter files
    /// carry the same stage suffix so each stage's state stays isolated.
    #[serde(default = "default_stem")]
    pub file_stem: String,
    #[serde(default)]
    pub stage: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,
    #[serde(default = "default_critical_watermark")]
    pub critical_watermark: f64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_item_max_retries")]
    pub item_max_retries: u32,
    #[serde(default = "default_max_dead_letter_size")]
    pub max_dead_letter_size: usize,
    #[serde(default = "default_parallel_flush_concurrency")]
    pub parallel_flush_concurrency: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_mutex_acquire_ms")]
    pub mutex_acquire_ms: u64,
    #[serde(default = "default_batch_embedding_max_ms")]
    pub batch_embedding_max_ms: u64,
    #[serde(default = "default_embedding_request_ms")]
    pub embedding_request_ms: u64,
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    #[serde(default = "default_force_flush_timeout_ms")]
    pub force_flush_timeout_ms: u64,
}

fn default_stem() -> String {
    "pending_embeddings".to_string()
}

impl QueueConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_stem: default_stem(),
            stage: None,
            batch_size: default_batch_size(),
            flush_delay_ms: default_flush_delay_ms(),
            max_queue_size: default_max_queue_size(),
            high_watermark: default_high_watermark(),
            critical_watermark: default_critical_watermark(),
            max_retry_count: default_max_retry_count(),
            item_max_retries: default_item_max_retries(),
            max_dead_letter_size: default_max_dead_letter_size(),
            parallel_flush_concurrency: default_parallel_flush_concurrency(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            mutex_acquire_ms: default_mutex_acquire_ms(),
            batch_embedding_max_ms: default_batch_embedding_max_ms(),
            embedding_request_ms: default_embedding_request_ms(),
            persist_debounce_ms: default_persist_debounce_ms(),
            force_flush_timeout_ms: default_force_flush_timeout_ms(),
        }
    }

    pub fn with_stage(mut self, stage: &str) -> Self {
        self.file_stem = format!("{}_{stage}", default_stem());
        self.stage = Some(stage.to_string());
        self
    }

    fn suffixed(&self, base: &str) -> PathBuf {
        match &self.stage {
            Some(stage) => self.data_dir.join(format!("{base}_{stage}.json")),
            None => self.data_dir.join(format!("{base}.json")),
        }
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.file_stem))
    }

    pub fn failed_path(&self) -> PathBuf {
        self.suffixed("failed_embeddings")
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.suffixed("dead_letter_embeddings")
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn mutex_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.mutex_acquire_ms)
    }

    pub fn batch_embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_embedding_max_ms)
    }

    pub fn embedding_request_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_request_ms)
    }

    pub fn force_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.force_flush_timeout_ms)
    }

    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let shift = retry_count.saturating_sub(1).min(31);
        let scaled = self.backoff_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(scaled.min(self.backoff_max_ms))
    }

    pub fn high_watermark_len(&self) -> usize {
        (self.max_queue_size as f64 * self.high_watermark) as usize
    }

    pub fn critical_watermark_len(&self) -> usize {
        (self.max_queue_size as f64 * self.critical_watermark) as usize
    }
}
