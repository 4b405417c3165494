//! Data types shared across the queue, the failed-item handler, and the
//! flush worker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which upsert path an item's id prefix routes it to.
///
/// Routing is a thin tagged union over the id prefix: `folder:` -> folder
/// upsert, `file:`/`image:` -> file upsert. `image:` ids are intentionally
/// routed the same way as `file:` ids (see DESIGN.md open-question log).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Classify an item id by its prefix. Anything without a recognized
    /// `folder:` prefix is treated as a file (covers `file:` and `image:`).
    pub fn of_id(id: &str) -> Self {
        if id.starts_with("folder:") {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }
}

/// A single embedding record awaiting upsert to the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingItem {
    pub id: String,
    pub vector: Vec<f64>,
    pub model: String,
    pub updated_at: i64,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

impl EmbeddingItem {
    pub fn kind(&self) -> ItemKind {
        ItemKind::of_id(&self.id)
    }

    /// `meta.path`/`meta.name`-bearing items only; folders are addressed by
    /// `id` alone and never carry a filesystem path.
    pub fn meta_path(&self) -> Option<&str> {
        self.meta.get("path").and_then(Value::as_str)
    }

    pub fn set_meta_path(&mut self, path: &str) {
        self.meta
            .insert("path".to_string(), Value::String(path.to_string()));
    }

    pub fn set_meta_name(&mut self, name: &str) {
        self.meta
            .insert("name".to_string(), Value::String(name.to_string()));
    }
}

/// An item that failed at least once and is being retried with backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub item: EmbeddingItem,
    pub retry_count: u32,
    pub last_attempt: i64,
    pub error: String,
}

/// A permanently failed item, retained for manual inspection/requeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub item: EmbeddingItem,
    pub error: String,
    pub retry_count: u32,
    pub failed_at: String,
    pub item_id: String,
    pub item_type: ItemKind,
}

/// Coarse health classification derived from queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    Healthy,
    Warning,
    Critical,
}

/// A point-in-time snapshot of queue occupancy and activity.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub capacity_percent: f64,
    pub health: QueueHealth,
    pub is_flushing: bool,
    pub retry_count: u32,
    pub failed_count: usize,
    pub dead_letter_count: usize,
    pub high_watermark_armed: bool,
    pub critical_watermark_armed: bool,
    pub initialized: bool,
}

/// A phase of queue activity reported to progress subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Start,
    Processing,
    Complete,
    Offline,
    Error,
    FatalError,
    FlushingEmbeddings,
}

/// A single progress notification. Only the fields relevant to `phase` are
/// populated; the rest are left at their default.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressEvent {
    pub phase: Option<ProgressPhase>,
    pub total: Option<usize>,
    pub completed: Option<usize>,
    pub failed: Option<usize>,
    pub percent: Option<f64>,
    pub queue_remaining: Option<usize>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub item_type: Option<ItemKind>,
    pub current_item: Option<String>,
    pub duration: Option<f64>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn phase(phase: ProgressPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}
