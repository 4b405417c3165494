//! The external vector-store contract (§6.3) and the reshaping of queued
//! items into the wire shapes each upsert path expects.
//!
//! A store is free to implement either the bulk or the per-item methods (or
//! both); the flush worker only calls the bulk entry point and falls back to
//! per-item on failure, so a minimal store only needs the per-item methods.
//! Implementations may fail by returning a structured `UpsertOutcome::failure`
//! or by returning `Err`; the flush worker normalizes both to the same
//! failure shape, so a store author does not need to pick one discipline.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::EmbeddingItem;

/// Wire shape for a file/image upsert: `{id, vector, meta, model, updated_at}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileUpsertItem {
    pub id: String,
    pub vector: Vec<f64>,
    pub meta: HashMap<String, Value>,
    pub model: String,
    pub updated_at: i64,
}

/// Wire shape for a folder upsert: `{id, vector, name, path, model, updated_at}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FolderUpsertItem {
    pub id: String,
    pub vector: Vec<f64>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub model: String,
    pub updated_at: i64,
}

impl From<&EmbeddingItem> for FileUpsertItem {
    fn from(item: &EmbeddingItem) -> Self {
        Self {
            id: item.id.clone(),
            vector: item.vector.clone(),
            meta: item.meta.clone(),
            model: item.model.clone(),
            updated_at: item.updated_at,
        }
    }
}

impl From<&EmbeddingItem> for FolderUpsertItem {
    fn from(item: &EmbeddingItem) -> Self {
        Self {
            id: item.id.clone(),
            vector: item.vector.clone(),
            name: item.meta.get("name").and_then(Value::as_str).map(str::to_owned),
            path: item.meta.get("path").and_then(Value::as_str).map(str::to_owned),
            model: item.model.clone(),
            updated_at: item.updated_at,
        }
    }
}

/// Outcome of a bulk or per-item upsert call. A store may report a
/// structured failure here instead of raising; the worker treats both the
/// same way.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl UpsertOutcome {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// The remote vector database the queue flushes into.
///
/// Implementations decide whether `batch_upsert_files`/`batch_upsert_folders`
/// are real bulk calls or simply loop over `upsert_file`/`upsert_folder`;
/// either is a legitimate implementation of this contract.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent connection setup. May be called more than once.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Whether the store is currently reachable. Checked before every flush
    /// attempt; a `false` value routes the batch to the offline handler
    /// without attempting any upsert.
    fn is_online(&self) -> bool;

    async fn batch_upsert_files(&self, items: &[FileUpsertItem]) -> anyhow::Result<UpsertOutcome>;
    async fn batch_upsert_folders(&self, items: &[FolderUpsertItem]) -> anyhow::Result<UpsertOutcome>;

    async fn upsert_file(&self, item: &FileUpsertItem) -> anyhow::Result<UpsertOutcome>;
    async fn upsert_folder(&self, item: &FolderUpsertItem) -> anyhow::Result<UpsertOutcome>;
}
