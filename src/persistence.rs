//! Atomic load/persist helpers shared by the queue, the failed-item map and
//! the dead-letter store.
//!
//! Every write goes through a `<path>.tmp.<ts>` sibling file followed by an
//! `fs::rename` over the target, so a reader never observes a partially
//! written file. A file that fails to parse is quarantined by renaming it to
//! `<path>.corrupt.<unix_millis>` rather than being overwritten or deleted,
//! so a human can inspect what went wrong.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::debug_eprintln;

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn quarantine(path: &Path) {
    let dest = path.with_file_name(format!(
        "{}.corrupt.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        unix_millis()
    ));
    if let Err(err) = fs::rename(path, &dest) {
        debug_eprintln!(
            "failed to quarantine corrupt file {} -> {}: {err:#}",
            path.display(),
            dest.display()
        );
    } else {
        debug_eprintln!(
            "quarantined corrupt persisted file {} -> {}",
            path.display(),
            dest.display()
        );
    }
}

/// Load a persisted JSON value. Returns `Ok(None)` if the file does not
/// exist. A file that exists but fails to parse is quarantined and also
/// treated as absent, so callers can start from an empty state rather than
/// erroring out entirely.
pub(crate) fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", path.display()));
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            debug_eprintln!("corrupt persisted file {}: {err:#}", path.display());
            quarantine(path);
            Ok(None)
        }
    }
}

/// Atomically persist `value` as JSON at `path`. Writes to a uniquely named
/// temp sibling first so concurrent writers (unexpected, but cheap to guard
/// against) never clobber each other's temp file.
pub(crate) fn persist<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let tmp_path = tmp_sibling(path);
    let write_result = (|| -> Result<()> {
        let json = serde_json::to_vec_pretty(value).context("serializing persisted state")?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}

/// Remove the persisted file entirely, treating an already-absent file as
/// success. Used when a store empties out and should leave no file behind.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        unix_millis()
    ))
}
