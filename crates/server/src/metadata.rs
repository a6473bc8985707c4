// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted session metadata.
//!
//! One JSON file holding an array of session records under the server data
//! directory. Writes go to a temp file in the same directory and rename over
//! the target, so readers never observe a torn file. A file that has grown
//! past the size ceiling is moved aside to `.bak` and the store restarts
//! empty rather than parsing unbounded input.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ceiling before backup-and-reset.
pub const MAX_FILE_BYTES: u64 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub created_at_ms: u64,
}

pub struct MetadataStore {
    path: PathBuf,
    lock: parking_lot::Mutex<()>,
}

impl MetadataStore {
    pub fn new(data_dir: &Path) -> Self {
        Self { path: data_dir.join("sessions.json"), lock: parking_lot::Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. Missing file means an empty store; an oversized
    /// file is backed up and reset; a corrupt file is reported and treated
    /// as empty without destroying the evidence.
    pub fn load_all(&self) -> Vec<SessionMeta> {
        let _guard = self.lock.lock();
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Vec<SessionMeta> {
        match std::fs::metadata(&self.path) {
            Err(_) => return Vec::new(),
            Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                let backup = self.path.with_extension("json.bak");
                warn!(path = %self.path.display(), bytes = meta.len(),
                    "session metadata file oversized; backing up and resetting");
                if let Err(e) = std::fs::rename(&self.path, &backup) {
                    warn!("failed to back up oversized metadata file: {e}");
                }
                return Vec::new();
            }
            Ok(_) => {}
        }
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read session metadata: {e}");
                return Vec::new();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), "corrupt session metadata ignored: {e}");
                Vec::new()
            }
        }
    }

    /// Insert or replace one record.
    pub fn upsert(&self, meta: SessionMeta) -> Result<(), String> {
        let _guard = self.lock.lock();
        let mut records = self.load_unlocked();
        match records.iter_mut().find(|r| r.id == meta.id) {
            Some(existing) => *existing = meta,
            None => records.push(meta),
        }
        self.write_unlocked(&records)
    }

    /// Remove one record by id. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> Result<(), String> {
        let _guard = self.lock.lock();
        let mut records = self.load_unlocked();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(());
        }
        self.write_unlocked(&records)
    }

    fn write_unlocked(&self, records: &[SessionMeta]) -> Result<(), String> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create data directory: {e}"))?;
        let encoded = serde_json::to_vec_pretty(records)
            .map_err(|e| format!("failed to encode session metadata: {e}"))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &encoded)
            .map_err(|e| format!("failed to write session metadata: {e}"))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| format!("failed to commit session metadata: {e}"))
    }
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
