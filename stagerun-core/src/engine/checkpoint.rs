//! Directory-backed checkpoint store keyed by label.
//!
//! Each snapshot lives in `<dir>/<label>.json`; `checkpoints.json` keeps a
//! manifest with a content hash and size per label.

use crate::error::EngineError;
use crate::persistence::{atomic_write, atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const MANIFEST: &str = "checkpoints.json";

/// Manifest entry describing one stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub label: String,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint store rooted at a directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List stored checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointEntry>, EngineError> {
        Ok(load_json(&self.base_dir.join(MANIFEST))?.unwrap_or_default())
    }

    pub fn contains(&self, label: &str) -> Result<bool, EngineError> {
        Ok(self.list()?.iter().any(|c| c.label == label))
    }

    /// Store a snapshot under `label`, replacing any previous one.
    pub fn save<T: Serialize>(&self, label: &str, snapshot: &T) -> Result<CheckpointEntry, EngineError> {
        let payload = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.snapshot_path(label), &payload)?;

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        let entry = CheckpointEntry {
            label: label.to_string(),
            hash: format!("{:x}", hasher.finalize()),
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
        };

        let mut entries = self.list()?;
        entries.retain(|c| c.label != label);
        entries.push(entry.clone());
        atomic_write_json(&self.base_dir.join(MANIFEST), &entries)?;

        tracing::debug!(label, hash = %entry.hash, bytes = entry.size_bytes, "checkpoint written");
        Ok(entry)
    }

    /// Load the snapshot stored under `label`.
    pub fn load<T: DeserializeOwned>(&self, label: &str) -> Result<T, EngineError> {
        if !self.contains(label)? {
            return Err(EngineError::CheckpointNotFound {
                label: label.to_string(),
            });
        }
        load_json(&self.snapshot_path(label))?.ok_or_else(|| EngineError::CheckpointNotFound {
            label: label.to_string(),
        })
    }

    fn snapshot_path(&self, label: &str) -> PathBuf {
        self.base_dir.join(format!("{label}.json"))
    }
}
