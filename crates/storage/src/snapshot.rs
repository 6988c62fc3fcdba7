// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-version config snapshots
//!
//! One snapshot per `(id, version)` at `<prefix>/<id>/v<version>.json`,
//! written once and read many. The stored form is the ordinary
//! self-describing serialization; canonical bytes exist only inside the
//! checksum computation.

use crate::backend::{Storage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use viracochan_core::{ChainError, Config};

/// Errors from the snapshot store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no snapshot for {id}")]
    NotFound { id: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("snapshot decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Snapshot store over a storage backend.
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
    prefix: String,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str, version: u64) -> String {
        format!("{}/{}/v{}.json", self.prefix, id, version)
    }

    /// Write the snapshot for `cfg`'s version.
    pub async fn save(&self, id: &str, cfg: &Config) -> Result<(), StoreError> {
        let data = serde_json::to_vec(cfg)?;
        self.storage.write(&self.key(id, cfg.meta.version), &data).await?;
        Ok(())
    }

    /// Load one version.
    ///
    /// Snapshots with an empty `cs` are pre-hash staging records and are
    /// accepted without validation.
    pub async fn load(&self, id: &str, version: u64) -> Result<Config, StoreError> {
        let data = self.storage.read(&self.key(id, version)).await?;
        let cfg: Config = serde_json::from_slice(&data)?;
        if !cfg.meta.cs.is_empty() {
            cfg.validate()?;
        }
        Ok(cfg)
    }

    /// Versions with a snapshot on disk, in discovery order.
    pub async fn list_versions(&self, id: &str) -> Result<Vec<u64>, StoreError> {
        let prefix = format!("{}/{}", self.prefix, id);
        let paths = self.storage.list(&prefix).await?;
        Ok(paths.iter().filter_map(|p| parse_version(p)).collect())
    }

    /// Load the snapshot with the highest version.
    pub async fn load_latest(&self, id: &str) -> Result<Config, StoreError> {
        let versions = self.list_versions(id).await?;
        let latest = versions
            .into_iter()
            .max()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        self.load(id, latest).await
    }
}

/// Parse a version number out of a `v<digits>.json` basename.
fn parse_version(path: &str) -> Option<u64> {
    let base = path.rsplit('/').next()?;
    let digits = base.strip_prefix('v')?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
