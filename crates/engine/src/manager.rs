// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! High-level configuration management
//!
//! The manager composes the journal, the snapshot store and an optional
//! signer into the public mutation and query surface. Writes per id are
//! totally ordered by the cache write lock, which is held across the whole
//! mutation including the cache update. The cache itself is a hot-path
//! accelerator only; reconstruction and direct version loads bypass it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use viracochan_core::{ChainError, Clock, Config, SystemClock};
use viracochan_signing::{SignError, Signer};
use viracochan_storage::journal::{self, Journal, JournalEntry, JournalError};
use viracochan_storage::{ConfigStore, Storage, StoreError};

/// Errors from manager operations
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no signer configured")]
    NoSigner,
    #[error("content encode error: {0}")]
    Content(#[from] serde_json::Error),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sign(#[from] SignError),
}

/// Construction options for [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Journal key within the storage backend
    pub journal_path: String,
    /// Snapshot key prefix
    pub snapshot_prefix: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            journal_path: "journal.jsonl".to_string(),
            snapshot_prefix: "configs".to_string(),
        }
    }
}

/// Configuration manager over a storage backend.
#[derive(Clone)]
pub struct Manager<C: Clock = SystemClock> {
    journal: Journal,
    snapshots: ConfigStore,
    signer: Option<Signer>,
    clock: C,
    cache: Arc<RwLock<HashMap<String, Config>>>,
}

impl Manager<SystemClock> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_options(storage, ManagerOptions::default())
    }

    pub fn with_options(storage: Arc<dyn Storage>, options: ManagerOptions) -> Self {
        Self {
            journal: Journal::new(Arc::clone(&storage), options.journal_path),
            snapshots: ConfigStore::new(storage, options.snapshot_prefix),
            signer: None,
            clock: SystemClock,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<C: Clock> Manager<C> {
    /// Sign every new version with `signer`.
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the clock (testing).
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Manager<C2> {
        Manager {
            journal: self.journal,
            snapshots: self.snapshots,
            signer: self.signer,
            clock,
            cache: self.cache,
        }
    }

    /// Create version 1 of a new configuration.
    ///
    /// A duplicate create for an existing id is not rejected here; it
    /// produces a second version-1 entry that surfaces as `MultipleHeads`
    /// at resequence time.
    pub async fn create<T: Serialize + ?Sized>(
        &self,
        id: &str,
        content: &T,
    ) -> Result<Config, ManagerError> {
        let mut cache = self.cache.write().await;

        let mut cfg = Config::new(content)?;
        cfg.update_meta(self.clock.now())?;
        self.sign(&mut cfg)?;
        self.persist(&mut cache, id, "create", cfg).await
    }

    /// Append a new version on top of the current latest.
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        id: &str,
        content: &T,
    ) -> Result<Config, ManagerError> {
        let mut cache = self.cache.write().await;

        let current = self.latest_locked(&mut cache, id).await?;
        let mut cfg = Config {
            meta: current.meta,
            content: serde_json::value::to_raw_value(content)?,
        };
        cfg.update_meta(self.clock.now())?;
        self.sign(&mut cfg)?;
        self.persist(&mut cache, id, "update", cfg).await
    }

    /// Load one specific version, bypassing the cache.
    pub async fn get(&self, id: &str, version: u64) -> Result<Config, ManagerError> {
        Ok(self.snapshots.load(id, version).await?)
    }

    /// Latest config for `id`: cache hit, or journal reconstruction.
    pub async fn get_latest(&self, id: &str) -> Result<Config, ManagerError> {
        {
            let cache = self.cache.read().await;
            if let Some(cfg) = cache.get(id) {
                return Ok(cfg.clone());
            }
        }
        let cfg = self.journal.reconstruct(id, &self.snapshots).await?;
        self.cache.write().await.insert(id.to_string(), cfg.clone());
        Ok(cfg)
    }

    /// All loadable snapshots for `id`, ascending by version.
    ///
    /// Best-effort: snapshots that fail to load are skipped so a partial
    /// history stays queryable.
    pub async fn get_history(&self, id: &str) -> Result<Vec<Config>, ManagerError> {
        let mut versions = self.snapshots.list_versions(id).await?;
        versions.sort_unstable();

        let mut configs = Vec::with_capacity(versions.len());
        for version in versions {
            match self.snapshots.load(id, version).await {
                Ok(cfg) => configs.push(cfg),
                Err(e) => {
                    tracing::warn!(%id, version, error = %e, "skipping unloadable snapshot")
                }
            }
        }
        Ok(configs)
    }

    /// Resequence and validate the journal chain for `id`.
    ///
    /// An empty journal is valid.
    pub async fn validate_chain(&self, id: &str) -> Result<(), ManagerError> {
        let entries = self.journal.entries_for(id).await?;
        if entries.is_empty() {
            return Ok(());
        }
        let ordered = journal::resequence(&entries)?;
        journal::validate_chain(&ordered)?;
        Ok(())
    }

    /// Force reconstruction from the journal, refreshing the cache.
    pub async fn reconstruct(&self, id: &str) -> Result<Config, ManagerError> {
        let mut cache = self.cache.write().await;
        let cfg = self.journal.reconstruct(id, &self.snapshots).await?;
        cache.insert(id.to_string(), cfg.clone());
        Ok(cfg)
    }

    /// Serialize the latest config in transport form.
    pub async fn export(&self, id: &str) -> Result<Vec<u8>, ManagerError> {
        let cfg = self.get_latest(id).await?;
        Ok(serde_json::to_vec_pretty(&cfg)?)
    }

    /// Import a transport-form config under `id`, preserving its meta
    /// verbatim; versions do not renumber. A version collision overwrites
    /// the snapshot and leaves a duplicate journal entry, detectable as a
    /// fork later.
    pub async fn import(&self, id: &str, data: &[u8]) -> Result<Config, ManagerError> {
        let mut cache = self.cache.write().await;

        let cfg: Config = serde_json::from_slice(data)?;
        cfg.validate()?;
        self.persist(&mut cache, id, "import", cfg).await
    }

    /// Extend the chain with the content of an earlier version.
    ///
    /// The target's content is carried forward under a fresh version on top
    /// of the current latest; no history is rewritten.
    pub async fn rollback(&self, id: &str, target_version: u64) -> Result<Config, ManagerError> {
        let mut cache = self.cache.write().await;

        let target = self.snapshots.load(id, target_version).await?;
        let latest = self.latest_locked(&mut cache, id).await?;

        let mut cfg = Config {
            meta: latest.meta,
            content: target.content,
        };
        cfg.update_meta(self.clock.now())?;
        self.sign(&mut cfg)?;
        self.persist(&mut cache, id, &format!("rollback_to_v{target_version}"), cfg)
            .await
    }

    /// Unique configuration ids, in first-seen journal order.
    pub async fn list(&self) -> Result<Vec<String>, ManagerError> {
        let entries = self.journal.read_all().await?;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for entry in entries {
            if seen.insert(entry.id.clone()) {
                ids.push(entry.id);
            }
        }
        Ok(ids)
    }

    /// Compact the journal.
    pub async fn compact(&self) -> Result<(), ManagerError> {
        let _cache = self.cache.write().await;
        self.journal.compact().await?;
        Ok(())
    }

    /// Verify a config's signature.
    pub fn verify(&self, cfg: &Config, public_key: &str) -> Result<(), ManagerError> {
        let signer = self.signer.as_ref().ok_or(ManagerError::NoSigner)?;
        signer.verify(cfg, public_key)?;
        Ok(())
    }

    /// Poll for new versions of `id` every `interval`.
    ///
    /// The state at subscription time is captured and suppressed; only
    /// strictly newer versions are emitted. Transient poll errors skip the
    /// tick. Cancelling the token (or dropping the receiver) stops the
    /// background task and closes the channel.
    pub async fn watch(
        &self,
        id: &str,
        interval: Duration,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Config> {
        let (tx, rx) = mpsc::channel(1);
        let initial_version = match self.get_latest(id).await {
            Ok(cfg) => cfg.meta.version,
            Err(_) => 0,
        };

        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let mut last_version = initial_version;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first interval tick completes immediately; swallow it so
            // polling starts one interval after subscription
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let cfg = match manager.get_latest(&id).await {
                            Ok(cfg) => cfg,
                            Err(e) => {
                                tracing::debug!(%id, error = %e, "watch poll failed");
                                continue;
                            }
                        };
                        if cfg.meta.version > last_version {
                            last_version = cfg.meta.version;
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = tx.send(cfg) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
        rx
    }

    fn sign(&self, cfg: &mut Config) -> Result<(), ManagerError> {
        if let Some(signer) = &self.signer {
            signer.sign(cfg)?;
        }
        Ok(())
    }

    async fn latest_locked(
        &self,
        cache: &mut HashMap<String, Config>,
        id: &str,
    ) -> Result<Config, ManagerError> {
        if let Some(cfg) = cache.get(id) {
            return Ok(cfg.clone());
        }
        let cfg = self.journal.reconstruct(id, &self.snapshots).await?;
        cache.insert(id.to_string(), cfg.clone());
        Ok(cfg)
    }

    async fn persist(
        &self,
        cache: &mut HashMap<String, Config>,
        id: &str,
        operation: &str,
        cfg: Config,
    ) -> Result<Config, ManagerError> {
        self.snapshots.save(id, &cfg).await?;
        self.journal
            .append(&JournalEntry::for_config(id, operation, &cfg))
            .await?;
        cache.insert(id.to_string(), cfg.clone());
        Ok(cfg)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
