// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only change journal
//!
//! One line-delimited record per mutation, across all configuration ids.
//! Entries are never rewritten in place: append extends the file and
//! compaction replaces it wholesale. From any surviving set of entries the
//! unique valid chain per id can be rebuilt by checksum linkage alone;
//! file order is a convenience, not a requirement.

use crate::backend::{Storage, StorageError};
use crate::snapshot::{ConfigStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use viracochan_core::{ChainError, Config};

/// Entries kept per id when compaction can resequence its chain.
/// The bounded tail preserves a local rollback window; the constant is part
/// of the contract.
const COMPACT_KEEP: usize = 10;

/// Errors from journal operations
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("corrupt journal entry at line {line}: {source}")]
    CorruptEntry {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("multiple chain heads")]
    MultipleHeads,
    #[error("no chain head")]
    NoHead,
    #[error("fork detected at version {version}")]
    Fork { version: u64 },
    #[error("incomplete chain: ordered {found} of {expected} entries")]
    IncompleteChain { found: usize, expected: usize },
    #[error("invalid chain at entry {index}: {source}")]
    Chain {
        index: usize,
        #[source]
        source: ChainError,
    },
    #[error("entry {index} checksum does not match embedded config")]
    EntryMismatch { index: usize },
    #[error("journal entry encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A single change record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    #[serde(rename = "v")]
    pub version: u64,
    pub cs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_cs: String,
    #[serde(rename = "t", with = "viracochan_core::timefmt::rfc3339")]
    pub time: DateTime<Utc>,
    #[serde(rename = "op")]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
}

impl JournalEntry {
    /// Record a mutation of `cfg`, embedding the config for journal-only
    /// recovery.
    pub fn for_config(id: impl Into<String>, operation: impl Into<String>, cfg: &Config) -> Self {
        Self {
            id: id.into(),
            version: cfg.meta.version,
            cs: cfg.meta.cs.clone(),
            prev_cs: cfg.meta.prev_cs.clone(),
            time: cfg.meta.time,
            operation: operation.into(),
            config: Some(cfg.clone()),
        }
    }

    /// Entry-level chain invariants against the immediate predecessor.
    fn follows(&self, prev: &JournalEntry) -> Result<(), ChainError> {
        if self.version != prev.version + 1 {
            return Err(ChainError::VersionBreak {
                prev: prev.version,
                next: self.version,
            });
        }
        if self.prev_cs != prev.cs {
            return Err(ChainError::ChainBreak {
                prev_cs: self.prev_cs.clone(),
                cs: prev.cs.clone(),
            });
        }
        if self.time < prev.time {
            return Err(ChainError::TimestampRegression {
                prev: prev.time,
                next: self.time,
            });
        }
        Ok(())
    }
}

/// Append-only journal over a storage key.
#[derive(Clone)]
pub struct Journal {
    storage: Arc<dyn Storage>,
    path: String,
    lock: Arc<Mutex<()>>,
}

impl Journal {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append one entry.
    ///
    /// Read-modify-write against the whole key; a missing trailing newline
    /// in the existing content is repaired first. The storage backend's
    /// whole-object replace is the atomicity boundary.
    pub async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let _guard = self.lock.lock().await;

        let mut data = match self.storage.read(&self.path).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !data.is_empty() && !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        data.extend_from_slice(&serde_json::to_vec(entry)?);
        data.push(b'\n');

        self.storage.write(&self.path, &data).await?;
        Ok(())
    }

    /// Read every entry in file order.
    pub async fn read_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self.lock.lock().await;
        self.read_entries().await
    }

    /// All entries for one configuration id, in file order.
    pub async fn entries_for(&self, id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| e.id == id);
        Ok(entries)
    }

    /// Rewrite the journal, trimming each id's chain to its tail.
    ///
    /// Ids whose entries resequence keep their last [`COMPACT_KEEP`]
    /// entries. Ids that fail to resequence keep everything verbatim; a
    /// broken chain is evidence, not garbage.
    pub async fn compact(&self) -> Result<(), JournalError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await?;
        if entries.is_empty() {
            return Ok(());
        }
        let before = entries.len();

        // group by id, preserving first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut by_id: HashMap<String, Vec<JournalEntry>> = HashMap::new();
        for entry in entries {
            if !by_id.contains_key(&entry.id) {
                order.push(entry.id.clone());
            }
            by_id.entry(entry.id.clone()).or_default().push(entry);
        }

        let mut compacted = Vec::new();
        for id in order {
            let Some(group) = by_id.remove(&id) else {
                continue;
            };
            match resequence(&group) {
                Ok(ordered) => {
                    let skip = ordered.len().saturating_sub(COMPACT_KEEP);
                    compacted.extend(ordered.into_iter().skip(skip));
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "keeping unresequencable entries verbatim");
                    compacted.extend(group);
                }
            }
        }

        let mut data = Vec::new();
        for entry in &compacted {
            data.extend_from_slice(&serde_json::to_vec(entry)?);
            data.push(b'\n');
        }
        self.storage.write(&self.path, &data).await?;

        tracing::info!(before, after = compacted.len(), "journal compacted");
        Ok(())
    }

    /// Rebuild the latest config for `id` from the journal and scattered
    /// snapshots.
    ///
    /// No journal entries at all falls through to the latest snapshot.
    /// Otherwise the entries are resequenced and validated, and the tail's
    /// embedded config (or its snapshot) is returned.
    pub async fn reconstruct(
        &self,
        id: &str,
        snapshots: &ConfigStore,
    ) -> Result<Config, JournalError> {
        let entries = self.entries_for(id).await?;
        if entries.is_empty() {
            return Ok(snapshots.load_latest(id).await?);
        }

        let ordered = resequence(&entries)?;
        validate_chain(&ordered)?;

        let tail = &ordered[ordered.len() - 1];
        match &tail.config {
            Some(cfg) => Ok(cfg.clone()),
            None => Ok(snapshots.load(id, tail.version).await?),
        }
    }

    async fn read_entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let data = match self.storage.read(&self.path).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        parse_entries(&data)
    }
}

fn parse_entries(data: &[u8]) -> Result<Vec<JournalEntry>, JournalError> {
    let text = String::from_utf8_lossy(data);
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line)
            .map_err(|source| JournalError::CorruptEntry { line: idx + 1, source })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Rebuild the unique valid order of a scattered set of entries for one id.
///
/// The head is the single entry whose `prev_cs` is empty or names a
/// checksum outside the input; the rest follow by `prev_cs` linkage. Any
/// ambiguity is an error, never a guess.
pub fn resequence(entries: &[JournalEntry]) -> Result<Vec<JournalEntry>, JournalError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let mut known: HashSet<&str> = HashSet::with_capacity(entries.len());
    let mut successors: HashMap<&str, Vec<&JournalEntry>> = HashMap::with_capacity(entries.len());
    for entry in entries {
        if entry.cs.is_empty() {
            continue;
        }
        known.insert(entry.cs.as_str());
        successors.entry(entry.prev_cs.as_str()).or_default().push(entry);
    }

    let mut head: Option<&JournalEntry> = None;
    for entry in entries {
        if entry.prev_cs.is_empty() || !known.contains(entry.prev_cs.as_str()) {
            if head.is_some() {
                return Err(JournalError::MultipleHeads);
            }
            head = Some(entry);
        }
    }
    let Some(head) = head else {
        return Err(JournalError::NoHead);
    };

    let mut ordered = vec![head.clone()];
    let mut current = head;
    loop {
        let nexts = successors.get(current.cs.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        match nexts {
            [] => break,
            [next] => {
                ordered.push((*next).clone());
                current = *next;
            }
            _ => {
                return Err(JournalError::Fork {
                    version: current.version,
                })
            }
        }
    }

    if ordered.len() != entries.len() {
        return Err(JournalError::IncompleteChain {
            found: ordered.len(),
            expected: entries.len(),
        });
    }
    Ok(ordered)
}

/// Verify chain invariants over an already-ordered run of entries.
///
/// Embedded configs must validate on their own and agree with the entry's
/// checksum; adjacent pairs must satisfy the Meta chain rules.
pub fn validate_chain(entries: &[JournalEntry]) -> Result<(), JournalError> {
    for (index, entry) in entries.iter().enumerate() {
        if let Some(cfg) = &entry.config {
            cfg.validate()
                .map_err(|source| JournalError::Chain { index, source })?;
            if entry.cs != cfg.meta.cs {
                return Err(JournalError::EntryMismatch { index });
            }
        }
        if index > 0 {
            entry
                .follows(&entries[index - 1])
                .map_err(|source| JournalError::Chain { index, source })?;
        }
    }
    Ok(())
}

/// Streaming cursor over a journal key.
///
/// Re-reads the key on each call, so it observes appends made after it was
/// created. `next` yields `None` at end of input.
pub struct JournalReader {
    storage: Arc<dyn Storage>,
    path: String,
    offset: usize,
}

impl JournalReader {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            offset: 0,
        }
    }

    /// Read the next entry, if any.
    pub async fn next(&mut self) -> Result<Option<JournalEntry>, JournalError> {
        let data = match self.storage.read(&self.path).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while self.offset < data.len() {
            let rest = &data[self.offset..];
            let end = rest
                .iter()
                .position(|b| *b == b'\n')
                .unwrap_or(rest.len());
            let line = String::from_utf8_lossy(&rest[..end]);
            let line_no = data[..self.offset].iter().filter(|b| **b == b'\n').count() + 1;
            self.offset += end + 1;

            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line)
                .map_err(|source| JournalError::CorruptEntry { line: line_no, source })?;
            return Ok(Some(entry));
        }
        Ok(None)
    }

    /// Rewind to the beginning of the journal.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
