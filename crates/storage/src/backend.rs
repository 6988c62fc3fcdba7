// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstract key/bytes storage
//!
//! Keys are `/`-separated strings. Writes are whole-object replace; the
//! journal and snapshot layers rely on that as their atomicity boundary.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend for filesystem-like key/bytes operations
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the full object at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Replace the object at `path`.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// List keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete the object at `path`. Deleting a missing key succeeds.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Check whether `path` holds an object.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}
