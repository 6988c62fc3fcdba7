// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory storage backend

use crate::backend::{Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Map-backed storage for tests and ephemeral use.
///
/// Reads return copies, so callers can never mutate stored bytes in place.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.contains_key(path))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
