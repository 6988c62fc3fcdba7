// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned configuration records
//!
//! A `Config` is an opaque payload plus `Meta`, the integrity metadata that
//! chains it to its predecessor. The checksum covers the canonical envelope
//! with `cs` and `sig` cleared, concatenated with the wire timestamp string.
//! The timestamp appears in both halves of that input; stored checksums
//! depend on it, so the doubling is part of the format.

use crate::canonical::{self, EncodeError};
use crate::timefmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from checksum and chain validation
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("checksum mismatch: stored={stored} computed={computed}")]
    ChecksumMismatch { stored: String, computed: String },
    #[error("version break: {prev} -> {next}")]
    VersionBreak { prev: u64, next: u64 },
    #[error("chain break: prev_cs={prev_cs} != predecessor cs={cs}")]
    ChainBreak { prev_cs: String, cs: String },
    #[error("timestamp regression: {next} < {prev}")]
    TimestampRegression {
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Versioning and integrity metadata for a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "v")]
    pub version: u64,
    #[serde(rename = "t", with = "crate::timefmt::rfc3339")]
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_cs: String,
    pub cs: String,
    #[serde(rename = "sig", default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: 0,
            time: DateTime::UNIX_EPOCH,
            prev_cs: String::new(),
            cs: String::new(),
            signature: String::new(),
        }
    }
}

/// A configuration: opaque content plus chain metadata.
///
/// `content` keeps the exact payload bytes it was built or parsed from;
/// signatures bind to those bytes, not to any re-serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: Meta,
    pub content: Box<RawValue>,
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.content.get() == other.content.get()
    }
}

impl Config {
    /// Build a not-yet-versioned config (version 0) from a payload.
    pub fn new<T: Serialize + ?Sized>(content: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            meta: Meta::default(),
            content: serde_json::value::to_raw_value(content)?,
        })
    }

    /// Compute the checksum of this config.
    pub fn checksum(&self) -> Result<String, EncodeError> {
        let mut cleared = self.clone();
        cleared.meta.cs.clear();
        cleared.meta.signature.clear();

        let mut buf = canonical::config_bytes(&cleared)?;
        buf.extend_from_slice(timefmt::format_rfc3339_nano(cleared.meta.time).as_bytes());
        Ok(hex::encode(Sha256::digest(&buf)))
    }

    /// Recompute the checksum and verify it against the stored one.
    pub fn validate(&self) -> Result<(), ChainError> {
        let computed = self.checksum()?;
        if computed != self.meta.cs {
            return Err(ChainError::ChecksumMismatch {
                stored: self.meta.cs.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Stamp this config as the next version in its chain.
    ///
    /// Bumps the version, shifts the current checksum into `prev_cs`,
    /// clears the signature, and recomputes `cs` at `now` (truncated to
    /// microseconds). A fresh version-0 config lands on version 1 with an
    /// empty `prev_cs`.
    pub fn update_meta(&mut self, now: DateTime<Utc>) -> Result<(), ChainError> {
        self.meta.time = timefmt::truncate_us(now);
        self.meta.version += 1;
        self.meta.prev_cs = std::mem::take(&mut self.meta.cs);
        self.meta.signature.clear();
        self.meta.cs = self.checksum()?;
        Ok(())
    }

    /// Check that `self` is the immediate successor of `prev`.
    pub fn next_of(&self, prev: &Config) -> Result<(), ChainError> {
        prev.validate()?;
        self.validate()?;

        if self.meta.version != prev.meta.version + 1 {
            return Err(ChainError::VersionBreak {
                prev: prev.meta.version,
                next: self.meta.version,
            });
        }
        if self.meta.prev_cs != prev.meta.cs {
            return Err(ChainError::ChainBreak {
                prev_cs: self.meta.prev_cs.clone(),
                cs: prev.meta.cs.clone(),
            });
        }
        if self.meta.time < prev.meta.time {
            return Err(ChainError::TimestampRegression {
                prev: prev.meta.time,
                next: self.meta.time,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
