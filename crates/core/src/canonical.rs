// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic encoding for checksums
//!
//! The canonical form is compact JSON with lexicographically sorted map
//! keys and wire-form timestamps. It exists only to be hashed; snapshots
//! and journal lines use the ordinary self-describing serialization.
//! Opaque content fragments are re-parsed and re-encoded here so that two
//! byte-different but semantically equal payloads hash identically.

use crate::config::Config;
use crate::value::Value;
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from canonical encoding
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unsupported map key: {0}")]
    UnsupportedKey(String),
    #[error("invalid content fragment: {0}")]
    InvalidFragment(#[source] serde_json::Error),
    #[error("serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Encode a value into its canonical byte form.
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(value).map_err(EncodeError::Serialize)
}

/// Lower an arbitrary field-tagged record into a `Value`.
///
/// Omit-if-empty fields are expressed with `skip_serializing_if` on the
/// record type and honored here. Mappings keyed by anything other than
/// strings fail with [`EncodeError::UnsupportedKey`].
pub fn to_value<T: Serialize>(record: &T) -> Result<Value, EncodeError> {
    let json = serde_json::to_value(record).map_err(|e| match e.classify() {
        serde_json::error::Category::Data => EncodeError::UnsupportedKey(e.to_string()),
        _ => EncodeError::Serialize(e),
    })?;
    Ok(Value::from_json(&json))
}

/// Re-parse an opaque pre-serialized fragment.
pub fn parse_fragment(raw: &RawValue) -> Result<Value, EncodeError> {
    Value::from_json_str(raw.get()).map_err(EncodeError::InvalidFragment)
}

/// Lower a config into the canonical envelope value.
///
/// `v`, `t` and `cs` are always present (`cs` may be the empty string when
/// cleared for hashing); `prev_cs` and `sig` are omitted when empty.
pub fn config_value(cfg: &Config) -> Result<Value, EncodeError> {
    let mut meta = BTreeMap::new();
    meta.insert("v".to_string(), Value::Uint(cfg.meta.version));
    meta.insert("t".to_string(), Value::Time(cfg.meta.time));
    if !cfg.meta.prev_cs.is_empty() {
        meta.insert("prev_cs".to_string(), Value::Str(cfg.meta.prev_cs.clone()));
    }
    meta.insert("cs".to_string(), Value::Str(cfg.meta.cs.clone()));
    if !cfg.meta.signature.is_empty() {
        meta.insert("sig".to_string(), Value::Str(cfg.meta.signature.clone()));
    }

    let mut root = BTreeMap::new();
    root.insert("_meta".to_string(), Value::Map(meta));
    root.insert("content".to_string(), parse_fragment(&cfg.content)?);
    Ok(Value::Map(root))
}

/// Canonical bytes of a config envelope.
pub fn config_bytes(cfg: &Config) -> Result<Vec<u8>, EncodeError> {
    encode(&config_value(cfg)?)
}

#[cfg(test)]
#[path = "canonical_tests.rs"]
mod tests;
