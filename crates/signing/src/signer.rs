// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schnorr signing of config checkpoints
//!
//! Signatures are BIP-340 Schnorr over secp256k1: 32-byte hex x-only public
//! keys, 32-byte hex secret scalars, 64-byte hex signatures. The signed
//! message is SHA-256 of the binding string
//! `viracochan:v1:<cs>:<version>:<time>:<content-digest>`, where the content
//! digest covers the raw payload bytes as stored. A signature attests to
//! the exact bytes the signer saw, not to any re-serialization.

use chrono::{DateTime, Utc};
use secp256k1::schnorr::Signature;
use secp256k1::{All, Keypair, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;
use viracochan_core::{timefmt, ChainError, Config};

/// Errors from signing and verification
#[derive(Debug, Error)]
pub enum SignError {
    #[error("config has no checksum to sign")]
    MissingChecksum,
    #[error("config has no signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("signature verification failed at entry {index}: {source}")]
    Chain {
        index: usize,
        #[source]
        source: Box<SignError>,
    },
    #[error(transparent)]
    Invalid(#[from] ChainError),
}

fn verify_context() -> &'static Secp256k1<VerifyOnly> {
    static CTX: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();
    CTX.get_or_init(Secp256k1::verification_only)
}

/// The canonical string a signature binds to.
fn binding_string(cfg: &Config) -> String {
    let content_digest = Sha256::digest(cfg.content.get().as_bytes());
    format!(
        "viracochan:v1:{}:{}:{}:{}",
        cfg.meta.cs,
        cfg.meta.version,
        timefmt::format_rfc3339_nano(cfg.meta.time),
        hex::encode(content_digest)
    )
}

fn message_for(cfg: &Config) -> Message {
    let digest: [u8; 32] = Sha256::digest(binding_string(cfg).as_bytes()).into();
    Message::from_digest(digest)
}

/// A signing keypair.
#[derive(Clone)]
pub struct Signer {
    secp: Secp256k1<All>,
    keypair: Keypair,
    public_key: String,
}

impl Signer {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let public_key = hex::encode(keypair.x_only_public_key().0.serialize());
        Self {
            secp,
            keypair,
            public_key,
        }
    }

    /// Restore a signer from a 32-byte hex secret scalar.
    pub fn from_secret_hex(secret: &str) -> Result<Self, SignError> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_str(&secp, secret)
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let public_key = hex::encode(keypair.x_only_public_key().0.serialize());
        Ok(Self {
            secp,
            keypair,
            public_key,
        })
    }

    /// The x-only public key, hex encoded.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a checksummed config, storing the signature into its meta.
    pub fn sign(&self, cfg: &mut Config) -> Result<(), SignError> {
        if cfg.meta.cs.is_empty() {
            return Err(SignError::MissingChecksum);
        }
        let sig = self.secp.sign_schnorr(&message_for(cfg), &self.keypair);
        cfg.meta.signature = hex::encode(sig.serialize());
        Ok(())
    }

    /// Verify a config's signature under `public_key`.
    pub fn verify(&self, cfg: &Config, public_key: &str) -> Result<(), SignError> {
        verify_config(cfg, public_key)
    }
}

/// Verify a config's signature under a hex x-only public key.
pub fn verify_config(cfg: &Config, public_key: &str) -> Result<(), SignError> {
    if cfg.meta.signature.is_empty() {
        return Err(SignError::MissingSignature);
    }

    let sig_bytes = hex::decode(&cfg.meta.signature).map_err(|_| SignError::InvalidSignature)?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| SignError::InvalidSignature)?;

    let key_bytes = hex::decode(public_key).map_err(|e| SignError::InvalidKey(e.to_string()))?;
    let key =
        XOnlyPublicKey::from_slice(&key_bytes).map_err(|e| SignError::InvalidKey(e.to_string()))?;

    verify_context()
        .verify_schnorr(&sig, &message_for(cfg), &key)
        .map_err(|_| SignError::InvalidSignature)
}

/// Verify every signed entry of a chain; unsigned entries are skipped so
/// partially signed histories remain checkable.
pub fn verify_chain_signatures(configs: &[Config], public_key: &str) -> Result<(), SignError> {
    for (index, cfg) in configs.iter().enumerate() {
        if cfg.meta.signature.is_empty() {
            continue;
        }
        verify_config(cfg, public_key).map_err(|source| SignError::Chain {
            index,
            source: Box::new(source),
        })?;
    }
    Ok(())
}

/// A config paired with the signer that maintains it.
pub struct SignedConfig {
    config: Config,
    signer: Signer,
}

impl SignedConfig {
    pub fn new(config: Config, signer: Signer) -> Self {
        Self { config, signer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the content, stamp the next version, and re-sign.
    pub fn update(&mut self, content: Box<RawValue>, now: DateTime<Utc>) -> Result<(), SignError> {
        self.config.content = content;
        self.config.update_meta(now)?;
        self.signer.sign(&mut self.config)
    }

    pub fn verify(&self, public_key: &str) -> Result<(), SignError> {
        verify_config(&self.config, public_key)
    }
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;
