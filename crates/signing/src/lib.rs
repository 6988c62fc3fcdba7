// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! viracochan-signing: Schnorr signatures over config chain checkpoints

pub mod signer;

pub use signer::{verify_chain_signatures, verify_config, SignError, SignedConfig, Signer};
