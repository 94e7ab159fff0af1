// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokenguard: authenticated HTTP client with single-flight token refresh.

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod persist;
pub mod recovery;
pub mod refresh;
pub mod store;
pub mod test_support;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
