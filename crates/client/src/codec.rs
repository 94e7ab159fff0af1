// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token expiry decoding.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload's
//! `exp` claim is read; signatures are the backend's business.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::AuthError;

/// Buffer applied to access tokens right before use.
pub const DEFAULT_ACCESS_BUFFER: Duration = Duration::from_secs(30);

/// Buffer applied by the proactive background refresh.
pub const DEFAULT_BACKGROUND_BUFFER: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct Claims {
    exp: u64,
}

/// Decode the `exp` claim (seconds since epoch).
pub fn expiry(token: &str) -> Result<u64, AuthError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::TokenMalformed("expected three dot-separated segments".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::TokenMalformed(format!("payload: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::TokenMalformed(format!("claims: {e}")))?;
    Ok(claims.exp)
}

/// True when the token is present, decodable and `exp > now + buffer`.
pub fn is_valid(token: Option<&str>, buffer: Duration) -> bool {
    is_valid_at(token, buffer, epoch_secs())
}

/// [`is_valid`] against an explicit clock.
pub fn is_valid_at(token: Option<&str>, buffer: Duration, now_secs: u64) -> bool {
    let Some(token) = token else {
        return false;
    };
    match expiry(token) {
        Ok(exp) => exp > now_secs.saturating_add(buffer.as_secs()),
        Err(_) => false,
    }
}

/// Current time in seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
