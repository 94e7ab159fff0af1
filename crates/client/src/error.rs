// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Failures of the token lifecycle: decoding, refresh, login, logout races.
///
/// Cloneable because a single refresh outcome is delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token could not be decoded. Treated exactly like an expired token.
    TokenMalformed(String),
    /// Backend explicitly rejected the refresh token or the login credentials.
    Rejected { status: u16, message: String },
    /// Network failure or timeout talking to the auth backend.
    Transport(String),
    /// Backend answered 2xx but the body was unusable (e.g. no access token).
    InvalidResponse(String),
    /// The session was logged out while the caller was waiting.
    SessionEnded,
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenMalformed(_) => "TOKEN_MALFORMED",
            Self::Rejected { .. } => "REFRESH_REJECTED",
            Self::Transport(_) => "REFRESH_TRANSPORT",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::SessionEnded => "SESSION_ENDED",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenMalformed(msg) => write!(f, "malformed token: {msg}"),
            Self::Rejected { status, message } => write!(f, "rejected ({status}): {message}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Self::SessionEnded => f.write_str("session ended"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Errors returned by [`crate::client::ApiClient`].
#[derive(Debug)]
pub enum ClientError {
    /// Network or request error.
    Request(String),
    /// Server returned a non-success status.
    Status { status: u16, message: String },
    /// A protected request was still unauthorized after one refresh-and-retry.
    RetryExhausted { message: String },
    /// Login or token handling failed.
    Auth(AuthError),
    /// Response body did not deserialize.
    Decode(String),
    /// Invalid client configuration.
    Configuration(String),
}

impl ClientError {
    /// Map a non-success response. A 401 on a request that was already
    /// retried once becomes [`ClientError::RetryExhausted`].
    pub fn from_status(status: reqwest::StatusCode, message: String, retried: bool) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED && retried {
            return Self::RetryExhausted { message };
        }
        Self::Status { status: status.as_u16(), message }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetryExhausted { .. } => Some(401),
            Self::Auth(AuthError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "request failed: {msg}"),
            Self::Status { status, message } => write!(f, "server error {status}: {message}"),
            Self::RetryExhausted { message } => {
                write!(f, "unauthorized after token refresh: {message}")
            }
            Self::Auth(e) => write!(f, "authentication failed: {e}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

impl From<AuthError> for ClientError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
