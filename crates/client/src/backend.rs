// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend auth service: token refresh and login.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Default path of the refresh endpoint, relative to the API base URL.
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/token/refresh/";

/// Default path of the login endpoint, relative to the API base URL.
pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login/";

/// Boxed future returned by [`AuthBackend`] methods.
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenPair, AuthError>> + Send + 'a>>;

/// Tokens minted by the backend. `refresh: None` means the refresh token was
/// not rotated and the stored one stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

/// Login credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// The auth service the coordinator talks to.
pub trait AuthBackend: Send + Sync {
    /// Exchange a refresh token for a new access token.
    fn refresh(&self, refresh_token: String) -> AuthFuture<'_>;

    /// Exchange credentials for a fresh token pair.
    fn login(&self, credentials: Credentials) -> AuthFuture<'_>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Success body of both the login and refresh endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

/// Error body the backend may attach to a rejection.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// reqwest implementation of [`AuthBackend`].
pub struct HttpAuthBackend {
    base_url: String,
    refresh_path: String,
    login_path: String,
    client: reqwest::Client,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        crate::ensure_crypto();
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            client,
        }
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_for_tokens<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenPair, AuthError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| AuthError::Transport(format!("read body: {e}")))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(ErrorResponse { detail: Some(detail), .. }) => detail,
                Ok(ErrorResponse { code: Some(code), .. }) => code,
                _ => text,
            };
            return Err(AuthError::Rejected { status: status.as_u16(), message });
        }

        parse_token_response(&text)
    }
}

impl AuthBackend for HttpAuthBackend {
    fn refresh(&self, refresh_token: String) -> AuthFuture<'_> {
        Box::pin(async move {
            self.post_for_tokens(&self.refresh_path, &RefreshRequest { refresh: &refresh_token })
                .await
        })
    }

    fn login(&self, credentials: Credentials) -> AuthFuture<'_> {
        Box::pin(async move { self.post_for_tokens(&self.login_path, &credentials).await })
    }
}

/// Parse a `{ "access": ..., "refresh"?: ... }` body.
fn parse_token_response(body: &str) -> Result<TokenPair, AuthError> {
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::InvalidResponse(format!("parse response: {e}")))?;
    let access = token
        .access
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AuthError::InvalidResponse("response has no access token".into()))?;
    Ok(TokenPair { access, refresh: token.refresh.filter(|r| !r.is_empty()) })
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
