// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outgoing request description and the pre-flight bearer decision.

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};

use crate::coordinator::RefreshCoordinator;

/// Per-request auth annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// The request talks to the auth service itself (login, refresh).
    pub auth_endpoint: bool,
    /// Caller handles 401 itself: no refresh, no logout.
    pub skip_auth_redirect: bool,
    /// Endpoint is public: a 401 never ends the session.
    pub public: bool,
}

/// An API call as seen by the gate and the recovery hook.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub id: uuid::Uuid,
    pub method: Method,
    /// Path (and optional query) relative to the API base URL.
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub options: RequestOptions,
    /// Set once the request has been through one refresh-and-retry cycle.
    pub retried: bool,
    /// Bearer token attached to the last dispatch.
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            method,
            path: path.into(),
            body: None,
            options: RequestOptions::default(),
            retried: false,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn public(mut self) -> Self {
        self.options.public = true;
        self
    }

    pub fn skip_auth_redirect(mut self) -> Self {
        self.options.skip_auth_redirect = true;
        self
    }

    pub fn auth_endpoint(mut self) -> Self {
        self.options.auth_endpoint = true;
        self
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or_default()
    }
}

/// Decides which bearer token, if any, goes on an outgoing request.
pub struct RequestGate {
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestGate {
    pub fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Token to send as `Authorization: Bearer`, or `None` to send the
    /// request unauthenticated. Never fails: a refresh error only means the
    /// request goes out without credentials.
    pub async fn authorize(&self, request: &ApiRequest) -> Option<String> {
        if request.options.auth_endpoint {
            return None;
        }
        if !self.coordinator.store().has_tokens() {
            return None;
        }
        match self.coordinator.ensure_valid_token().await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                debug!(request_id = %request.id, path = %request.path, "no session, sending unauthenticated");
                None
            }
            Err(e) => {
                warn!(request_id = %request.id, path = %request.path, err = %e, "token refresh failed, sending unauthenticated");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
