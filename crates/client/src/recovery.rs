// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-flight handling of `401 Unauthorized` responses.

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::coordinator::RefreshCoordinator;
use crate::gate::ApiRequest;

/// Prefixes served without authentication unless configured otherwise.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &["/api/blog/", "/api/services/", "/api/gallery/"];

/// Path prefixes whose 401s never end the session.
///
/// Matching is done on whole path segments of the query-stripped path:
/// `/api/blog/` covers `/api/blog` and `/api/blog/post/1` but not
/// `/api/blogger` or `/api/me?next=/api/blog/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRoutes {
    prefixes: Vec<String>,
}

impl Default for PublicRoutes {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_PATHS.iter().copied())
    }
}

impl PublicRoutes {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim_end_matches('/').to_owned())
            .collect();
        Self { prefixes }
    }

    pub fn none() -> Self {
        Self { prefixes: Vec::new() }
    }

    pub fn matches(&self, path: &str) -> bool {
        let route = path.split(['?', '#']).next().unwrap_or_default();
        self.prefixes.iter().any(|prefix| match route.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
            None => false,
        })
    }
}

/// What the client should do with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Hand the response to the caller unchanged.
    PassThrough,
    /// Re-send the request once with this token.
    Retry { token: String },
    /// Refresh was impossible; return the original 401.
    Surface,
    /// Still 401 after one retry; return it without another refresh.
    Exhausted,
}

pub struct ResponseRecovery {
    coordinator: Arc<RefreshCoordinator>,
    public_routes: PublicRoutes,
}

impl ResponseRecovery {
    pub fn new(coordinator: Arc<RefreshCoordinator>, public_routes: PublicRoutes) -> Self {
        Self { coordinator, public_routes }
    }

    fn is_public(&self, request: &ApiRequest) -> bool {
        request.options.public
            || request.options.skip_auth_redirect
            || self.public_routes.matches(&request.path)
    }

    /// Decide how to handle `status` for `request`. Marks the request as
    /// retried when it returns [`Recovery::Retry`].
    pub async fn on_response(&self, request: &mut ApiRequest, status: StatusCode) -> Recovery {
        if status != StatusCode::UNAUTHORIZED || request.options.auth_endpoint {
            return Recovery::PassThrough;
        }
        if request.retried {
            warn!(request_id = %request.id, path = %request.path, "still unauthorized after refresh");
            return Recovery::Exhausted;
        }
        if self.is_public(request) {
            debug!(request_id = %request.id, path = %request.path, "401 on public endpoint, passing through");
            return Recovery::PassThrough;
        }

        match self.coordinator.ensure_fresh_token(request.bearer.as_deref()).await {
            Ok(Some(token)) => {
                debug!(request_id = %request.id, path = %request.path, "retrying with refreshed token");
                request.retried = true;
                Recovery::Retry { token }
            }
            Ok(None) => {
                info!(request_id = %request.id, path = %request.path, "401 without a recoverable session");
                Recovery::Surface
            }
            Err(e) => {
                warn!(request_id = %request.id, path = %request.path, err = %e, "refresh after 401 failed");
                Recovery::Surface
            }
        }
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
