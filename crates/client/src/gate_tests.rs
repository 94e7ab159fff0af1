// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::AuthError;
use crate::lifecycle::SessionEvent;
use crate::test_support::{quiet_config, token_expiring_in, MockBackend, TestSession};

fn gate_for(session: &TestSession) -> RequestGate {
    RequestGate::new(Arc::clone(&session.coordinator))
}

#[tokio::test]
async fn attaches_valid_token() -> anyhow::Result<()> {
    let access = token_expiring_in(3600);
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&access),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );

    assert_eq!(gate_for(&session).authorize(&ApiRequest::get("/api/me/")).await, Some(access));
    assert_eq!(backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn refreshes_stale_token_before_attaching() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(5)),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );

    let token = gate_for(&session).authorize(&ApiRequest::get("/api/me/")).await;
    assert!(token.is_some());
    assert_eq!(token, session.store().access_token());
    assert_eq!(backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn auth_endpoints_skip_the_coordinator() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(-60)),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );

    let request = ApiRequest::post("/api/auth/login/", serde_json::json!({})).auth_endpoint();
    assert_eq!(gate_for(&session).authorize(&request).await, None);
    assert_eq!(backend.refresh_calls(), 0);
    assert!(session.store().has_tokens());
    Ok(())
}

#[tokio::test]
async fn anonymous_visitor_is_left_alone() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(Arc::clone(&backend), None, None, quiet_config());

    assert_eq!(gate_for(&session).authorize(&ApiRequest::get("/api/blog/")).await, None);
    assert_eq!(backend.refresh_calls(), 0);
    assert!(session.observer.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_failure_sends_unauthenticated() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    backend.push(Err(AuthError::Rejected { status: 401, message: "expired".into() }));
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(-60)),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );

    assert_eq!(gate_for(&session).authorize(&ApiRequest::get("/api/me/")).await, None);
    crate::test_support::eventually(|| {
        session.observer.events() == vec![SessionEvent::Unauthenticated]
    })
    .await?;
    Ok(())
}

#[yare::parameterized(
    bare        = { "/api/blog/posts", "/api/blog/posts" },
    query       = { "/api/me/?next=/api/blog/", "/api/me/" },
    fragment    = { "/api/me#top", "/api/me" },
    empty       = { "", "" },
)]
fn route_strips_query(path: &str, expected: &str) {
    assert_eq!(ApiRequest::get(path).route(), expected);
}

#[test]
fn builders_set_options() {
    let request = ApiRequest::get("/x").public().skip_auth_redirect();
    assert_eq!(
        request.options,
        RequestOptions { auth_endpoint: false, skip_auth_redirect: true, public: true }
    );
    assert!(!request.retried);
    assert_ne!(request.id, ApiRequest::get("/x").id);
}
