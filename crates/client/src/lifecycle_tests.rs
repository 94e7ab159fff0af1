// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::{TokenPersistence, ACCESS_KEY, REFRESH_KEY};
use crate::test_support::{eventually, quiet_config, token_expiring_in, MockBackend, TestSession};

fn signed_in(backend: &Arc<MockBackend>, config: SessionConfig) -> TestSession {
    TestSession::new(
        Arc::clone(backend),
        Some(&token_expiring_in(3600)),
        Some(&token_expiring_in(86_400)),
        config,
    )
}

#[tokio::test]
async fn logout_is_idempotent() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = signed_in(&backend, quiet_config());
    session.lifecycle().mark_authenticated();

    session.lifecycle().logout();
    session.lifecycle().logout();
    session.lifecycle().logout();

    assert_eq!(
        session.observer.events(),
        vec![SessionEvent::Authenticated, SessionEvent::Unauthenticated]
    );
    assert_eq!(session.lifecycle().status(), SessionStatus::Unauthenticated);
    assert!(!session.store().has_tokens());
    Ok(())
}

#[tokio::test]
async fn login_stores_pair_and_notifies_once() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(Arc::clone(&backend), None, None, quiet_config());
    assert_eq!(session.lifecycle().status(), SessionStatus::Unknown);

    let pair = TokenPair { access: token_expiring_in(3600), refresh: Some("r1".into()) };
    session.lifecycle().login(&pair);
    session.lifecycle().mark_authenticated();

    assert!(session.lifecycle().is_authenticated());
    assert_eq!(session.store().access_token(), Some(pair.access));
    assert_eq!(session.store().refresh_token().as_deref(), Some("r1"));
    assert_eq!(session.observer.events(), vec![SessionEvent::Authenticated]);
    Ok(())
}

#[tokio::test]
async fn login_resolves_refresh_waiters() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::held());
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(-60)),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );
    let coordinator = Arc::clone(&session.coordinator);
    let waiter = tokio::spawn(async move { coordinator.ensure_valid_token().await });
    backend.wait_for_refresh_calls(1).await;

    let pair = TokenPair { access: token_expiring_in(3600), refresh: None };
    session.lifecycle().login(&pair);
    assert_eq!(waiter.await?, Ok(Some(pair.access.clone())));

    // The superseded refresh must not overwrite the login.
    backend.release(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.store().access_token(), Some(pair.access));
    Ok(())
}

#[tokio::test]
async fn mark_authenticated_without_tokens_is_ignored() {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(Arc::clone(&backend), None, None, quiet_config());

    session.lifecycle().mark_authenticated();
    assert_eq!(session.lifecycle().status(), SessionStatus::Unknown);
    assert!(session.observer.events().is_empty());
}

#[tokio::test]
async fn timer_runs_only_when_configured() {
    let backend = Arc::new(MockBackend::new());
    let quiet = signed_in(&backend, quiet_config());
    quiet.lifecycle().mark_authenticated();
    assert!(!quiet.lifecycle().is_timer_running());

    let timed = signed_in(&backend, SessionConfig::default());
    timed.lifecycle().mark_authenticated();
    assert!(timed.lifecycle().is_timer_running());

    timed.lifecycle().logout();
    assert!(!timed.lifecycle().is_timer_running());
}

#[tokio::test]
async fn background_timer_refreshes_before_expiry() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let config = SessionConfig {
        background_interval: Some(Duration::from_millis(20)),
        ..SessionConfig::default()
    };
    // Fine for requests, but inside the background buffer.
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(120)),
        Some(&token_expiring_in(86_400)),
        config,
    );
    session.lifecycle().start_background_timer();

    eventually(|| backend.refresh_calls() >= 1).await?;
    session.lifecycle().stop_background_timer();
    assert!(session.lifecycle().is_authenticated());
    Ok(())
}

#[tokio::test]
async fn background_failure_is_swallowed() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    backend.push(Err(AuthError::Transport("offline".into())));
    let config = SessionConfig {
        background_interval: Some(Duration::from_millis(20)),
        ..SessionConfig::default()
    };
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(120)),
        Some(&token_expiring_in(86_400)),
        config,
    );
    session.lifecycle().start_background_timer();

    eventually(|| session.lifecycle().status() == SessionStatus::Unauthenticated).await?;
    assert!(!session.lifecycle().is_timer_running());
    assert_eq!(backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn external_clear_logs_out() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = signed_in(&backend, quiet_config());
    session.lifecycle().mark_authenticated();
    session.lifecycle().watch_external_changes();

    session.persistence.external_clear();
    eventually(|| session.lifecycle().status() == SessionStatus::Unauthenticated).await?;
    assert_eq!(
        session.observer.events(),
        vec![SessionEvent::Authenticated, SessionEvent::Unauthenticated]
    );
    Ok(())
}

#[tokio::test]
async fn external_clear_before_login_is_ignored() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(Arc::clone(&backend), None, None, quiet_config());
    session.lifecycle().watch_external_changes();

    session.persistence.external_clear();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.lifecycle().status(), SessionStatus::Unknown);
    assert!(session.observer.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn external_login_authenticates() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(Arc::clone(&backend), None, None, quiet_config());
    session.lifecycle().watch_external_changes();

    let _ = session.persistence.set(REFRESH_KEY, &token_expiring_in(86_400));
    session.persistence.external_set(ACCESS_KEY, &token_expiring_in(3600));

    eventually(|| session.lifecycle().is_authenticated()).await?;
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(session.observer.events(), vec![SessionEvent::Authenticated]);
    Ok(())
}

#[test]
fn session_events_serialize_lowercase() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_string(&SessionEvent::Authenticated)?, r#""authenticated""#);
    assert_eq!(serde_json::to_string(&SessionStatus::Unknown)?, r#""unknown""#);
    assert!(!SessionEvent::Unauthenticated.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn broadcast_observer_fans_out() -> anyhow::Result<()> {
    let observer = BroadcastObserver::default();
    let mut a = observer.subscribe();
    let mut b = observer.subscribe();

    observer.on_session_change(SessionEvent::Authenticated);
    assert_eq!(a.recv().await?, SessionEvent::Authenticated);
    assert_eq!(b.recv().await?, SessionEvent::Authenticated);
    Ok(())
}

#[tokio::test]
async fn login_between_refresh_failure_and_cleanup_survives() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = TestSession::new(
        Arc::clone(&backend),
        Some(&token_expiring_in(-60)),
        Some(&token_expiring_in(86_400)),
        quiet_config(),
    );
    let lifecycle = session.lifecycle();
    let buffer = lifecycle.config().access_buffer;
    let refresh::Admission::Lead { generation, .. } =
        lifecycle.refresh_state().admit(session.store(), buffer, buffer, None)
    else {
        anyhow::bail!("expected to lead a refresh");
    };
    assert!(lifecycle.refresh_state().fail(generation).is_some());

    let pair = TokenPair { access: token_expiring_in(3600), refresh: Some(token_expiring_in(86_400)) };
    lifecycle.login(&pair);
    lifecycle.end_after_failed_refresh(generation);

    assert_eq!(session.store().access_token(), Some(pair.access));
    assert_eq!(lifecycle.status(), SessionStatus::Authenticated);
    assert_eq!(session.observer.events(), vec![SessionEvent::Authenticated]);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_cleanup_ends_session() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new());
    let session = signed_in(&backend, quiet_config());
    session.lifecycle().mark_authenticated();
    let lifecycle = session.lifecycle();
    let store = session.store();
    let buffer = Duration::from_secs(7200);
    let refresh::Admission::Lead { generation, .. } =
        lifecycle.refresh_state().admit(store, buffer, lifecycle.config().access_buffer, None)
    else {
        anyhow::bail!("expected to lead a refresh");
    };
    assert!(lifecycle.refresh_state().fail(generation).is_some());

    lifecycle.end_after_failed_refresh(generation);
    assert!(!store.has_tokens());
    assert!(!lifecycle.refresh_state().is_refreshing());
    assert_eq!(
        session.observer.events(),
        vec![SessionEvent::Authenticated, SessionEvent::Unauthenticated]
    );
    Ok(())
}

#[test]
fn watching_without_runtime_is_a_no_op() {
    let backend = Arc::new(MockBackend::new());
    let session = signed_in(&backend, quiet_config());
    session.lifecycle().watch_external_changes();
    assert!(session.observer.events().is_empty());
}
