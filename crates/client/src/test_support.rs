// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helpers shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::backend::{AuthBackend, AuthFuture, Credentials, TokenPair};
use crate::codec::epoch_secs;
use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::lifecycle::{SessionEvent, SessionLifecycle, SessionObserver};
use crate::store::{MemoryPersistence, TokenPersistence, TokenStore, ACCESS_KEY, REFRESH_KEY};

/// Assert that a `Result` is `Err` and its message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Build an unsigned JWT-shaped token with the given `exp` claim.
pub fn mint_token(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

/// Token expiring `secs` seconds from now (negative for already expired).
pub fn token_expiring_in(secs: i64) -> String {
    let exp = (epoch_secs() as i64).saturating_add(secs).max(0);
    mint_token(exp as u64)
}

/// Scriptable [`AuthBackend`].
///
/// Each refresh pops the next scripted outcome; when the script is empty it
/// mints a fresh pair whose access token lives for `access_ttl` seconds.
/// A held backend parks every call until [`MockBackend::release`].
pub struct MockBackend {
    refresh_calls: AtomicU32,
    login_calls: AtomicU32,
    script: Mutex<VecDeque<Result<TokenPair, AuthError>>>,
    seen_refresh_tokens: Mutex<Vec<String>>,
    access_ttl: i64,
    gate: Option<Arc<Semaphore>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            refresh_calls: AtomicU32::new(0),
            login_calls: AtomicU32::new(0),
            script: Mutex::new(VecDeque::new()),
            seen_refresh_tokens: Mutex::new(Vec::new()),
            access_ttl: 3600,
            gate: None,
        }
    }

    /// Park calls until released.
    pub fn held() -> Self {
        Self { gate: Some(Arc::new(Semaphore::new(0))), ..Self::new() }
    }

    /// Lifetime of generated access tokens.
    pub fn with_access_ttl(mut self, secs: i64) -> Self {
        self.access_ttl = secs;
        self
    }

    /// Queue an outcome for the next call.
    pub fn push(&self, outcome: Result<TokenPair, AuthError>) {
        self.script.lock().push_back(outcome);
    }

    /// Let `n` parked calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(n);
        }
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen_refresh_tokens.lock().clone()
    }

    /// Wait until at least `n` refresh calls have started.
    pub async fn wait_for_refresh_calls(&self, n: u32) {
        while self.refresh_calls() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn next_outcome(&self) -> Result<TokenPair, AuthError> {
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(TokenPair {
                access: token_expiring_in(self.access_ttl),
                refresh: Some(token_expiring_in(86_400)),
            })
        })
    }

    async fn pass_gate(&self) {
        if let Some(ref gate) = self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

impl AuthBackend for MockBackend {
    fn refresh(&self, refresh_token: String) -> AuthFuture<'_> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_refresh_tokens.lock().push(refresh_token);
            self.pass_gate().await;
            self.next_outcome()
        })
    }

    fn login(&self, _credentials: Credentials) -> AuthFuture<'_> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            self.pass_gate().await;
            self.next_outcome()
        })
    }
}

/// Observer that records every event it receives.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_session_change(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

/// In-memory session wired to `backend`, seeded with the given tokens.
pub struct TestSession {
    pub persistence: Arc<MemoryPersistence>,
    pub observer: Arc<RecordingObserver>,
    pub coordinator: Arc<RefreshCoordinator>,
}

impl TestSession {
    pub fn new(
        backend: Arc<MockBackend>,
        access: Option<&str>,
        refresh: Option<&str>,
        config: SessionConfig,
    ) -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        if let Some(access) = access {
            let _ = persistence.set(ACCESS_KEY, access);
        }
        if let Some(refresh) = refresh {
            let _ = persistence.set(REFRESH_KEY, refresh);
        }
        let store = TokenStore::new(Arc::clone(&persistence) as Arc<dyn TokenPersistence>);
        let observer = Arc::new(RecordingObserver::new());
        let lifecycle =
            SessionLifecycle::new(store, Arc::clone(&observer) as Arc<dyn SessionObserver>, config);
        let coordinator = RefreshCoordinator::new(backend as Arc<dyn AuthBackend>, lifecycle);
        Self { persistence, observer, coordinator }
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        self.coordinator.lifecycle()
    }

    pub fn store(&self) -> &TokenStore {
        self.coordinator.store()
    }
}

/// Session config with the background timer disabled.
pub fn quiet_config() -> SessionConfig {
    SessionConfig { background_interval: None, ..SessionConfig::default() }
}

/// Poll `cond` until it holds, failing after five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async move {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}
