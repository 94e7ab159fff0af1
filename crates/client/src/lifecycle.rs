// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine: login, logout, background refresh and reaction
//! to tokens changed by another process.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::TokenPair;
use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::refresh::{self, RefreshState};
use crate::store::{StorageEvent, TokenStore};

/// Authentication transition delivered to the [`SessionObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEvent {
    Authenticated,
    Unauthenticated,
}

impl SessionEvent {
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Nothing has happened yet in this process.
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// Receives session transitions (UI, routing, a CLI printer).
///
/// Called while the session lock is held: implementations must not call
/// back into [`SessionLifecycle`] synchronously.
pub trait SessionObserver: Send + Sync {
    fn on_session_change(&self, event: SessionEvent);
}

/// Observer that does nothing.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_session_change(&self, _event: SessionEvent) {}
}

/// Fans session events out over a broadcast channel.
pub struct BroadcastObserver {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(16)
    }
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_session_change(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

struct SessionState {
    status: SessionStatus,
    timer: Option<CancellationToken>,
}

/// Owns the session's authenticated/unauthenticated state.
///
/// Lock order is session, then refresh: logout and login take the refresh
/// lock while holding the session lock, never the reverse.
pub struct SessionLifecycle {
    store: TokenStore,
    refresh: Arc<RefreshState>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    coordinator: OnceLock<Weak<RefreshCoordinator>>,
    shutdown: CancellationToken,
}

impl SessionLifecycle {
    pub fn new(
        store: TokenStore,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            refresh: Arc::new(RefreshState::new()),
            observer,
            config,
            state: Mutex::new(SessionState { status: SessionStatus::Unknown, timer: None }),
            coordinator: OnceLock::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn refresh_state(&self) -> &Arc<RefreshState> {
        &self.refresh
    }

    pub(crate) fn attach(&self, coordinator: Weak<RefreshCoordinator>) {
        let _ = self.coordinator.set(coordinator);
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    /// True while the background timer is scheduled.
    pub fn is_timer_running(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// End the session. Idempotent: observers hear about it only once.
    pub fn logout(&self) {
        let mut state = self.state.lock();
        let waiters = self.refresh.abort(&self.store);
        self.end_locked(&mut state, waiters);
    }

    /// Logout after refresh `generation` failed, unless a login (or an
    /// earlier logout) has superseded that refresh in the meantime.
    pub(crate) fn end_after_failed_refresh(&self, generation: u64) {
        let mut state = self.state.lock();
        let Some(waiters) = self.refresh.abort_if(generation, &self.store) else {
            debug!(generation, "failed refresh already superseded, session kept");
            return;
        };
        self.end_locked(&mut state, waiters);
    }

    fn end_locked(&self, state: &mut SessionState, waiters: Vec<refresh::Waiter>) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        if state.status != SessionStatus::Unauthenticated {
            state.status = SessionStatus::Unauthenticated;
            info!("session ended");
            self.observer.on_session_change(SessionEvent::Unauthenticated);
        }
        refresh::resolve(waiters, &Err(AuthError::SessionEnded));
    }

    /// Store tokens issued by a login and mark the session authenticated.
    /// A refresh still in flight is superseded; its waiters get the new token.
    pub fn login(&self, pair: &TokenPair) {
        {
            let _state = self.state.lock();
            let waiters = self.refresh.install(&self.store, pair);
            refresh::resolve(waiters, &Ok(pair.access.clone()));
        }
        self.mark_authenticated();
    }

    /// Record a successful login or refresh and schedule the background timer.
    /// Ignored when the tokens were cleared in the meantime.
    pub fn mark_authenticated(&self) {
        let mut state = self.state.lock();
        if !self.store.has_tokens() {
            debug!("tokens gone before session could be marked authenticated");
            return;
        }
        if state.status != SessionStatus::Authenticated {
            state.status = SessionStatus::Authenticated;
            info!("session authenticated");
            self.observer.on_session_change(SessionEvent::Authenticated);
        }
        if state.timer.is_none() {
            state.timer = self.spawn_timer();
        }
    }

    /// Start the proactive refresh timer if it is configured and not running.
    pub fn start_background_timer(&self) {
        let mut state = self.state.lock();
        if state.timer.is_none() {
            state.timer = self.spawn_timer();
        }
    }

    pub fn stop_background_timer(&self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.cancel();
        }
    }

    /// Stop the timer and the external change watcher.
    pub fn shutdown(&self) {
        self.stop_background_timer();
        self.shutdown.cancel();
    }

    fn spawn_timer(&self) -> Option<CancellationToken> {
        let interval = self.config.background_interval?;
        let coordinator = self.coordinator.get()?.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, background refresh disabled");
            return None;
        };

        let cancel = self.shutdown.child_token();
        handle.spawn(background_refresh(
            coordinator,
            self.store.clone(),
            interval,
            self.config.background_buffer,
            cancel.clone(),
        ));
        debug!(interval_secs = interval.as_secs(), "background refresh scheduled");
        Some(cancel)
    }

    /// React to tokens changed by another process sharing the persistence.
    ///
    /// A clear while authenticated logs this process out too; any other
    /// change triggers a non-blocking re-check that may mark the session
    /// authenticated.
    pub fn watch_external_changes(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, external token changes are not watched");
            return;
        };
        let mut rx = self.store.subscribe();
        let lifecycle = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        handle.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(lifecycle) = lifecycle.upgrade() else {
                    break;
                };
                match event {
                    Ok(StorageEvent::Cleared) => lifecycle.on_external_clear(),
                    Ok(StorageEvent::Changed) => lifecycle.on_external_change(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "storage events lagged, re-checking");
                        lifecycle.on_external_change();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn on_external_clear(&self) {
        if self.is_authenticated() {
            info!("tokens cleared by another process");
            self.logout();
        }
    }

    fn on_external_change(&self) {
        if self.store.has_tokens() {
            let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) else {
                return;
            };
            tokio::spawn(async move {
                match coordinator.ensure_valid_token().await {
                    Ok(Some(_)) => coordinator.lifecycle().mark_authenticated(),
                    Ok(None) => debug!("externally written tokens are not usable"),
                    Err(e) => debug!(err = %e, "re-check after external change failed"),
                }
            });
        } else {
            self.on_external_clear();
        }
    }
}

/// Periodically make sure the access token outlives `buffer`.
async fn background_refresh(
    coordinator: Weak<RefreshCoordinator>,
    store: TokenStore,
    interval: Duration,
    buffer: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        if !store.has_tokens() {
            debug!("no stored tokens, skipping background refresh");
            continue;
        }
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        match coordinator.ensure_valid_token_within(buffer).await {
            Ok(Some(_)) => debug!("background token check passed"),
            Ok(None) => debug!("background refresh found no session"),
            Err(e) => warn!(err = %e, "background refresh failed"),
        }
    }
    debug!("background refresh stopped");
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
