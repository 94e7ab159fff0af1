// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! Any number of tasks may ask for a valid token at once. The first one that
//! finds the token stale starts exactly one refresh; everybody else parks on
//! the waiter queue and receives the same outcome. The refresh itself runs on
//! its own task, so a caller that stops waiting (timeout, dropped request)
//! never strands the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::codec;
use crate::error::AuthError;
use crate::lifecycle::SessionLifecycle;
use crate::refresh::{self, Admission, RefreshOutcome, RefreshState};
use crate::store::TokenStore;

pub struct RefreshCoordinator {
    store: TokenStore,
    backend: Arc<dyn AuthBackend>,
    lifecycle: Arc<SessionLifecycle>,
    refresh: Arc<RefreshState>,
}

impl RefreshCoordinator {
    /// Create the coordinator for `lifecycle`'s session and register it as
    /// the lifecycle's refresher (background timer, external changes).
    pub fn new(backend: Arc<dyn AuthBackend>, lifecycle: Arc<SessionLifecycle>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            store: lifecycle.store().clone(),
            refresh: Arc::clone(lifecycle.refresh_state()),
            backend,
            lifecycle,
        });
        coordinator.lifecycle.attach(Arc::downgrade(&coordinator));
        coordinator
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    pub fn waiter_count(&self) -> usize {
        self.refresh.waiter_count()
    }

    /// A valid access token, refreshing first if needed.
    ///
    /// `Ok(None)` means there is no session to recover (the session has been
    /// logged out). `Err` carries the failure of the refresh the caller
    /// started or joined.
    pub async fn ensure_valid_token(&self) -> Result<Option<String>, AuthError> {
        self.acquire(self.lifecycle.config().access_buffer, None).await
    }

    /// [`Self::ensure_valid_token`] with a caller-chosen expiry buffer.
    pub async fn ensure_valid_token_within(
        &self,
        buffer: Duration,
    ) -> Result<Option<String>, AuthError> {
        self.acquire(buffer, None).await
    }

    /// Like [`Self::ensure_valid_token`], but `rejected` (a token the server
    /// just answered 401 to) is never accepted as valid.
    pub async fn ensure_fresh_token(
        &self,
        rejected: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        self.acquire(self.lifecycle.config().access_buffer, rejected).await
    }

    async fn acquire(
        &self,
        buffer: Duration,
        rejected: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        if let Some(token) = self
            .store
            .access_token()
            .filter(|t| Some(t.as_str()) != rejected && codec::is_valid(Some(t), buffer))
        {
            return Ok(Some(token));
        }

        let refresh_buffer = self.lifecycle.config().access_buffer;
        if !codec::is_valid(self.store.refresh_token().as_deref(), refresh_buffer) {
            return Ok(self.end_unrecoverable());
        }

        match self.refresh.admit(&self.store, buffer, refresh_buffer, rejected) {
            Admission::Ready(token) => Ok(Some(token)),
            Admission::Unrecoverable => Ok(self.end_unrecoverable()),
            Admission::Wait(rx) => {
                debug!("joined refresh in flight");
                settle(rx).await
            }
            Admission::Lead { generation, refresh_token, rx } => {
                self.spawn_refresh(generation, refresh_token);
                settle(rx).await
            }
        }
    }

    fn end_unrecoverable(&self) -> Option<String> {
        if self.store.has_tokens() {
            info!("refresh token missing or expired, ending session");
        } else if !self.lifecycle.is_authenticated() {
            // Anonymous visitor: nothing to end.
            return None;
        }
        self.lifecycle.logout();
        None
    }

    fn spawn_refresh(&self, generation: u64, refresh_token: String) {
        let store = self.store.clone();
        let backend = Arc::clone(&self.backend);
        let lifecycle = Arc::clone(&self.lifecycle);
        let state = Arc::clone(&self.refresh);

        tokio::spawn(async move {
            debug!(generation, "refreshing access token");
            match backend.refresh(refresh_token).await {
                Ok(pair) => {
                    let Some(waiters) = state.complete(generation, &store, &pair) else {
                        debug!(generation, "session ended during refresh, discarding tokens");
                        return;
                    };
                    info!(
                        generation,
                        waiters = waiters.len(),
                        rotated = pair.refresh.is_some(),
                        "access token refreshed"
                    );
                    lifecycle.mark_authenticated();
                    refresh::resolve(waiters, &Ok(pair.access));
                }
                Err(e) => {
                    let Some(waiters) = state.fail(generation) else {
                        debug!(generation, err = %e, "session ended during refresh");
                        return;
                    };
                    warn!(generation, waiters = waiters.len(), err = %e, "token refresh failed");
                    refresh::resolve(waiters, &Err(e));
                    lifecycle.end_after_failed_refresh(generation);
                }
            }
        });
    }
}

async fn settle(rx: oneshot::Receiver<RefreshOutcome>) -> Result<Option<String>, AuthError> {
    match rx.await {
        Ok(outcome) => outcome.map(Some),
        // Sender dropped without an answer: the refresh task is gone.
        Err(_) => Err(AuthError::SessionEnded),
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
