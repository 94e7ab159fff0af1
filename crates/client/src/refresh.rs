// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight refresh slot and its waiter queue.
//!
//! Every transition happens inside one short critical section so a caller
//! either joins the refresh in flight or starts a new one, never both, and a
//! settled refresh drains its queue in the same step that frees the slot.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::backend::TokenPair;
use crate::codec;
use crate::error::AuthError;
use crate::store::TokenStore;

/// Outcome delivered to a waiting caller.
pub type RefreshOutcome = Result<String, AuthError>;

pub(crate) type Waiter = oneshot::Sender<RefreshOutcome>;

/// What a caller must do after asking for a token.
pub(crate) enum Admission {
    /// A valid access token is already stored.
    Ready(String),
    /// No usable refresh token; the session cannot be recovered.
    Unrecoverable,
    /// Joined the refresh in flight.
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// Started a new refresh; the caller must run it for this generation.
    Lead { generation: u64, refresh_token: String, rx: oneshot::Receiver<RefreshOutcome> },
}

#[derive(Default)]
struct Inner {
    /// Generation of the refresh in flight.
    in_flight: Option<u64>,
    next_generation: u64,
    waiters: Vec<Waiter>,
}

/// Refresh bookkeeping owned by one coordinator.
#[derive(Default)]
pub struct RefreshState {
    inner: Mutex<Inner>,
}

impl RefreshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a refresh has been dispatched and not yet delivered.
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    /// Callers currently parked on the refresh in flight.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Join the refresh in flight, return a token that became valid, or
    /// start a new refresh. `rejected` is never handed back as valid.
    ///
    /// The access token must outlive `access_buffer`; the refresh token only
    /// `refresh_buffer`.
    pub(crate) fn admit(
        &self,
        store: &TokenStore,
        access_buffer: Duration,
        refresh_buffer: Duration,
        rejected: Option<&str>,
    ) -> Admission {
        let mut inner = self.inner.lock();
        let (tx, rx) = oneshot::channel();

        if inner.in_flight.is_some() {
            inner.waiters.push(tx);
            return Admission::Wait(rx);
        }

        // A refresh may have settled since the caller's unlocked check.
        if let Some(token) = store
            .access_token()
            .filter(|t| Some(t.as_str()) != rejected && codec::is_valid(Some(t), access_buffer))
        {
            return Admission::Ready(token);
        }

        let Some(refresh_token) =
            store.refresh_token().filter(|t| codec::is_valid(Some(t), refresh_buffer))
        else {
            return Admission::Unrecoverable;
        };

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.in_flight = Some(generation);
        inner.waiters.push(tx);
        Admission::Lead { generation, refresh_token, rx }
    }

    /// Persist a successful refresh and free the slot. Returns the waiters to
    /// resolve, or `None` if the generation was invalidated by a logout.
    pub(crate) fn complete(
        &self,
        generation: u64,
        store: &TokenStore,
        pair: &TokenPair,
    ) -> Option<Vec<Waiter>> {
        let mut inner = self.inner.lock();
        if inner.in_flight != Some(generation) {
            return None;
        }
        store.set_tokens(&pair.access, pair.refresh.as_deref());
        inner.in_flight = None;
        Some(std::mem::take(&mut inner.waiters))
    }

    /// Take the waiters of a failed refresh. The slot stays occupied until
    /// [`RefreshState::abort_if`] so no one starts over with the rejected token.
    pub(crate) fn fail(&self, generation: u64) -> Option<Vec<Waiter>> {
        let mut inner = self.inner.lock();
        if inner.in_flight != Some(generation) {
            return None;
        }
        Some(std::mem::take(&mut inner.waiters))
    }

    /// Clear the store, invalidate whatever is in flight and take its
    /// remaining waiters.
    pub(crate) fn abort(&self, store: &TokenStore) -> Vec<Waiter> {
        let mut inner = self.inner.lock();
        store.clear();
        inner.in_flight = None;
        std::mem::take(&mut inner.waiters)
    }

    /// [`RefreshState::abort`] for the failed refresh `generation` only. Returns
    /// `None`, leaving the store alone, when a login or logout already
    /// superseded it.
    pub(crate) fn abort_if(&self, generation: u64, store: &TokenStore) -> Option<Vec<Waiter>> {
        let mut inner = self.inner.lock();
        if inner.in_flight != Some(generation) {
            return None;
        }
        store.clear();
        inner.in_flight = None;
        Some(std::mem::take(&mut inner.waiters))
    }

    /// Install tokens obtained outside a refresh (login). Any refresh in
    /// flight is invalidated; its waiters are returned for resolution.
    pub(crate) fn install(&self, store: &TokenStore, pair: &TokenPair) -> Vec<Waiter> {
        let mut inner = self.inner.lock();
        store.set_tokens(&pair.access, pair.refresh.as_deref());
        inner.in_flight = None;
        std::mem::take(&mut inner.waiters)
    }
}

/// Deliver one outcome to every waiter, in enqueue order. Waiters that gave
/// up (dropped receiver) are skipped.
pub(crate) fn resolve(waiters: Vec<Waiter>, outcome: &RefreshOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
