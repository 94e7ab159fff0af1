// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token storage: the persistence seam and the typed access/refresh wrapper.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

/// Persistence slot holding the access token.
pub const ACCESS_KEY: &str = "access";

/// Persistence slot holding the refresh token.
pub const REFRESH_KEY: &str = "refresh";

/// Out-of-band change to the persisted tokens (another process, another tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    /// Tokens were written by someone else.
    Changed,
    /// All tokens were removed by someone else.
    Cleared,
}

/// Key-value persistence shared with other processes.
///
/// `subscribe` only reports changes made outside this handle; writes made
/// through `set`/`clear` are not echoed back.
pub trait TokenPersistence: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// In-process persistence. `external_set`/`external_clear` simulate a second
/// process sharing the same storage.
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, String>>,
    event_tx: broadcast::Sender<StorageEvent>,
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistence {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self { values: Mutex::new(HashMap::new()), event_tx }
    }

    /// Write a value as if another process did it.
    pub fn external_set(&self, name: &str, value: &str) {
        self.values.lock().insert(name.to_owned(), value.to_owned());
        let _ = self.event_tx.send(StorageEvent::Changed);
    }

    /// Wipe all values as if another process did it.
    pub fn external_clear(&self) {
        self.values.lock().clear();
        let _ = self.event_tx.send(StorageEvent::Cleared);
    }
}

impl TokenPersistence for MemoryPersistence {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.values.lock().insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.values.lock().clear();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.event_tx.subscribe()
    }
}

/// Access/refresh token pair on top of a [`TokenPersistence`].
///
/// Readers are public. Writers are crate-private: only the refresh
/// coordinator (after a successful refresh) and the session lifecycle
/// (login/logout) mutate tokens.
#[derive(Clone)]
pub struct TokenStore {
    persistence: Arc<dyn TokenPersistence>,
}

impl TokenStore {
    pub fn new(persistence: Arc<dyn TokenPersistence>) -> Self {
        Self { persistence }
    }

    pub fn access_token(&self) -> Option<String> {
        self.persistence.get(ACCESS_KEY).filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.persistence.get(REFRESH_KEY).filter(|t| !t.is_empty())
    }

    /// True if either token is stored. False for a first-time anonymous visitor.
    pub fn has_tokens(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.persistence.subscribe()
    }

    /// Store a new access token. `refresh: None` keeps the current refresh
    /// token (backends that do not rotate on every refresh).
    pub(crate) fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        if let Err(e) = self.persistence.set(ACCESS_KEY, access) {
            warn!(err = %e, "failed to persist access token");
        }
        if let Some(refresh) = refresh {
            if let Err(e) = self.persistence.set(REFRESH_KEY, refresh) {
                warn!(err = %e, "failed to persist refresh token");
            }
        }
    }

    pub(crate) fn clear(&self) {
        if let Err(e) = self.persistence.clear() {
            warn!(err = %e, "failed to clear persisted tokens");
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
