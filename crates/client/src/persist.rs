// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed token persistence shared between processes.
//!
//! Tokens live in a small JSON object (`{"access": "...", "refresh": "..."}`).
//! A `notify` watcher on the parent directory reloads the file when another
//! process rewrites it and reports the difference as a [`StorageEvent`].

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::{StorageEvent, TokenPersistence};

type Values = HashMap<String, String>;

/// JSON-file persistence with cross-process change notification.
pub struct FilePersistence {
    path: PathBuf,
    /// Last contents written or observed. Held while writing so the watcher
    /// never mistakes our own write for an external one.
    values: Arc<Mutex<Values>>,
    event_tx: broadcast::Sender<StorageEvent>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl FilePersistence {
    /// Open (or lazily create) the token file at `path` and start watching it.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let values = Arc::new(Mutex::new(load(&path)?));
        let (event_tx, _) = broadcast::channel(16);
        let watcher = setup_watcher(&path, Arc::clone(&values), event_tx.clone());

        Ok(Self { path, values, event_tx, _watcher: watcher })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_locked(&self, values: &Values) -> anyhow::Result<()> {
        save(&self.path, values)
    }
}

impl TokenPersistence for FilePersistence {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let mut values = self.values.lock();
        values.insert(name.to_owned(), value.to_owned());
        self.write_locked(&values)
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut values = self.values.lock();
        values.clear();
        self.write_locked(&values)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.event_tx.subscribe()
    }
}

/// Load the token file. A missing file is an empty store.
pub fn load(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Save the token file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// share a `.tmp` file.
pub fn save(path: &Path, values: &HashMap<String, String>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(values)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Watch the file's parent directory (so replacement by rename is seen too).
/// Returns the watcher handle, which must be kept alive.
fn setup_watcher(
    path: &Path,
    values: Arc<Mutex<Values>>,
    event_tx: broadcast::Sender<StorageEvent>,
) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let file = path.to_path_buf();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            reload(&file, &values, &event_tx);
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "token file watcher unavailable");
            return None;
        }
    };

    let watch_path = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if let Err(e) = watcher.watch(watch_path, RecursiveMode::NonRecursive) {
        warn!(path = %watch_path.display(), err = %e, "failed to watch token directory");
        return None;
    }
    Some(watcher)
}

/// Re-read the file and emit an event if someone else changed it.
fn reload(path: &Path, values: &Mutex<Values>, event_tx: &broadcast::Sender<StorageEvent>) {
    let mut current = values.lock();
    let on_disk = match load(path) {
        Ok(v) => v,
        Err(e) => {
            debug!(path = %path.display(), err = %e, "ignoring unreadable token file");
            return;
        }
    };
    if on_disk == *current {
        return;
    }

    let event = if on_disk.values().all(|v| v.is_empty()) {
        StorageEvent::Cleared
    } else {
        StorageEvent::Changed
    };
    *current = on_disk;
    drop(current);

    debug!(path = %path.display(), ?event, "token file changed externally");
    let _ = event_tx.send(event);
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
