// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::store::{ACCESS_KEY, REFRESH_KEY};

#[test]
fn missing_file_opens_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let persistence = FilePersistence::open(dir.path().join("tokens.json"))?;
    assert!(persistence.get(ACCESS_KEY).is_none());
    assert!(!persistence.path().exists());
    Ok(())
}

#[test]
fn set_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("tokens.json");

    let first = FilePersistence::open(&path)?;
    first.set(ACCESS_KEY, "a1")?;
    first.set(REFRESH_KEY, "r1")?;
    drop(first);

    let second = FilePersistence::open(&path)?;
    assert_eq!(second.get(ACCESS_KEY).as_deref(), Some("a1"));
    assert_eq!(second.get(REFRESH_KEY).as_deref(), Some("r1"));
    Ok(())
}

#[test]
fn clear_writes_empty_object() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    let persistence = FilePersistence::open(&path)?;
    persistence.set(ACCESS_KEY, "a1")?;
    persistence.clear()?;

    assert!(load(&path)?.is_empty());
    Ok(())
}

#[test]
fn save_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    let values = HashMap::from([(ACCESS_KEY.to_owned(), "a1".to_owned())]);
    save(&path, &values)?;
    save(&path, &values)?;

    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["tokens.json".to_owned()]);
    Ok(())
}

#[test]
fn corrupt_file_fails_to_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    std::fs::write(&path, "not json")?;
    assert!(FilePersistence::open(&path).is_err());
    Ok(())
}

#[test]
fn reload_reports_external_change_then_clear() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    let values = Mutex::new(HashMap::new());
    let (tx, mut rx) = broadcast::channel(4);

    save(&path, &HashMap::from([(ACCESS_KEY.to_owned(), "a1".to_owned())]))?;
    reload(&path, &values, &tx);
    assert_eq!(rx.try_recv()?, StorageEvent::Changed);
    assert_eq!(values.lock().get(ACCESS_KEY).map(String::as_str), Some("a1"));

    // Unchanged contents are not reported twice.
    reload(&path, &values, &tx);
    assert!(rx.try_recv().is_err());

    save(&path, &HashMap::new())?;
    reload(&path, &values, &tx);
    assert_eq!(rx.try_recv()?, StorageEvent::Cleared);
    Ok(())
}

#[test]
fn reload_ignores_unreadable_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    std::fs::write(&path, "{ half")?;
    let values = Mutex::new(HashMap::from([(ACCESS_KEY.to_owned(), "a1".to_owned())]));
    let (tx, mut rx) = broadcast::channel(4);

    reload(&path, &values, &tx);
    assert!(rx.try_recv().is_err());
    assert_eq!(values.lock().get(ACCESS_KEY).map(String::as_str), Some("a1"));
    Ok(())
}

#[tokio::test]
async fn watcher_sees_writes_from_another_handle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    let writer = FilePersistence::open(&path)?;
    let reader = FilePersistence::open(&path)?;
    let mut rx = reader.subscribe();

    writer.set(ACCESS_KEY, "a1")?;
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await??;
    assert_eq!(event, StorageEvent::Changed);
    assert_eq!(reader.get(ACCESS_KEY).as_deref(), Some("a1"));

    writer.clear()?;
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await??;
    assert_eq!(event, StorageEvent::Cleared);
    assert!(reader.get(ACCESS_KEY).is_none());
    Ok(())
}
