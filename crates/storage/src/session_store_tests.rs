// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::fs;
use tempfile::tempdir;

fn store(root: &std::path::Path) -> SessionStore {
    SessionStore::new(WorkDir::new(root))
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    let mut session = Session::new("s-1", "agent-7", 1_000);
    session.note_task();
    store.save(&session).unwrap();

    let loaded = store.load(&SessionId::new("s-1")).unwrap().unwrap();
    assert_eq!(loaded.id, "s-1");
    assert_eq!(loaded.agent_id, "agent-7");
    assert_eq!(loaded.tasks_processed, 1);
}

#[test]
fn load_missing_returns_none() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());
    assert!(store.load(&SessionId::new("nope")).unwrap().is_none());
}

#[test]
fn corrupt_session_file_quarantined() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    let path = dir.path().join("session-bad.json");
    fs::write(&path, b"not json at all").unwrap();

    assert!(store.load(&SessionId::new("bad")).unwrap().is_none());
    assert!(!path.exists());
    assert!(path.with_extension("bak").exists());
}

#[test]
fn list_finds_all_sessions() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    store.save(&Session::new("s-1", "a", 0)).unwrap();
    store.save(&Session::new("s-2", "b", 0)).unwrap();
    // Unrelated file is ignored
    fs::write(dir.path().join("txnlog.json"), b"{}").unwrap();

    let mut sessions = store.list().unwrap();
    sessions.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "s-1");
    assert_eq!(sessions[1].id, "s-2");
}

#[test]
fn list_skips_corrupt_files() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    store.save(&Session::new("s-1", "a", 0)).unwrap();
    fs::write(dir.path().join("session-bad.json"), b"garbage").unwrap();

    let sessions = store.list().unwrap();
    assert_eq!(sessions.len(), 1);
}

#[test]
fn remove_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    store.save(&Session::new("s-1", "a", 0)).unwrap();
    store.remove(&SessionId::new("s-1")).unwrap();
    assert!(store.load(&SessionId::new("s-1")).unwrap().is_none());
    // Second remove is fine
    store.remove(&SessionId::new("s-1")).unwrap();
}

#[test]
fn updated_session_overwrites() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    let mut session = Session::new("s-1", "a", 0);
    store.save(&session).unwrap();

    session.heartbeat(9_000);
    session.graceful_shutdown = true;
    store.save(&session).unwrap();

    let loaded = store.load(&SessionId::new("s-1")).unwrap().unwrap();
    assert_eq!(loaded.last_heartbeat_ms, 9_000);
    assert!(loaded.graceful_shutdown);
}
