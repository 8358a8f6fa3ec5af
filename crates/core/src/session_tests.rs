// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_session_is_active() {
    let session = Session::new("s-1", "agent-7", 1_000);
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.started_at_ms, 1_000);
    assert_eq!(session.last_heartbeat_ms, 1_000);
    assert!(!session.graceful_shutdown);
}

#[test]
fn heartbeat_updates_timestamp() {
    let mut session = Session::new("s-1", "agent-7", 1_000);
    session.heartbeat(5_000);
    assert_eq!(session.last_heartbeat_ms, 5_000);
    assert_eq!(session.silent_for_ms(7_500), 2_500);
}

#[test]
fn heartbeat_revives_inactive_session() {
    let mut session = Session::new("s-1", "agent-7", 1_000);
    session.status = SessionStatus::Inactive;
    session.heartbeat(9_000);
    assert_eq!(session.status, SessionStatus::Active);
}

#[test]
fn heartbeat_does_not_revive_crashed_session() {
    let mut session = Session::new("s-1", "agent-7", 1_000);
    session.status = SessionStatus::Crashed;
    session.heartbeat(9_000);
    assert_eq!(session.status, SessionStatus::Crashed);
}

#[test]
fn counters_increment() {
    let mut session = Session::new("s-1", "agent-7", 0);
    session.note_task();
    session.note_task();
    session.note_error();
    session.note_operation();
    assert_eq!(session.tasks_processed, 2);
    assert_eq!(session.errors, 1);
    assert_eq!(session.operations, 1);
}

#[yare::parameterized(
    active     = { SessionStatus::Active,     true },
    inactive   = { SessionStatus::Inactive,   false },
    crashed    = { SessionStatus::Crashed,    false },
    terminated = { SessionStatus::Terminated, false },
)]
fn liveness(status: SessionStatus, expected: bool) {
    assert_eq!(status.is_live(), expected);
}

// ── Ownership ───────────────────────────────────────────────────────────────

#[test]
fn ownership_without_expiry_never_expires() {
    let ownership = TaskOwnership {
        task_id: TaskId::new("t-1"),
        session_id: SessionId::new("s-1"),
        agent_id: "agent-7".to_string(),
        acquired_at_ms: 0,
        expires_at_ms: None,
        mode: OwnershipMode::Exclusive,
        parent: None,
    };
    assert!(!ownership.is_expired(u64::MAX));
}

#[test]
fn ownership_expires_at_deadline() {
    let ownership = TaskOwnership {
        task_id: TaskId::new("t-1"),
        session_id: SessionId::new("s-1"),
        agent_id: "agent-7".to_string(),
        acquired_at_ms: 0,
        expires_at_ms: Some(10_000),
        mode: OwnershipMode::Exclusive,
        parent: None,
    };
    assert!(!ownership.is_expired(9_999));
    assert!(ownership.is_expired(10_000));
}

#[test]
fn session_serde_round_trip() {
    let mut session = Session::new("s-1", "agent-7", 123);
    session.note_task();
    let json = serde_json::to_string(&session).unwrap();
    let back: Session = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, session.id);
    assert_eq!(back.tasks_processed, 1);
    assert_eq!(back.status, SessionStatus::Active);
}
