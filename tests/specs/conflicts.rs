// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-session conflict detection and last-write-wins resolution.

use super::prelude::*;
use foreman_core::{PriorityBand, SessionId, TaskConfig};
use foreman_engine::{Engine, EventFilter, ResolutionStrategy};
use foreman_storage::EntityKind;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn last_write_wins_across_sessions() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.heartbeat_interval_ms = 25;
    let engine = Engine::open(cfg).unwrap();
    engine.register_capability("echo", Arc::new(Echo));

    let sub = engine.subscribe(EventFilter::names([
        "conflict:detected",
        "conflict:resolved",
    ]));

    let id = engine
        .submit(TaskConfig::builder("t", "contested", "echo").build())
        .await
        .unwrap();
    let base = engine.tasks()["t"].clone();

    // session1 sets priority HIGH at t=0; session2 sets LOW at t=+500ms
    let mut wants_high = base.clone();
    wants_high.base_priority = PriorityBand::High;
    let mut wants_low = base.clone();
    wants_low.base_priority = PriorityBand::Low;

    let t0 = 1_000_000u64;
    engine
        .record_remote_change(
            &SessionId::new("session1"),
            EntityKind::Task,
            id.as_str(),
            t0,
            None,
            serde_json::to_value(&wants_high).ok(),
        )
        .unwrap();
    engine
        .record_remote_change(
            &SessionId::new("session2"),
            EntityKind::Task,
            id.as_str(),
            t0 + 500,
            None,
            serde_json::to_value(&wants_low).ok(),
        )
        .unwrap();

    // Detection names both sessions
    let detected = wait_for(&sub, "conflict:detected").await;
    match detected {
        foreman_core::Event::ConflictDetected {
            entity_id,
            sessions,
            ..
        } => {
            assert_eq!(entity_id, "t");
            assert_eq!(
                sessions,
                vec![SessionId::new("session1"), SessionId::new("session2")]
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Resolution: the later write (session2, LOW) wins
    let resolved = wait_for(&sub, "conflict:resolved").await;
    match resolved {
        foreman_core::Event::ConflictResolved {
            strategy, winner, ..
        } => {
            assert_eq!(strategy, "last_write_wins");
            assert_eq!(winner, "session2");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert_eq!(engine.tasks()["t"].base_priority, PriorityBand::Low);
    assert_eq!(engine.metrics().conflicts_detected, 1);
    assert_eq!(engine.metrics().conflicts_resolved, 1);

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn manual_strategy_parks_until_payload_arrives() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.heartbeat_interval_ms = 25;
    cfg.default_resolution = ResolutionStrategy::Manual;
    let engine = Engine::open(cfg).unwrap();
    engine.register_capability("echo", Arc::new(Echo));

    let sub = engine.subscribe(EventFilter::names([
        "conflict:detected",
        "conflict:resolved",
    ]));

    let id = engine
        .submit(TaskConfig::builder("t", "contested", "echo").build())
        .await
        .unwrap();
    let base = engine.tasks()["t"].clone();

    let mut version_a = base.clone();
    version_a.base_priority = PriorityBand::High;
    let mut version_b = base.clone();
    version_b.base_priority = PriorityBand::Low;

    engine
        .record_remote_change(
            &SessionId::new("s-a"),
            EntityKind::Task,
            id.as_str(),
            1_000_000,
            None,
            serde_json::to_value(&version_a).ok(),
        )
        .unwrap();
    engine
        .record_remote_change(
            &SessionId::new("s-b"),
            EntityKind::Task,
            id.as_str(),
            1_000_400,
            None,
            serde_json::to_value(&version_b).ok(),
        )
        .unwrap();

    wait_for(&sub, "conflict:detected").await;

    // Parked: nothing resolved yet
    let pending = engine.pending_conflicts();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].changes.len(), 2);

    // The operator supplies the payload: an explicit middle ground
    let mut manual = base.clone();
    manual.base_priority = PriorityBand::Critical;
    engine
        .resolve_conflict(
            &pending[0].id,
            ResolutionStrategy::Manual,
            serde_json::to_value(&manual).ok(),
        )
        .await
        .unwrap();

    wait_for(&sub, "conflict:resolved").await;
    assert_eq!(engine.tasks()["t"].base_priority, PriorityBand::Critical);
    assert!(engine.pending_conflicts().is_empty());

    engine.shutdown(false).await.unwrap();
}
