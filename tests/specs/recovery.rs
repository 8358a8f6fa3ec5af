// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: a new process resumes from the latest snapshot.
//!
//! The crashed process is simulated at the storage level: its queue
//! state is frozen into a snapshot and its session file is left with a
//! stale heartbeat, exactly what a killed process leaves behind.

use super::prelude::*;
use foreman_core::{Session, SessionId, SnapshotKind, TaskId, TaskStatus};
use foreman_engine::{Engine, EventFilter, QueueCore, ResourceManager};
use foreman_storage::{SessionStore, SnapshotManager, WorkDir};
use std::sync::Arc;
use tempfile::tempdir;

/// Queue state as a killed process would have left it: two tasks done,
/// one mid-flight, two still pending.
fn crashed_process_state() -> QueueCore {
    let mut queue = QueueCore::new(ResourceManager::new());
    for i in 1..=5 {
        queue
            .insert_task(foreman_core::Task::new_with_epoch_ms(
                foreman_core::TaskConfig::builder(format!("t{i}"), format!("task {i}"), "echo")
                    .build(),
                1_000,
            ))
            .unwrap();
    }
    for id in ["t1", "t2"] {
        let task_id = TaskId::new(id);
        queue.mark_queued(&task_id, 2_000).unwrap();
        queue.mark_running(&task_id, 2_000).unwrap();
        queue
            .finish_success(&task_id, serde_json::json!({}), 3_000)
            .unwrap();
    }
    // t3 was admitted but never finished
    queue.mark_queued(&TaskId::new("t3"), 4_000).unwrap();
    queue.mark_running(&TaskId::new("t3"), 4_000).unwrap();
    queue
}

#[tokio::test]
async fn restart_resumes_interrupted_work() {
    let dir = tempdir().unwrap();
    let workdir = WorkDir::new(dir.path());
    workdir.ensure_layout().unwrap();

    // What the killed process left behind
    let snapshots = SnapshotManager::new(workdir.clone());
    let queue = crashed_process_state();
    snapshots
        .create(
            queue.snapshot_body(),
            SessionId::new("s-dead"),
            SnapshotKind::Automatic,
            "active",
            chrono::Utc::now(),
        )
        .unwrap();
    let session_store = SessionStore::new(workdir);
    session_store
        .save(&Session::new("s-dead", "dead-agent", 0))
        .unwrap();

    // Restart: a fresh engine on the same working directory
    let engine = Engine::open(test_config(dir.path())).unwrap();
    let report = engine.recovery_report();
    assert!(report.restored_from.is_some());

    let sub = engine.subscribe(EventFilter::names(["task:completed"]));
    engine.register_capability("echo", Arc::new(Echo));

    // The interrupted task returned to pending (at-least-once), the
    // completed ones stayed completed
    let tasks = engine.tasks();
    assert_eq!(tasks.len(), 5);
    assert_eq!(tasks["t1"].status, TaskStatus::Completed);
    assert_eq!(tasks["t2"].status, TaskStatus::Completed);

    // t3, t4, t5 run to completion on the new engine
    wait_for_n(&sub, "task:completed", 3).await;
    let tasks = engine.tasks();
    let completed = tasks
        .values()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    assert_eq!(completed, 5);

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn restart_after_graceful_shutdown_preserves_state() {
    let dir = tempdir().unwrap();

    // First engine completes one task, then shuts down cleanly
    {
        let engine = Engine::open(test_config(dir.path())).unwrap();
        engine.register_capability("echo", Arc::new(Echo));
        let sub = engine.subscribe(EventFilter::names(["task:completed"]));
        engine
            .submit(foreman_core::TaskConfig::builder("done", "done", "echo").build())
            .await
            .unwrap();
        wait_for(&sub, "task:completed").await;
        engine.shutdown(false).await.unwrap();
    }

    // Second engine sees the completed task, no crash recovery involved
    let engine = Engine::open(test_config(dir.path())).unwrap();
    let report = engine.recovery_report();
    assert!(report.crashed_sessions.is_empty());
    assert_eq!(
        engine.tasks()["done"].status,
        TaskStatus::Completed
    );
    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn corrupt_latest_snapshot_falls_back() {
    let dir = tempdir().unwrap();
    let workdir = WorkDir::new(dir.path());
    workdir.ensure_layout().unwrap();
    let snapshots = SnapshotManager::new(workdir);

    // Older good snapshot with one task
    let mut queue = QueueCore::new(ResourceManager::new());
    queue
        .insert_task(foreman_core::Task::new_with_epoch_ms(
            foreman_core::TaskConfig::builder("keeper", "keeper", "echo").build(),
            1_000,
        ))
        .unwrap();
    let good = snapshots
        .create(
            queue.snapshot_body(),
            SessionId::new("s"),
            SnapshotKind::Automatic,
            "active",
            chrono::Utc::now(),
        )
        .unwrap();

    // Newer snapshot, tampered on disk
    let bad = snapshots
        .create(
            queue.snapshot_body(),
            SessionId::new("s"),
            SnapshotKind::Automatic,
            "active",
            chrono::Utc::now() + chrono::Duration::seconds(5),
        )
        .unwrap();
    let bad_path = dir
        .path()
        .join(format!("snapshots/snapshot-{}.json", bad.id));
    let content = std::fs::read_to_string(&bad_path).unwrap();
    std::fs::write(&bad_path, content.replace("keeper", "evil-xx")).unwrap();

    let engine = Engine::open(test_config(dir.path())).unwrap();
    let report = engine.recovery_report();
    assert_eq!(report.integrity_failures, 1);
    assert_eq!(report.restored_from.as_deref(), Some(good.id.as_str()));
    assert!(engine.tasks().contains_key("keeper"));

    engine.shutdown(false).await.unwrap();
}
