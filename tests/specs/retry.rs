// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry with exponential backoff.

use super::prelude::*;
use foreman_core::{TaskConfig, TaskStatus};
use foreman_engine::{Engine, EventFilter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn flaky_task_retries_with_growing_backoff() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path())).unwrap();

    // Fails on attempts 1 and 2, succeeds on attempt 3
    let flaky = FlakyUntil::new(3);
    let attempts = Arc::clone(&flaky.attempts);
    let attempt_times = Arc::clone(&flaky.attempt_times);
    engine.register_capability("flaky", Arc::new(flaky));

    let sub = engine.subscribe(EventFilter::all());
    let id = engine
        .submit(
            TaskConfig::builder("x", "flaky task", "flaky")
                .max_retries(3)
                .build(),
        )
        .await
        .unwrap();

    // Two retry announcements with doubling backoff
    let first = wait_for(&sub, "task:retrying").await;
    assert!(matches!(
        first,
        foreman_core::Event::TaskRetrying { attempt: 1, backoff_ms: 1_000, .. }
    ));
    let second = wait_for(&sub, "task:retrying").await;
    assert!(matches!(
        second,
        foreman_core::Event::TaskRetrying { attempt: 2, backoff_ms: 2_000, .. }
    ));

    wait_for(&sub, "task:completed").await;

    let report = engine.status(&id).unwrap();
    assert_eq!(report.state, TaskStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.executions, 3);
    assert_eq!(report.result.unwrap()["attempt"], 3);

    // Inter-attempt gaps honor the backoff schedule
    let times = attempt_times.lock();
    assert_eq!(times.len(), 3);
    assert!(times[1].duration_since(times[0]) >= Duration::from_secs(1));
    assert!(times[2].duration_since(times[1]) >= Duration::from_secs(2));

    assert_eq!(engine.metrics().retried, 2);
    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_fail_with_stable_code() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path())).unwrap();

    // Succeeds far too late: attempts are capped by max_retries
    let flaky = FlakyUntil::new(100);
    engine.register_capability("flaky", Arc::new(flaky));

    let sub = engine.subscribe(EventFilter::names(["task:failed"]));
    let id = engine
        .submit(
            TaskConfig::builder("x", "hopeless", "flaky")
                .max_retries(1)
                .build(),
        )
        .await
        .unwrap();

    let failed = wait_for(&sub, "task:failed").await;
    match failed {
        foreman_core::Event::TaskFailed { code, attempts, .. } => {
            assert_eq!(code, "retries_exhausted");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let report = engine.status(&id).unwrap();
    assert_eq!(report.state, TaskStatus::Failed);
    assert_eq!(report.error_code.as_deref(), Some("execution_failed"));
    assert!(report.error.is_some());

    engine.shutdown(false).await.unwrap();
}
