// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource budget: a saturated pool serializes otherwise-independent
//! tasks.

use super::prelude::*;
use foreman_core::{ResourceSpec, TaskConfig, TaskStatus};
use foreman_engine::{Engine, EventFilter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn cpu_budget_serializes_execution() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.max_concurrent = 8;
    cfg.resource_pools = vec![ResourceSpec::new("cpu", 2)];
    let engine = Engine::open(cfg).unwrap();

    let timed = Timed::new(Duration::from_millis(200));
    let peak = Arc::clone(&timed.peak);
    engine.register_capability("timed", Arc::new(timed));

    let sub = engine.subscribe(EventFilter::names(["task:completed"]));

    // Three independent tasks, each wanting the whole cpu pool
    let mut ids = Vec::new();
    for name in ["t1", "t2", "t3"] {
        let id = engine
            .submit(
                TaskConfig::builder(name, name, "timed")
                    .resource(ResourceSpec::new("cpu", 2))
                    .build(),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    wait_for_n(&sub, "task:completed", 3).await;

    // The running set never exceeded one task
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    for id in &ids {
        assert_eq!(engine.status(id).unwrap().state, TaskStatus::Completed);
    }

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn unconstrained_tasks_run_concurrently() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.max_concurrent = 4;
    let engine = Engine::open(cfg).unwrap();

    let timed = Timed::new(Duration::from_millis(300));
    let peak = Arc::clone(&timed.peak);
    engine.register_capability("timed", Arc::new(timed));

    let sub = engine.subscribe(EventFilter::names(["task:completed"]));
    for i in 0..4 {
        engine
            .submit(TaskConfig::builder(format!("t-{i}"), "t", "timed").build())
            .await
            .unwrap();
    }

    wait_for_n(&sub, "task:completed", 4).await;

    // Without resource pressure, the ceiling is the only limit
    assert!(peak.load(Ordering::SeqCst) > 1);

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn concurrency_ceiling_bounds_parallelism() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.max_concurrent = 2;
    let engine = Engine::open(cfg).unwrap();

    let timed = Timed::new(Duration::from_millis(150));
    let peak = Arc::clone(&timed.peak);
    engine.register_capability("timed", Arc::new(timed));

    let sub = engine.subscribe(EventFilter::names(["task:completed"]));
    for i in 0..6 {
        engine
            .submit(TaskConfig::builder(format!("t-{i}"), "t", "timed").build())
            .await
            .unwrap();
    }

    wait_for_n(&sub, "task:completed", 6).await;
    assert!(peak.load(Ordering::SeqCst) <= 2);

    engine.shutdown(false).await.unwrap();
}
