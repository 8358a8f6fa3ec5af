// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency ordering and cycle rejection, end to end.

use super::prelude::*;
use foreman_core::{DependencyType, TaskConfig, TaskId, TaskStatus};
use foreman_engine::{Engine, EngineError, EventFilter};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn simple_dependency_runs_in_order() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path())).unwrap();
    let timed = Timed::new(Duration::from_millis(300));
    let spans = Arc::clone(&timed.spans);
    engine.register_capability("timed", Arc::new(timed));

    let sub = engine.subscribe(EventFilter::names(["task:completed"]));

    let a = engine
        .submit(
            TaskConfig::builder("a", "first", "timed")
                .estimated_duration_ms(300)
                .build(),
        )
        .await
        .unwrap();
    let b = engine
        .submit(
            TaskConfig::builder("b", "second", "timed")
                .estimated_duration_ms(300)
                .depends_on(a.clone(), DependencyType::Blocks)
                .build(),
        )
        .await
        .unwrap();

    wait_for_n(&sub, "task:completed", 2).await;

    // Both terminal and completed
    assert_eq!(engine.status(&a).unwrap().state, TaskStatus::Completed);
    assert_eq!(engine.status(&b).unwrap().state, TaskStatus::Completed);

    // Ordering invariant: the predecessor finished before the dependent
    // started
    let spans = spans.lock();
    let a_span = spans.iter().find(|(id, _, _)| id == "a").unwrap();
    let b_span = spans.iter().find(|(id, _, _)| id == "b").unwrap();
    assert!(
        a_span.2 <= b_span.1,
        "dependent started before its predecessor completed"
    );

    // Serialized execution: total elapsed spans both sleeps
    let elapsed = b_span.2.duration_since(a_span.1);
    assert!(elapsed >= Duration::from_millis(600));

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn cycle_rejection_names_path_and_changes_nothing() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path())).unwrap();
    engine.register_capability("echo", Arc::new(Echo));

    // Held so the queue contents stay fixed across both sequence calls
    let hold = foreman_core::Precondition::NotBefore {
        epoch_ms: u64::MAX,
    };
    let a = engine
        .submit(
            TaskConfig::builder("a", "a", "echo")
                .precondition(hold.clone())
                .build(),
        )
        .await
        .unwrap();
    let b = engine
        .submit(
            TaskConfig::builder("b", "b", "echo")
                .precondition(hold.clone())
                .build(),
        )
        .await
        .unwrap();

    // "a blocks b"
    engine
        .add_dependency(&b, &a, DependencyType::Blocks, false)
        .await
        .unwrap();
    let seq_before = engine
        .sequence(foreman_engine::SequenceAlgorithm::DependencyAware)
        .unwrap();

    // "b blocks a" must fail with the exact path b -> a -> b
    let err = engine
        .add_dependency(&a, &b, DependencyType::Blocks, false)
        .await
        .unwrap_err();
    match err {
        EngineError::CycleWouldForm { path } => {
            assert_eq!(
                path,
                vec![TaskId::new("b"), TaskId::new("a"), TaskId::new("b")]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // No state change: the sequence still orders a before b
    let seq_after = engine
        .sequence(foreman_engine::SequenceAlgorithm::DependencyAware)
        .unwrap();
    assert_eq!(seq_before.order, seq_after.order);

    engine.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn sequence_is_a_linear_extension_under_every_algorithm() {
    use foreman_engine::SequenceAlgorithm::*;

    let dir = tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path())).unwrap();
    engine.register_capability("echo", Arc::new(Echo));

    // Held far in the future so the queue stays stable while sequencing
    let hold = foreman_core::Precondition::NotBefore {
        epoch_ms: u64::MAX,
    };
    let a = engine
        .submit(
            TaskConfig::builder("a", "a", "echo")
                .precondition(hold.clone())
                .build(),
        )
        .await
        .unwrap();
    for name in ["b", "c", "d"] {
        engine
            .submit(
                TaskConfig::builder(name, name, "echo")
                    .precondition(hold.clone())
                    .depends_on(a.clone(), DependencyType::Blocks)
                    .build(),
            )
            .await
            .unwrap();
    }

    for algorithm in [Priority, DependencyAware, ResourceOptimal, Hybrid] {
        let sequence = engine.sequence(algorithm).unwrap();
        assert_eq!(sequence.order.len(), 4, "{algorithm}: wrong task count");
        let a_pos = sequence.order.iter().position(|t| t == "a").unwrap();
        for dep in ["b", "c", "d"] {
            let dep_pos = sequence.order.iter().position(|t| t == dep).unwrap();
            assert!(a_pos < dep_pos, "{algorithm}: {dep} ordered before a");
        }
    }

    engine.shutdown(false).await.unwrap();
}
