// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use foreman_core::ResourceKind;

#[test]
fn cycle_error_names_exact_path() {
    let err = EngineError::CycleWouldForm {
        path: vec![TaskId::new("b"), TaskId::new("a"), TaskId::new("b")],
    };
    assert_eq!(
        err.to_string(),
        "adding dependency would form a cycle: b -> a -> b"
    );
    assert_eq!(err.code(), "cycle_would_form");
}

#[test]
fn insufficient_capacity_message() {
    let err = EngineError::InsufficientCapacity {
        kind: ResourceKind::Cpu,
        requested: 4,
        available: 1,
    };
    assert_eq!(
        err.to_string(),
        "insufficient capacity for resource 'cpu': requested 4, available 1"
    );
    assert_eq!(err.code(), "insufficient_capacity");
}

#[yare::parameterized(
    unknown_task = { EngineError::UnknownTask(TaskId::new("t")), "unknown_task" },
    read_only    = { EngineError::ReadOnly, "read_only" },
    shutting     = { EngineError::ShuttingDown, "shutting_down" },
    manual       = { EngineError::ManualResolutionRequired("c".into()), "manual_resolution_required" },
)]
fn stable_codes(err: EngineError, code: &str) {
    assert_eq!(err.code(), code);
}

#[test]
fn graph_errors_convert() {
    let err: EngineError = GraphError::CycleWouldForm {
        path: vec![TaskId::new("x"), TaskId::new("x")],
    }
    .into();
    assert_eq!(err.code(), "cycle_would_form");

    let err: EngineError = GraphError::UnknownTask(TaskId::new("t")).into();
    assert_eq!(err.code(), "unknown_task");
}

#[test]
fn resource_errors_convert() {
    let err: EngineError = ResourceError::Insufficient {
        kind: ResourceKind::Memory,
        requested: 2,
        available: 0,
    }
    .into();
    assert_eq!(err.code(), "insufficient_capacity");
}
