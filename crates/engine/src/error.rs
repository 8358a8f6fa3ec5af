// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine.
//!
//! Every variant maps to a stable error code via [`EngineError::code`];
//! terminal task statuses and lifecycle events carry these codes so that
//! embedders can match on them without parsing messages.

use crate::graph::GraphError;
use crate::resources::ResourceError;
use foreman_core::{InvalidTransition, SessionId, TaskId};
use thiserror::Error;

fn fmt_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors surfaced by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("duplicate task id: {0}")]
    DuplicateTask(TaskId),
    #[error("unknown dependency edge: {0} -> {1}")]
    UnknownEdge(TaskId, TaskId),
    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(String),
    #[error("no executor registered for key '{0}'")]
    UnknownExecutor(String),
    #[error("unknown conflict: {0}")]
    UnknownConflict(String),
    #[error("adding dependency would form a cycle: {}", fmt_path(.path))]
    CycleWouldForm { path: Vec<TaskId> },
    #[error("insufficient capacity for resource '{kind}': requested {requested}, available {available}")]
    InsufficientCapacity {
        kind: foreman_core::ResourceKind,
        requested: u32,
        available: u32,
    },
    #[error("task {task} is exclusively owned by session {owner}")]
    OwnershipHeld { task: TaskId, owner: SessionId },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("conflict {0} requires a manual resolution payload")]
    ManualResolutionRequired(String),
    #[error("engine is read-only after repeated persistence failures")]
    ReadOnly,
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error("snapshot error: {0}")]
    Snapshot(#[from] foreman_storage::SnapshotError),
    #[error("txn log error: {0}")]
    TxnLog(#[from] foreman_storage::TxnLogError),
    #[error("store error: {0}")]
    Store(#[from] foreman_storage::StoreError),
}

impl EngineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownTask(_) => "unknown_task",
            EngineError::DuplicateTask(_) => "duplicate_task",
            EngineError::UnknownEdge(..) => "unknown_edge",
            EngineError::UnknownSnapshot(_) => "unknown_snapshot",
            EngineError::UnknownExecutor(_) => "unknown_executor",
            EngineError::UnknownConflict(_) => "unknown_conflict",
            EngineError::CycleWouldForm { .. } => "cycle_would_form",
            EngineError::InsufficientCapacity { .. } => "insufficient_capacity",
            EngineError::OwnershipHeld { .. } => "ownership_held",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::ManualResolutionRequired(_) => "manual_resolution_required",
            EngineError::ReadOnly => "read_only",
            EngineError::ShuttingDown => "shutting_down",
            EngineError::Snapshot(_) => "snapshot_error",
            EngineError::TxnLog(_) => "txn_log_error",
            EngineError::Store(_) => "store_error",
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::UnknownTask(id) => EngineError::UnknownTask(id),
            GraphError::CycleWouldForm { path } | GraphError::Cyclic { path } => {
                EngineError::CycleWouldForm { path }
            }
            GraphError::UnknownEdge(a, b) => EngineError::UnknownEdge(a, b),
        }
    }
}

impl From<ResourceError> for EngineError {
    fn from(e: ResourceError) -> Self {
        match e {
            ResourceError::Insufficient {
                kind,
                requested,
                available,
            } => EngineError::InsufficientCapacity {
                kind,
                requested,
                available,
            },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
