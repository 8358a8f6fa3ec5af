// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events emitted by the scheduler.
//!
//! Serializes with `{"type": "task:started", ...fields}` format. Events
//! are facts about what happened; subscribers observe them through the
//! event bus, which applies back-pressure per [`Event::is_critical`].

use crate::dependency::{DependencyType, EdgeId};
use crate::session::SessionId;
use crate::task::{PriorityBand, TaskCategory, TaskId};
use serde::{Deserialize, Serialize};

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Automatic,
    Manual,
    CrashRecovery,
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotKind::Automatic => "automatic",
            SnapshotKind::Manual => "manual",
            SnapshotKind::CrashRecovery => "crash_recovery",
        };
        write!(f, "{}", s)
    }
}

/// Events describing task, dependency, snapshot, session, and conflict
/// lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- task --
    #[serde(rename = "task:submitted")]
    TaskSubmitted {
        id: TaskId,
        title: String,
        category: TaskCategory,
        base_priority: PriorityBand,
    },

    #[serde(rename = "task:queued")]
    TaskQueued { id: TaskId },

    #[serde(rename = "task:started")]
    TaskStarted {
        id: TaskId,
        session_id: SessionId,
        /// Zero-based attempt index.
        attempt: u32,
    },

    /// Progress report from a running capability. Non-critical: the bus
    /// drops the oldest buffered progress event under back-pressure.
    #[serde(rename = "task:progress")]
    TaskProgress {
        id: TaskId,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    #[serde(rename = "task:completed")]
    TaskCompleted { id: TaskId, duration_ms: u64 },

    #[serde(rename = "task:failed")]
    TaskFailed {
        id: TaskId,
        /// Stable error code for the terminal failure.
        code: String,
        error: String,
        attempts: u32,
    },

    #[serde(rename = "task:retrying")]
    TaskRetrying {
        id: TaskId,
        attempt: u32,
        backoff_ms: u64,
    },

    #[serde(rename = "task:cancelled")]
    TaskCancelled { id: TaskId, reason: String },

    // -- dependency --
    #[serde(rename = "dependency:added")]
    DependencyAdded {
        id: EdgeId,
        dependent: TaskId,
        depends_on: TaskId,
        dep_type: DependencyType,
    },

    #[serde(rename = "dependency:removed")]
    DependencyRemoved {
        dependent: TaskId,
        depends_on: TaskId,
    },

    /// A cycle was found on the ordering subgraph. The path lists the
    /// nodes in order with the revisited node repeated at the end.
    #[serde(rename = "cycle:detected")]
    CycleDetected { path: Vec<TaskId> },

    // -- persistence --
    #[serde(rename = "snapshot:created")]
    SnapshotCreated {
        id: String,
        kind: SnapshotKind,
        task_count: usize,
        size_bytes: u64,
    },

    #[serde(rename = "snapshot:restored")]
    SnapshotRestored { id: String },

    // -- session --
    /// Heartbeat tick. Non-critical: drop-oldest under back-pressure.
    #[serde(rename = "session:heartbeat")]
    SessionHeartbeat { id: SessionId },

    #[serde(rename = "session:crashed")]
    SessionCrashed { id: SessionId },

    // -- conflict --
    #[serde(rename = "conflict:detected")]
    ConflictDetected {
        id: String,
        entity_kind: String,
        entity_id: String,
        sessions: Vec<SessionId>,
    },

    #[serde(rename = "conflict:resolved")]
    ConflictResolved {
        id: String,
        strategy: String,
        winner: SessionId,
    },
}

impl Event {
    /// Short name of the event variant (matches the serialized tag).
    pub fn name(&self) -> &'static str {
        match self {
            Event::TaskSubmitted { .. } => "task:submitted",
            Event::TaskQueued { .. } => "task:queued",
            Event::TaskStarted { .. } => "task:started",
            Event::TaskProgress { .. } => "task:progress",
            Event::TaskCompleted { .. } => "task:completed",
            Event::TaskFailed { .. } => "task:failed",
            Event::TaskRetrying { .. } => "task:retrying",
            Event::TaskCancelled { .. } => "task:cancelled",
            Event::DependencyAdded { .. } => "dependency:added",
            Event::DependencyRemoved { .. } => "dependency:removed",
            Event::CycleDetected { .. } => "cycle:detected",
            Event::SnapshotCreated { .. } => "snapshot:created",
            Event::SnapshotRestored { .. } => "snapshot:restored",
            Event::SessionHeartbeat { .. } => "session:heartbeat",
            Event::SessionCrashed { .. } => "session:crashed",
            Event::ConflictDetected { .. } => "conflict:detected",
            Event::ConflictResolved { .. } => "conflict:resolved",
        }
    }

    /// Critical events must not be silently dropped by the bus; the
    /// publisher blocks (with a timeout) until buffer space frees up.
    /// Progress and heartbeat chatter is droppable.
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            Event::TaskProgress { .. } | Event::SessionHeartbeat { .. }
        )
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskSubmitted { id, .. }
            | Event::TaskQueued { id }
            | Event::TaskStarted { id, .. }
            | Event::TaskProgress { id, .. }
            | Event::TaskCompleted { id, .. }
            | Event::TaskFailed { id, .. }
            | Event::TaskRetrying { id, .. }
            | Event::TaskCancelled { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
