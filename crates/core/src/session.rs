// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records and task ownership.
//!
//! A session is a process-level owner of mutations, kept alive by
//! heartbeats. Ownership binds a task to the session working on it;
//! exclusive by default.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a scheduler session.
    pub struct SessionId;
}

/// Liveness status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Inactive,
    Crashed,
    Terminated,
}

impl SessionStatus {
    /// A live session may hold ownership and emit heartbeats.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive => "inactive",
            SessionStatus::Crashed => "crashed",
            SessionStatus::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// A scheduler session: one process-level owner of mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: String,
    pub started_at_ms: u64,
    pub last_heartbeat_ms: u64,
    pub status: SessionStatus,
    #[serde(default)]
    pub tasks_processed: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub operations: u64,
    /// Set when the session shut down gracefully; crash detection only
    /// applies to sessions without this marker.
    #[serde(default)]
    pub graceful_shutdown: bool,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, agent_id: impl Into<String>, epoch_ms: u64) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            started_at_ms: epoch_ms,
            last_heartbeat_ms: epoch_ms,
            status: SessionStatus::Active,
            tasks_processed: 0,
            errors: 0,
            operations: 0,
            graceful_shutdown: false,
        }
    }

    /// Record a heartbeat, reviving an inactive session.
    pub fn heartbeat(&mut self, epoch_ms: u64) {
        self.last_heartbeat_ms = epoch_ms;
        if self.status == SessionStatus::Inactive {
            self.status = SessionStatus::Active;
        }
    }

    /// Milliseconds since the last heartbeat.
    pub fn silent_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_heartbeat_ms)
    }

    pub fn note_task(&mut self) {
        self.tasks_processed += 1;
    }

    pub fn note_error(&mut self) {
        self.errors += 1;
    }

    pub fn note_operation(&mut self) {
        self.operations += 1;
    }
}

/// Access mode of an ownership binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    #[default]
    Exclusive,
    Shared,
    ReadOnly,
}

/// A transient binding of a task to the session (and agent) working on it.
///
/// At most one exclusive holder exists per task; the registry enforces
/// this on acquire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOwnership {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub agent_id: String,
    pub acquired_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default)]
    pub mode: OwnershipMode,
    /// Parent task whose lock this one was acquired under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,
}

impl TaskOwnership {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|e| now_ms >= e)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
