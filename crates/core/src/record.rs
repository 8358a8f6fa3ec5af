// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution records: one row per attempt the harness ran.

use crate::resource::ResourceSpec;
use crate::task::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a single execution attempt.
    pub struct ExecutionId;
}

/// Outcome of one execution attempt of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub execution_id: ExecutionId,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Terminal status of this attempt (`Completed`, `Failed`, `Cancelled`,
    /// or `Pending` when the attempt ended in a retriable failure).
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Zero-based attempt index (0 = first run).
    #[serde(default)]
    pub attempt: u32,
    /// Resources that were held while the attempt ran.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

impl ExecutionRecord {
    /// Open a record at dispatch time; finalized by [`Self::finish`].
    pub fn begin(
        task_id: TaskId,
        execution_id: ExecutionId,
        attempt: u32,
        resources: Vec<ResourceSpec>,
        epoch_ms: u64,
    ) -> Self {
        Self {
            task_id,
            execution_id,
            started_at_ms: epoch_ms,
            finished_at_ms: None,
            duration_ms: None,
            status: TaskStatus::Running,
            error: None,
            attempt,
            resources,
        }
    }

    /// Finalize the record with an outcome.
    pub fn finish(&mut self, status: TaskStatus, error: Option<String>, epoch_ms: u64) {
        self.finished_at_ms = Some(epoch_ms);
        self.duration_ms = Some(epoch_ms.saturating_sub(self.started_at_ms));
        self.status = status;
        self.error = error;
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
