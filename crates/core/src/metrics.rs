// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue-level counters, persisted with every snapshot.

use serde::{Deserialize, Serialize};

/// Cumulative counters for queue activity.
///
/// All handlers increment on state transition only, so replaying the same
/// event twice does not double-count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    #[serde(default)]
    pub submitted: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub cancelled: u64,
    #[serde(default)]
    pub retried: u64,
    #[serde(default)]
    pub timeouts: u64,
    #[serde(default)]
    pub conflicts_detected: u64,
    #[serde(default)]
    pub conflicts_resolved: u64,
    #[serde(default)]
    pub snapshots_created: u64,
    /// Forced resource releases after a cancellation grace window expired.
    #[serde(default)]
    pub resource_leaks: u64,
}

impl QueueMetrics {
    /// Tasks that reached any terminal state.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
