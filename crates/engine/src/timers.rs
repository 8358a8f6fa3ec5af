// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer management for the coordination loop.
//!
//! Timers are keyed by string ids with conventional prefixes
//! (`retry:<task>`, `heartbeat`, `snapshot`), so related timers can be
//! cancelled by prefix when a task reaches a terminal state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timer entry
#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
}

/// Manages timers for the engine loop
#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: HashMap<String, Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or reset) a timer.
    pub fn set(&mut self, id: impl Into<String>, duration: Duration, now: Instant) {
        let fires_at = now + duration;
        self.timers.insert(id.into(), Timer { fires_at });
    }

    /// Cancel a timer.
    pub fn cancel(&mut self, id: &str) {
        self.timers.remove(id);
    }

    /// Cancel all timers matching a prefix.
    pub fn cancel_prefix(&mut self, prefix: &str) {
        self.timers.retain(|id, _| !id.starts_with(prefix));
    }

    /// Pop the ids of all timers that have fired.
    pub fn fired(&mut self, now: Instant) -> Vec<String> {
        let mut fired: Vec<String> = self
            .timers
            .iter()
            .filter(|(_, t)| t.fires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        fired.sort();
        for id in &fired {
            self.timers.remove(id);
        }
        fired
    }

    /// Next timer fire time.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
