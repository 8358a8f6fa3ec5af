// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory optimizer: periodic re-analysis of execution telemetry.
//!
//! The optimizer only *recommends*; it never mutates scheduler state.
//! The engine surfaces its output; the embedder decides what to apply.

use crate::resources::ResourceManager;
use foreman_core::{ExecutionRecord, QueueMetrics, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a recommendation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ConcurrencyCeiling,
    PoolCapacity,
    RetryCeiling,
    TimeoutBudget,
    SnapshotCadence,
}

impl fmt::Display for RecommendationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendationKind::ConcurrencyCeiling => "concurrency_ceiling",
            RecommendationKind::PoolCapacity => "pool_capacity",
            RecommendationKind::RetryCeiling => "retry_ceiling",
            RecommendationKind::TimeoutBudget => "timeout_budget",
            RecommendationKind::SnapshotCadence => "snapshot_cadence",
        };
        write!(f, "{}", s)
    }
}

/// A single advisory finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    /// What the recommendation targets (a pool key, a category, or
    /// `"engine"`).
    pub target: String,
    pub current: f64,
    pub suggested: f64,
    pub rationale: String,
}

/// Tunable analysis thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Optimizer {
    /// Pool utilization above which more capacity is suggested.
    pub saturation_threshold: f64,
    /// Fraction of timed-out attempts above which budgets look too tight.
    pub timeout_threshold: f64,
    /// Category failure rate above which retries are reconsidered.
    pub failure_threshold: f64,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            saturation_threshold: 0.85,
            timeout_threshold: 0.2,
            failure_threshold: 0.5,
        }
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze current telemetry into recommendations.
    pub fn analyze(
        &self,
        tasks: &HashMap<String, Task>,
        records: &HashMap<String, Vec<ExecutionRecord>>,
        metrics: &QueueMetrics,
        resources: &ResourceManager,
        max_concurrent: usize,
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();

        self.analyze_backlog(tasks, resources, max_concurrent, &mut out);
        self.analyze_pools(resources, &mut out);
        self.analyze_failures(tasks, records, &mut out);
        self.analyze_timeouts(records, metrics, &mut out);
        self.analyze_snapshots(metrics, &mut out);

        out
    }

    /// A deep pending backlog with idle pools suggests a higher ceiling.
    fn analyze_backlog(
        &self,
        tasks: &HashMap<String, Task>,
        resources: &ResourceManager,
        max_concurrent: usize,
        out: &mut Vec<Recommendation>,
    ) {
        let pending = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        let running = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count();

        let pools_idle = resources
            .utilization()
            .iter()
            .all(|(_, ratio)| *ratio < 0.5);

        if pending > max_concurrent * 4 && running == max_concurrent && pools_idle {
            out.push(Recommendation {
                kind: RecommendationKind::ConcurrencyCeiling,
                target: "engine".to_string(),
                current: max_concurrent as f64,
                suggested: (max_concurrent + max_concurrent / 2 + 1) as f64,
                rationale: format!(
                    "{} pending tasks queue behind a full ceiling of {} while pools sit under 50% utilization",
                    pending, max_concurrent
                ),
            });
        }
    }

    /// Saturated pools gate admission; suggest capacity.
    fn analyze_pools(&self, resources: &ResourceManager, out: &mut Vec<Recommendation>) {
        for (kind, ratio) in resources.utilization() {
            if ratio >= self.saturation_threshold {
                let capacity = resources.capacity(&kind).unwrap_or(0);
                out.push(Recommendation {
                    kind: RecommendationKind::PoolCapacity,
                    target: kind.to_string(),
                    current: capacity as f64,
                    suggested: (capacity + capacity.div_ceil(4).max(1)) as f64,
                    rationale: format!(
                        "pool '{}' runs at {:.0}% allocation",
                        kind,
                        ratio * 100.0
                    ),
                });
            }
        }
    }

    /// Categories that exhaust retries are burning attempts.
    fn analyze_failures(
        &self,
        tasks: &HashMap<String, Task>,
        records: &HashMap<String, Vec<ExecutionRecord>>,
        out: &mut Vec<Recommendation>,
    ) {
        let mut per_category: HashMap<String, (usize, usize, u32)> = HashMap::new();
        for (task_id, recs) in records {
            let Some(task) = tasks.get(task_id) else {
                continue;
            };
            let entry = per_category
                .entry(task.category.to_string())
                .or_insert((0, 0, 0));
            for rec in recs {
                if rec.finished_at_ms.is_none() {
                    continue;
                }
                entry.0 += 1;
                if rec.status == TaskStatus::Failed {
                    entry.1 += 1;
                }
            }
            entry.2 = entry.2.max(task.max_retries);
        }

        for (category, (total, failed, max_retries)) in per_category {
            if total < 5 {
                continue; // not enough signal
            }
            let rate = failed as f64 / total as f64;
            if rate >= self.failure_threshold {
                out.push(Recommendation {
                    kind: RecommendationKind::RetryCeiling,
                    target: category.clone(),
                    current: max_retries as f64,
                    suggested: (max_retries.saturating_sub(1).max(1)) as f64,
                    rationale: format!(
                        "category '{}' fails {:.0}% of terminal attempts; retries amplify the load",
                        category,
                        rate * 100.0
                    ),
                });
            }
        }
    }

    /// A high share of timeouts suggests budgets are too tight.
    fn analyze_timeouts(
        &self,
        records: &HashMap<String, Vec<ExecutionRecord>>,
        metrics: &QueueMetrics,
        out: &mut Vec<Recommendation>,
    ) {
        let finished: usize = records
            .values()
            .flat_map(|v| v.iter())
            .filter(|r| r.finished_at_ms.is_some())
            .count();
        if finished < 5 {
            return;
        }
        let timeout_share = metrics.timeouts as f64 / finished as f64;
        if timeout_share >= self.timeout_threshold {
            out.push(Recommendation {
                kind: RecommendationKind::TimeoutBudget,
                target: "engine".to_string(),
                current: timeout_share,
                suggested: self.timeout_threshold,
                rationale: format!(
                    "{:.0}% of attempts hit their timeout; consider longer per-task budgets",
                    timeout_share * 100.0
                ),
            });
        }
    }

    /// Little terminal progress between snapshots wastes I/O.
    fn analyze_snapshots(&self, metrics: &QueueMetrics, out: &mut Vec<Recommendation>) {
        if metrics.snapshots_created < 10 {
            return;
        }
        let per_snapshot = metrics.terminal() as f64 / metrics.snapshots_created as f64;
        if per_snapshot < 1.0 {
            out.push(Recommendation {
                kind: RecommendationKind::SnapshotCadence,
                target: "engine".to_string(),
                current: per_snapshot,
                suggested: 1.0,
                rationale: format!(
                    "{} snapshots cover only {} terminal tasks; the cadence can relax",
                    metrics.snapshots_created,
                    metrics.terminal()
                ),
            });
        }
    }
}

#[cfg(test)]
#[path = "optimizer_tests.rs"]
mod tests;
