// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic priority computation from weighted multiplicative factors.
//!
//! `dynamic_priority = clamp(1, 2000, base × Π factors)`. Every factor's
//! contribution is kept in an audit trail so `Status` can explain the
//! current value. A pluggable [`PriorityModel`] may override the product;
//! a missing or abstaining model falls through to the factor baseline.

use crate::graph::DependencyGraph;
use crate::resources::ResourceManager;
use foreman_core::{
    format_elapsed_ms, ExecutionRecord, PriorityFactors, Task, TaskCategory, TaskId, TaskStatus,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Dynamic priority bounds.
pub const MIN_PRIORITY: f64 = 1.0;
pub const MAX_PRIORITY: f64 = 2000.0;

/// Age factor cap (tasks stop gaining priority after two days waiting).
const AGE_CAP: f64 = 2.0;

/// Deadline pressure horizon: seven days.
const DEADLINE_HORIZON_MS: f64 = 7.0 * 24.0 * 3600.0 * 1000.0;

/// Most recent outcomes consulted per category.
const HISTORY_WINDOW: usize = 20;

/// Success-rate history of recent executions, bucketed by category.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    outcomes: HashMap<TaskCategory, VecDeque<bool>>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal outcome for a category.
    pub fn record(&mut self, category: TaskCategory, success: bool) {
        let bucket = self.outcomes.entry(category).or_default();
        bucket.push_back(success);
        while bucket.len() > HISTORY_WINDOW {
            bucket.pop_front();
        }
    }

    /// Success rate over the last (≤20) outcomes of similar tasks.
    /// `None` when no history exists for the category.
    pub fn success_rate(&self, category: TaskCategory) -> Option<f64> {
        let bucket = self.outcomes.get(&category)?;
        if bucket.is_empty() {
            return None;
        }
        let successes = bucket.iter().filter(|s| **s).count();
        Some(successes as f64 / bucket.len() as f64)
    }

    /// Rebuild from persisted execution records after a restore.
    pub fn rebuild(
        &mut self,
        tasks: &HashMap<String, Task>,
        records: &HashMap<String, Vec<ExecutionRecord>>,
    ) {
        self.outcomes.clear();
        // Records are stored per task in attempt order; replay them oldest
        // first so the window keeps the most recent outcomes.
        let mut all: Vec<(&ExecutionRecord, TaskCategory)> = Vec::new();
        for (task_id, recs) in records {
            let Some(task) = tasks.get(task_id) else {
                continue;
            };
            for rec in recs {
                if rec.finished_at_ms.is_some() {
                    all.push((rec, task.category));
                }
            }
        }
        all.sort_by_key(|(rec, _)| rec.finished_at_ms.unwrap_or(0));
        for (rec, category) in all {
            self.record(category, rec.succeeded());
        }
    }
}

/// Inputs the engine assembles for a recompute pass.
pub struct PriorityContext<'a> {
    pub tasks: &'a HashMap<String, Task>,
    pub graph: &'a DependencyGraph,
    pub resources: &'a ResourceManager,
    pub history: &'a ExecutionHistory,
    /// Members of the current critical path.
    pub critical_path: &'a HashSet<TaskId>,
    pub now_ms: u64,
}

/// Result of a recompute: the value, its factors, and the audit trail.
#[derive(Debug, Clone)]
pub struct PriorityDecision {
    pub dynamic_priority: f64,
    pub factors: PriorityFactors,
    pub audit: Vec<String>,
}

/// Hook for an adaptive model. The engine records (features, outcome)
/// pairs via `observe`; `predict` may override the baseline product.
/// Correctness never depends on a model being present.
pub trait PriorityModel: Send + Sync {
    /// Return a replacement priority, or `None` to use the baseline.
    fn predict(&self, _task: &Task, _factors: &PriorityFactors) -> Option<f64> {
        None
    }

    /// Observe a terminal outcome for future training.
    fn observe(&self, _task: &Task, _record: &ExecutionRecord) {}
}

/// Default model: abstains from every prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineModel;

impl PriorityModel for BaselineModel {}

/// Computes dynamic priority per task.
pub struct PriorityEngine {
    model: Box<dyn PriorityModel>,
    critical_path_boost: bool,
}

impl Default for PriorityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityEngine {
    pub fn new() -> Self {
        Self {
            model: Box::new(BaselineModel),
            critical_path_boost: true,
        }
    }

    pub fn with_model(model: Box<dyn PriorityModel>) -> Self {
        Self {
            model,
            critical_path_boost: true,
        }
    }

    pub fn set_critical_path_boost(&mut self, enabled: bool) {
        self.critical_path_boost = enabled;
    }

    /// Forward a terminal outcome to the model.
    pub fn observe(&self, task: &Task, record: &ExecutionRecord) {
        self.model.observe(task, record);
    }

    /// Recompute a task's dynamic priority. Deterministic for identical
    /// inputs; increasing wait time never decreases the result.
    pub fn recompute(&self, task: &Task, ctx: &PriorityContext<'_>) -> PriorityDecision {
        let mut audit = Vec::new();

        // Age: 1 + hours-waiting / 24, capped
        let waited_ms = task.waiting_ms(ctx.now_ms);
        let hours_waiting = waited_ms as f64 / 3_600_000.0;
        let age = (1.0 + hours_waiting / 24.0).min(AGE_CAP);
        audit.push(format!(
            "age: waited {} -> x{:.3}",
            format_elapsed_ms(waited_ms),
            age
        ));

        // Client-supplied importance
        let user_importance = task.user_importance;
        audit.push(format!("user importance: x{:.3}", user_importance));

        // Deadline pressure over a seven-day horizon; overdue tasks keep
        // climbing past 1.0, floor at 0.5 for far-future deadlines
        let system_criticality = match task.deadline_ms {
            Some(deadline) => {
                let remaining_ms = deadline as f64 - ctx.now_ms as f64;
                let factor = (1.0 - remaining_ms / DEADLINE_HORIZON_MS).max(0.5);
                audit.push(format!("deadline pressure: x{:.3}", factor));
                factor
            }
            None => 1.0,
        };

        // 1 + 0.1 per pending task blocked on this one
        let blocked_pending = ctx
            .graph
            .ordering_dependents(&task.id)
            .iter()
            .filter(|id| {
                ctx.tasks
                    .get(id.as_str())
                    .is_some_and(|t| {
                        matches!(
                            t.status,
                            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Blocked
                        )
                    })
            })
            .count();
        let dependency_weight = 1.0 + 0.1 * blocked_pending as f64;
        if blocked_pending > 0 {
            audit.push(format!(
                "dependency weight: {} waiting -> x{:.3}",
                blocked_pending, dependency_weight
            ));
        }

        // Product over required resources of available/total
        let resource_availability = ctx.resources.availability_factor(task);
        if !task.required_resources.is_empty() {
            audit.push(format!(
                "resource availability: x{:.3}",
                resource_availability
            ));
        }

        // 0.5 + 0.5 x recent success rate of similar tasks
        let execution_history = match ctx.history.success_rate(task.category) {
            Some(rate) => {
                let factor = 0.5 + 0.5 * rate;
                audit.push(format!(
                    "history: {:.0}% success for {} -> x{:.3}",
                    rate * 100.0,
                    task.category,
                    factor
                ));
                factor
            }
            None => 1.0,
        };

        let critical_path = if self.critical_path_boost && ctx.critical_path.contains(&task.id) {
            audit.push("critical path: x2.000".to_string());
            2.0
        } else {
            1.0
        };

        let factors = PriorityFactors {
            age,
            user_importance,
            system_criticality,
            dependency_weight,
            resource_availability,
            execution_history,
            critical_path,
        };

        let base = task.base_priority.value() as f64;
        let baseline = base * factors.product();

        let raw = match self.model.predict(task, &factors) {
            Some(predicted) if predicted.is_finite() => {
                audit.push(format!("model override: {:.1}", predicted));
                predicted
            }
            _ => baseline,
        };

        let dynamic_priority = raw.clamp(MIN_PRIORITY, MAX_PRIORITY);
        audit.push(format!(
            "base {} x {:.4} = {:.1}",
            base,
            factors.product(),
            dynamic_priority
        ));

        PriorityDecision {
            dynamic_priority,
            factors,
            audit,
        }
    }
}

#[cfg(test)]
#[path = "priority_tests.rs"]
mod tests;
