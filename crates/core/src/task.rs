// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task data model and status state machine.

use crate::clock::Clock;
use crate::dependency::{DependencyType, TaskLink};
use crate::resource::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a task.
    ///
    /// Each submitted task gets a unique ID used to track its state,
    /// query its status, and reference it in dependencies and logs.
    #[derive(Default)]
    pub struct TaskId;
}

/// Work category a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Feature,
    Bug,
    Test,
    Doc,
    Refactor,
    Security,
    Perf,
    Infra,
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskCategory::Feature => "feature",
            TaskCategory::Bug => "bug",
            TaskCategory::Test => "test",
            TaskCategory::Doc => "doc",
            TaskCategory::Refactor => "refactor",
            TaskCategory::Security => "security",
            TaskCategory::Perf => "perf",
            TaskCategory::Infra => "infra",
        };
        write!(f, "{}", s)
    }
}

/// Base priority bucket. The numeric value seeds dynamic priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Background,
}

impl PriorityBand {
    /// Numeric seed value for the band.
    pub fn value(&self) -> u32 {
        match self {
            PriorityBand::Critical => 1000,
            PriorityBand::High => 800,
            PriorityBand::Medium => 500,
            PriorityBand::Low => 200,
            PriorityBand::Background => 50,
        }
    }
}

impl fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorityBand::Critical => "critical",
            PriorityBand::High => "high",
            PriorityBand::Medium => "medium",
            PriorityBand::Low => "low",
            PriorityBand::Background => "background",
        };
        write!(f, "{}", s)
    }
}

/// Task lifecycle status.
///
/// Terminal states are `Completed`, `Failed`, and `Cancelled`. Re-entry
/// into `Pending` is only allowed from `Running` (retriable failure) and
/// `Blocked` (unblock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check whether a transition to `to` is allowed by the state machine.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Blocked)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Blocked)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Pending)
                | (Running, Cancelled)
                | (Blocked, Pending)
                | (Blocked, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Attempted status transition violates the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for task {task_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Admission gate evaluated before a pending task may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    /// Another task must have reached `Completed`.
    TaskCompleted { task: TaskId },
    /// The task may not start before this wall-clock instant.
    NotBefore { epoch_ms: u64 },
}

/// Check evaluated against the execution output after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Postcondition {
    /// The output object must contain this key.
    OutputContains { key: String },
}

impl Postcondition {
    /// Evaluate against an execution output value.
    pub fn holds(&self, output: &serde_json::Value) -> bool {
        match self {
            Postcondition::OutputContains { key } => {
                output.as_object().is_some_and(|o| o.contains_key(key))
            }
        }
    }
}

/// Multiplicative factors contributing to a task's dynamic priority.
///
/// All factors default to 1.0 (neutral). The priority engine fills these
/// in on every recompute so that `Status` can explain the current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityFactors {
    pub age: f64,
    pub user_importance: f64,
    pub system_criticality: f64,
    pub dependency_weight: f64,
    pub resource_availability: f64,
    pub execution_history: f64,
    pub critical_path: f64,
}

impl Default for PriorityFactors {
    fn default() -> Self {
        Self {
            age: 1.0,
            user_importance: 1.0,
            system_criticality: 1.0,
            dependency_weight: 1.0,
            resource_availability: 1.0,
            execution_history: 1.0,
            critical_path: 1.0,
        }
    }
}

impl PriorityFactors {
    /// Product of all factors.
    pub fn product(&self) -> f64 {
        self.age
            * self.user_importance
            * self.system_criticality
            * self.dependency_weight
            * self.resource_availability
            * self.execution_history
            * self.critical_path
    }
}

/// Default per-task execution timeout (5 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for creating a new task
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub base_priority: PriorityBand,
    pub executor_key: String,
    pub estimated_duration_ms: u64,
    pub timeout_ms: u64,
    pub fatal_on_timeout: bool,
    pub max_retries: u32,
    pub deadline_ms: Option<u64>,
    pub required_resources: Vec<ResourceSpec>,
    /// Edges created together with the task at submission.
    pub dependencies: Vec<TaskLink>,
    pub preconditions: Vec<Precondition>,
    pub postconditions: Vec<Postcondition>,
    pub batch_compatible: bool,
    pub batch_group: Option<String>,
    pub params: serde_json::Value,
    pub expected_output: Option<serde_json::Value>,
    pub user_importance: f64,
}

impl TaskConfig {
    /// Start building a task config with the required fields.
    pub fn builder(
        id: impl Into<String>,
        title: impl Into<String>,
        executor_key: impl Into<String>,
    ) -> TaskConfigBuilder {
        TaskConfigBuilder {
            config: TaskConfig {
                id: id.into(),
                title: title.into(),
                description: String::new(),
                category: TaskCategory::Feature,
                base_priority: PriorityBand::default(),
                executor_key: executor_key.into(),
                estimated_duration_ms: 60_000,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                fatal_on_timeout: false,
                max_retries: DEFAULT_MAX_RETRIES,
                deadline_ms: None,
                required_resources: Vec::new(),
                dependencies: Vec::new(),
                preconditions: Vec::new(),
                postconditions: Vec::new(),
                batch_compatible: false,
                batch_group: None,
                params: serde_json::Value::Null,
                expected_output: None,
                user_importance: 1.0,
            },
        }
    }
}

/// Builder for [`TaskConfig`].
#[derive(Debug, Clone)]
pub struct TaskConfigBuilder {
    config: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn category(mut self, category: TaskCategory) -> Self {
        self.config.category = category;
        self
    }

    pub fn base_priority(mut self, band: PriorityBand) -> Self {
        self.config.base_priority = band;
        self
    }

    pub fn estimated_duration_ms(mut self, ms: u64) -> Self {
        self.config.estimated_duration_ms = ms;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn fatal_on_timeout(mut self, fatal: bool) -> Self {
        self.config.fatal_on_timeout = fatal;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn deadline_ms(mut self, epoch_ms: u64) -> Self {
        self.config.deadline_ms = Some(epoch_ms);
        self
    }

    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.config.required_resources.push(spec);
        self
    }

    pub fn depends_on(mut self, task: impl Into<TaskId>, dep_type: DependencyType) -> Self {
        self.config.dependencies.push(TaskLink::new(task, dep_type));
        self
    }

    pub fn depends_on_optional(
        mut self,
        task: impl Into<TaskId>,
        dep_type: DependencyType,
    ) -> Self {
        self.config
            .dependencies
            .push(TaskLink::new(task, dep_type).optional());
        self
    }

    pub fn precondition(mut self, pre: Precondition) -> Self {
        self.config.preconditions.push(pre);
        self
    }

    pub fn postcondition(mut self, post: Postcondition) -> Self {
        self.config.postconditions.push(post);
        self
    }

    pub fn batch_group(mut self, group: impl Into<String>) -> Self {
        self.config.batch_compatible = true;
        self.config.batch_group = Some(group.into());
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.config.params = params;
        self
    }

    pub fn expected_output(mut self, expected: serde_json::Value) -> Self {
        self.config.expected_output = Some(expected);
        self
    }

    pub fn user_importance(mut self, importance: f64) -> Self {
        self.config.user_importance = importance;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.config
    }
}

fn default_dynamic_priority() -> f64 {
    PriorityBand::default().value() as f64
}

/// A unit of schedulable work.
///
/// Tasks carry data only; the work itself lives behind the `executor_key`,
/// resolved through the capability registry at dispatch time. This is what
/// lets a task survive a process restart: the key is persisted, the code
/// is re-registered by the embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: TaskCategory,
    pub base_priority: PriorityBand,
    pub status: TaskStatus,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    pub estimated_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    #[serde(default)]
    pub fatal_on_timeout: bool,
    #[serde(default)]
    pub required_resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub postconditions: Vec<Postcondition>,
    #[serde(default)]
    pub batch_compatible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_group: Option<String>,
    /// Key into the capability registry naming the `Execute` implementation.
    pub executor_key: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<serde_json::Value>,
    #[serde(default = "default_dynamic_priority")]
    pub dynamic_priority: f64,
    #[serde(default)]
    pub priority_factors: PriorityFactors,
    /// Client-supplied importance multiplier (default 1.0).
    #[serde(default = "one")]
    pub user_importance: f64,
    /// Reverse references: ids of tasks that depend on this one.
    /// Maintained by the dependency graph on edge mutation.
    #[serde(default)]
    pub dependents: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Monotonic mutation counter used for optimistic locking and
    /// version-based conflict resolution.
    #[serde(default)]
    pub version: u64,
}

fn one() -> f64 {
    1.0
}

impl Task {
    /// Create a new task in `Pending` state.
    pub fn new(config: TaskConfig, clock: &impl Clock) -> Self {
        Self::new_with_epoch_ms(config, clock.epoch_ms())
    }

    /// Create a new task with an explicit creation timestamp (for replay).
    pub fn new_with_epoch_ms(config: TaskConfig, epoch_ms: u64) -> Self {
        let dynamic_priority = config.base_priority.value() as f64;
        Self {
            id: TaskId::new(config.id),
            title: config.title,
            description: config.description,
            category: config.category,
            base_priority: config.base_priority,
            status: TaskStatus::Pending,
            created_at_ms: epoch_ms,
            scheduled_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            deadline_ms: config.deadline_ms,
            estimated_duration_ms: config.estimated_duration_ms,
            actual_duration_ms: None,
            retry_count: 0,
            max_retries: config.max_retries,
            timeout_ms: config.timeout_ms,
            fatal_on_timeout: config.fatal_on_timeout,
            required_resources: config.required_resources,
            preconditions: config.preconditions,
            postconditions: config.postconditions,
            batch_compatible: config.batch_compatible,
            batch_group: config.batch_group,
            executor_key: config.executor_key,
            params: config.params,
            expected_output: config.expected_output,
            dynamic_priority,
            priority_factors: PriorityFactors::default(),
            user_importance: config.user_importance,
            dependents: Vec::new(),
            error: None,
            version: 0,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status transition, updating timestamps and the version.
    ///
    /// Timestamps recorded: `Queued` sets `scheduled_at_ms`, `Running` sets
    /// `started_at_ms`, terminal states set `completed_at_ms` and (when a
    /// start is known) `actual_duration_ms`.
    pub fn transition(&mut self, to: TaskStatus, epoch_ms: u64) -> Result<(), InvalidTransition> {
        if !self.status.can_transition(to) {
            return Err(InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        match to {
            TaskStatus::Queued => self.scheduled_at_ms = Some(epoch_ms),
            TaskStatus::Running => self.started_at_ms = Some(epoch_ms),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at_ms = Some(epoch_ms);
                if let Some(started) = self.started_at_ms {
                    self.actual_duration_ms = Some(epoch_ms.saturating_sub(started));
                }
            }
            TaskStatus::Pending => {
                // Re-entry for retry or unblock: clear the stale start
                self.started_at_ms = None;
            }
            TaskStatus::Blocked => {}
        }
        self.status = to;
        self.version += 1;
        Ok(())
    }

    /// Record a retry attempt. Returns the new attempt count.
    pub fn record_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.version += 1;
        self.retry_count
    }

    /// Check whether another retry is allowed.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Milliseconds this task has been waiting since creation.
    pub fn waiting_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    /// Bump the version for a non-status mutation.
    pub fn touch(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
