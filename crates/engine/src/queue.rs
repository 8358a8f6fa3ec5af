// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue core: the task map, the running set, and admission decisions.
//!
//! All mutation goes through here, under the engine's coordination lock,
//! so admission decisions always observe a consistent view of (tasks,
//! graph, resources). Status transitions are validated against the task
//! state machine and therefore linearizable per task id.

use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::priority::ExecutionHistory;
use crate::resources::ResourceManager;
use foreman_core::{
    ExecutionRecord, Precondition, QueueMetrics, Task, TaskDependency, TaskId, TaskStatus,
};
use std::collections::{HashMap, HashSet};

/// Outcome classification for a finished failing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-enter `pending` after the given backoff.
    Retry { attempt: u32, backoff_ms: u64 },
    /// Retries exhausted or error fatal: task is `failed`.
    Terminal,
}

/// Holds all tasks and the structures admission consults.
pub struct QueueCore {
    tasks: HashMap<String, Task>,
    graph: DependencyGraph,
    resources: ResourceManager,
    running: HashSet<String>,
    execution_records: HashMap<String, Vec<ExecutionRecord>>,
    outputs: HashMap<String, serde_json::Value>,
    progress: HashMap<String, u8>,
    /// Earliest epoch-ms a retrying task may be admitted again.
    retry_after: HashMap<String, u64>,
    metrics: QueueMetrics,
    history: ExecutionHistory,
}

impl QueueCore {
    pub fn new(resources: ResourceManager) -> Self {
        Self {
            tasks: HashMap::new(),
            graph: DependencyGraph::new(),
            resources,
            running: HashSet::new(),
            execution_records: HashMap::new(),
            outputs: HashMap::new(),
            progress: HashMap::new(),
            retry_after: HashMap::new(),
            metrics: QueueMetrics::default(),
            history: ExecutionHistory::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn tasks(&self) -> &HashMap<String, Task> {
        &self.tasks
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceManager {
        &mut self.resources
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ExecutionHistory {
        &mut self.history
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut QueueMetrics {
        &mut self.metrics
    }

    pub fn running(&self) -> &HashSet<String> {
        &self.running
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id.as_str())
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.as_str())
    }

    pub fn require(&self, id: &TaskId) -> Result<&Task, EngineError> {
        self.tasks
            .get(id.as_str())
            .ok_or_else(|| EngineError::UnknownTask(id.clone()))
    }

    pub fn records_for(&self, id: &TaskId) -> &[ExecutionRecord] {
        self.execution_records
            .get(id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn execution_records(&self) -> &HashMap<String, Vec<ExecutionRecord>> {
        &self.execution_records
    }

    pub fn output_of(&self, id: &TaskId) -> Option<&serde_json::Value> {
        self.outputs.get(id.as_str())
    }

    pub fn progress_of(&self, id: &TaskId) -> Option<u8> {
        self.progress.get(id.as_str()).copied()
    }

    pub fn set_progress(&mut self, id: &TaskId, percent: u8) {
        self.progress.insert(id.to_string(), percent.min(100));
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Insert a new task.
    pub fn insert_task(&mut self, task: Task) -> Result<(), EngineError> {
        if self.tasks.contains_key(task.id.as_str()) {
            return Err(EngineError::DuplicateTask(task.id));
        }
        self.graph.add_task(&task);
        self.metrics.submitted += 1;
        self.tasks.insert(task.id.to_string(), task);
        Ok(())
    }

    /// Add a dependency edge, blocking the dependent if its predecessor
    /// has not completed yet.
    pub fn add_dependency(&mut self, dep: TaskDependency, now_ms: u64) -> Result<(), EngineError> {
        let dependent_id = dep.dependent.clone();
        let depends_on_id = dep.depends_on.clone();
        if !self.tasks.contains_key(dependent_id.as_str()) {
            return Err(EngineError::UnknownTask(dependent_id));
        }
        if !self.tasks.contains_key(depends_on_id.as_str()) {
            return Err(EngineError::UnknownTask(depends_on_id));
        }

        let is_ordering = dep.dep_type.is_ordering();
        self.graph.add_edge(dep)?;

        // Maintain the reverse reference on the dependency target
        if let Some(target) = self.tasks.get_mut(depends_on_id.as_str()) {
            if !target.dependents.contains(&dependent_id) {
                target.dependents.push(dependent_id.clone());
                target.touch();
            }
        }

        // An unfinished ordering predecessor parks the dependent
        if is_ordering {
            let pred_done = self
                .tasks
                .get(depends_on_id.as_str())
                .is_some_and(|t| t.status == TaskStatus::Completed);
            if !pred_done {
                if let Some(dependent) = self.tasks.get_mut(dependent_id.as_str()) {
                    if matches!(dependent.status, TaskStatus::Pending | TaskStatus::Queued) {
                        dependent.transition(TaskStatus::Blocked, now_ms)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Remove all edges between the pair and unpark the dependent if its
    /// remaining predecessors are satisfied.
    pub fn remove_dependency(
        &mut self,
        dependent: &TaskId,
        depends_on: &TaskId,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        self.graph.remove_edge(dependent, depends_on)?;

        if let Some(target) = self.tasks.get_mut(depends_on.as_str()) {
            target.dependents.retain(|d| d != dependent);
            target.touch();
        }

        self.maybe_unblock(dependent, now_ms)?;
        Ok(())
    }

    /// Whether every ordering predecessor allows this task to run now.
    fn predecessors_satisfied(&self, task: &Task, now_ms: u64) -> bool {
        for edge in self.graph.ordering_edges_of(&task.id) {
            let Some(pred) = self.tasks.get(edge.depends_on.as_str()) else {
                continue; // predecessor no longer known
            };
            match pred.status {
                TaskStatus::Completed => {
                    if let (Some(delay), Some(done_at)) = (edge.min_delay_ms, pred.completed_at_ms)
                    {
                        if now_ms < done_at + delay {
                            return false;
                        }
                    }
                }
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    // Optional edges tolerate an unsuccessful predecessor
                    if !edge.optional {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    fn preconditions_hold(&self, task: &Task, now_ms: u64) -> bool {
        task.preconditions.iter().all(|pre| match pre {
            Precondition::TaskCompleted { task: other } => self
                .tasks
                .get(other.as_str())
                .is_some_and(|t| t.status == TaskStatus::Completed),
            Precondition::NotBefore { epoch_ms } => now_ms >= *epoch_ms,
        })
    }

    /// Whether a task could be admitted right now (ignoring the
    /// concurrency ceiling and resource budget).
    pub fn is_eligible(&self, task: &Task, now_ms: u64) -> bool {
        let backoff_elapsed = !self
            .retry_after
            .get(task.id.as_str())
            .is_some_and(|t| now_ms < *t);
        task.status == TaskStatus::Pending
            && backoff_elapsed
            && self.predecessors_satisfied(task, now_ms)
            && self.preconditions_hold(task, now_ms)
    }

    /// Select the next admission batch, walking `order`.
    ///
    /// Honors the concurrency ceiling and the resource budget. When the
    /// first selected task is batch-compatible, other eligible tasks from
    /// the same batch group and category join the same admission step.
    pub fn select_admissions(
        &self,
        order: &[TaskId],
        max_concurrent: usize,
        now_ms: u64,
    ) -> Vec<TaskId> {
        let mut selected: Vec<TaskId> = Vec::new();
        let mut slots = max_concurrent.saturating_sub(self.running.len());
        if slots == 0 {
            return selected;
        }

        // Simulated pool headroom so one batch cannot oversubscribe
        let mut planned: HashMap<foreman_core::ResourceKind, u32> = HashMap::new();
        let fits = |task: &Task, planned: &HashMap<foreman_core::ResourceKind, u32>| {
            task.required_resources.iter().all(|spec| {
                match self.resources.available(&spec.kind) {
                    Some(available) => {
                        let committed = planned.get(&spec.kind).copied().unwrap_or(0);
                        available.saturating_sub(committed) >= spec.units
                    }
                    None => true,
                }
            })
        };
        let commit = |task: &Task, planned: &mut HashMap<foreman_core::ResourceKind, u32>| {
            for spec in &task.required_resources {
                if self.resources.capacity(&spec.kind).is_some() {
                    *planned.entry(spec.kind.clone()).or_insert(0) += spec.units;
                }
            }
        };

        let mut batch_key: Option<(String, foreman_core::TaskCategory)> = None;

        for id in order {
            if slots == 0 {
                break;
            }
            let Some(task) = self.tasks.get(id.as_str()) else {
                continue;
            };
            if selected.contains(id) || !self.is_eligible(task, now_ms) {
                continue;
            }
            // Conflicting with anything already running or selected?
            let conflicted = self
                .running
                .iter()
                .map(|r| TaskId::new(r.clone()))
                .chain(selected.iter().cloned())
                .any(|other| self.graph.conflicts_with(id, &other));
            if conflicted {
                continue;
            }
            if !fits(task, &planned) {
                continue;
            }

            // Batching: after the first batch-compatible selection, only
            // same-group same-category tasks extend the step
            if let Some((group, category)) = &batch_key {
                let same_batch = task.batch_compatible
                    && task.batch_group.as_deref() == Some(group.as_str())
                    && task.category == *category;
                if !same_batch {
                    continue;
                }
            }

            if batch_key.is_none() && task.batch_compatible {
                if let Some(group) = &task.batch_group {
                    batch_key = Some((group.clone(), task.category));
                }
            }

            commit(task, &mut planned);
            selected.push(id.clone());
            slots -= 1;
        }

        selected
    }

    /// Transition pending → queued (admission step 1).
    pub fn mark_queued(&mut self, id: &TaskId, now_ms: u64) -> Result<(), EngineError> {
        let task = self
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;
        task.transition(TaskStatus::Queued, now_ms)?;
        Ok(())
    }

    /// Transition queued → running and join the running set.
    ///
    /// Returns the attempt index for this execution.
    pub fn mark_running(&mut self, id: &TaskId, now_ms: u64) -> Result<u32, EngineError> {
        let task = self
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;
        task.transition(TaskStatus::Running, now_ms)?;
        let attempt = task.retry_count;
        self.running.insert(id.to_string());
        self.retry_after.remove(id.as_str());
        Ok(attempt)
    }

    /// Record the opening of an execution attempt.
    pub fn push_record(&mut self, record: ExecutionRecord) {
        self.execution_records
            .entry(record.task_id.to_string())
            .or_default()
            .push(record);
    }

    /// Finalize the latest open record for a task.
    pub fn finish_record(
        &mut self,
        id: &TaskId,
        status: TaskStatus,
        error: Option<String>,
        now_ms: u64,
    ) {
        if let Some(records) = self.execution_records.get_mut(id.as_str()) {
            if let Some(open) = records.iter_mut().rev().find(|r| r.finished_at_ms.is_none()) {
                open.finish(status, error, now_ms);
            }
        }
    }

    /// Complete a running task; returns dependents that became unblocked.
    pub fn finish_success(
        &mut self,
        id: &TaskId,
        output: serde_json::Value,
        now_ms: u64,
    ) -> Result<Vec<TaskId>, EngineError> {
        {
            let task = self
                .tasks
                .get_mut(id.as_str())
                .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;
            task.transition(TaskStatus::Completed, now_ms)?;
            let category = task.category;
            self.history.record(category, true);
        }
        self.running.remove(id.as_str());
        self.progress.insert(id.to_string(), 100);
        self.outputs.insert(id.to_string(), output);
        self.metrics.completed += 1;
        self.finish_record(id, TaskStatus::Completed, None, now_ms);

        self.unblock_dependents(id, now_ms)
    }

    /// Fail a running attempt; classifies retry vs terminal.
    pub fn finish_failure(
        &mut self,
        id: &TaskId,
        error: String,
        retriable: bool,
        now_ms: u64,
    ) -> Result<FailureDisposition, EngineError> {
        let disposition = {
            let task = self
                .tasks
                .get_mut(id.as_str())
                .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;

            if retriable && task.retries_remaining() {
                let attempt = task.record_retry();
                task.transition(TaskStatus::Pending, now_ms)?;
                task.error = Some(error.clone());
                // Backoff keyed by the attempt that just failed (0-based)
                let backoff_ms = crate::executor::retry_backoff_ms(attempt - 1);
                self.retry_after
                    .insert(id.to_string(), now_ms + backoff_ms);
                FailureDisposition::Retry {
                    attempt,
                    backoff_ms,
                }
            } else {
                task.transition(TaskStatus::Failed, now_ms)?;
                task.error = Some(error.clone());
                let category = task.category;
                self.history.record(category, false);
                FailureDisposition::Terminal
            }
        };

        self.running.remove(id.as_str());
        match &disposition {
            FailureDisposition::Retry { .. } => {
                self.metrics.retried += 1;
                self.finish_record(id, TaskStatus::Pending, Some(error), now_ms);
            }
            FailureDisposition::Terminal => {
                self.metrics.failed += 1;
                self.finish_record(id, TaskStatus::Failed, Some(error), now_ms);
                // Dependents hanging off optional edges may proceed
                self.unblock_dependents(id, now_ms)?;
            }
        }
        Ok(disposition)
    }

    /// Cancel a task. Idempotent: terminal tasks ignore the signal.
    ///
    /// Returns `true` when the cancellation changed state. Running tasks
    /// are left in the running set until the harness confirms; the
    /// engine transitions them after signal delivery.
    pub fn cancel(&mut self, id: &TaskId, now_ms: u64) -> Result<bool, EngineError> {
        let task = self
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;

        if task.is_terminal() {
            return Ok(false);
        }
        if task.status == TaskStatus::Running {
            // Cooperative: state flips when the harness reports back
            return Ok(true);
        }
        task.transition(TaskStatus::Cancelled, now_ms)?;
        self.metrics.cancelled += 1;
        self.finish_record(id, TaskStatus::Cancelled, None, now_ms);
        self.unblock_dependents(id, now_ms)?;
        Ok(true)
    }

    /// Finish a cancellation for a running task (harness confirmed).
    pub fn finish_cancelled(&mut self, id: &TaskId, now_ms: u64) -> Result<(), EngineError> {
        {
            let task = self
                .tasks
                .get_mut(id.as_str())
                .ok_or_else(|| EngineError::UnknownTask(id.clone()))?;
            if !task.is_terminal() {
                task.transition(TaskStatus::Cancelled, now_ms)?;
                self.metrics.cancelled += 1;
            }
        }
        self.running.remove(id.as_str());
        self.finish_record(id, TaskStatus::Cancelled, None, now_ms);
        self.unblock_dependents(id, now_ms)?;
        Ok(())
    }

    /// Drop the retry backoff gate for a task (manual immediate retry).
    pub fn clear_retry_gate(&mut self, id: &TaskId) {
        self.retry_after.remove(id.as_str());
    }

    /// Unpark dependents whose predecessors are now satisfied.
    pub fn unblock_dependents(
        &mut self,
        id: &TaskId,
        now_ms: u64,
    ) -> Result<Vec<TaskId>, EngineError> {
        let mut unblocked = Vec::new();
        for dependent in self.graph.ordering_dependents(id) {
            if self.maybe_unblock(&dependent, now_ms)? {
                unblocked.push(dependent);
            }
        }
        Ok(unblocked)
    }

    /// Blocked → pending when predecessors and preconditions allow.
    fn maybe_unblock(&mut self, id: &TaskId, now_ms: u64) -> Result<bool, EngineError> {
        let Some(task) = self.tasks.get(id.as_str()) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Blocked {
            return Ok(false);
        }
        if !self.predecessors_satisfied(task, now_ms) {
            return Ok(false);
        }
        if let Some(task) = self.tasks.get_mut(id.as_str()) {
            task.transition(TaskStatus::Pending, now_ms)?;
        }
        Ok(true)
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Freeze a consistent view for a snapshot.
    pub fn snapshot_body(&self) -> foreman_storage::SnapshotBody {
        let dependencies = self
            .graph
            .edges()
            .map(|dep| (dep.id.to_string(), dep.clone()))
            .collect();
        let custom_data = serde_json::json!({
            "outputs": self.outputs,
        });
        foreman_storage::SnapshotBody {
            tasks: self.tasks.clone(),
            dependencies,
            execution_records: self.execution_records.clone(),
            metrics: self.metrics.clone(),
            custom_data,
        }
    }

    /// Replace state from a snapshot body.
    ///
    /// Tasks found `running` or `queued` return to `pending`: the
    /// scheduler offers at-least-once execution, so interrupted work is
    /// re-run after a crash.
    pub fn restore_from(&mut self, body: foreman_storage::SnapshotBody) {
        self.tasks = body.tasks;
        self.execution_records = body.execution_records;
        self.metrics = body.metrics;
        self.running.clear();
        self.progress.clear();

        self.outputs = body
            .custom_data
            .get("outputs")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        for task in self.tasks.values_mut() {
            if matches!(task.status, TaskStatus::Running | TaskStatus::Queued) {
                task.status = TaskStatus::Pending;
                task.started_at_ms = None;
                task.touch();
            }
        }

        self.graph = DependencyGraph::new();
        for task in self.tasks.values() {
            self.graph.add_task(task);
        }
        for dep in body.dependencies.into_values() {
            // Snapshot edges were acyclic when written
            let _ = self.graph.add_edge(dep);
        }

        let mut history = ExecutionHistory::new();
        history.rebuild(&self.tasks, &self.execution_records);
        self.history = history;
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
