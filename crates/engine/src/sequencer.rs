// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequence production: linearize the remaining work under a chosen
//! algorithm.
//!
//! Every algorithm preserves the invariant that each `blocks`/`enables`
//! edge is respected in the output linear order; they differ in how ties
//! inside a dependency stratum are broken and whether resource packing
//! subdivides the parallel groups.

use crate::graph::{CriticalPath, DependencyGraph, GraphError};
use crate::priority::ExecutionHistory;
use crate::resources::ResourceManager;
use foreman_core::{ResourceKind, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Algorithm used to produce an execution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequenceAlgorithm {
    /// Base priority then creation time, repaired into a linear extension.
    Priority,
    /// Topological strata ordered by dynamic priority and duration.
    #[default]
    DependencyAware,
    /// Greedy packing by resource efficiency within parallel groups.
    ResourceOptimal,
    /// Weighted multi-factor score inside each dependency stratum.
    Hybrid,
}

impl fmt::Display for SequenceAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SequenceAlgorithm::Priority => "priority",
            SequenceAlgorithm::DependencyAware => "dependency_aware",
            SequenceAlgorithm::ResourceOptimal => "resource_optimal",
            SequenceAlgorithm::Hybrid => "hybrid",
        };
        write!(f, "{}", s)
    }
}

/// Weights for the hybrid scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub priority: f64,
    pub urgency: f64,
    pub impact: f64,
    pub dependency_weight: f64,
    pub resource_availability: f64,
    pub inverse_duration: f64,
    /// Optional historical-success term; zero disables it.
    pub historical: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            priority: 0.30,
            urgency: 0.15,
            impact: 0.20,
            dependency_weight: 0.15,
            resource_availability: 0.10,
            inverse_duration: 0.10,
            historical: 0.0,
        }
    }
}

/// Provenance of a produced sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    pub algorithm: SequenceAlgorithm,
    pub generated_at_ms: u64,
    pub task_count: usize,
    /// Human-readable constraints the sequence honors.
    pub constraints: Vec<String>,
}

/// An ordered execution plan over the remaining (non-terminal) tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSequence {
    pub order: Vec<TaskId>,
    pub parallel_groups: Vec<Vec<TaskId>>,
    pub critical_path: CriticalPath,
    /// Minimum total time: the critical path duration.
    pub estimated_total_ms: u64,
    pub metadata: SequenceMetadata,
}

/// Inputs a sequencing pass reads.
pub struct SequenceInputs<'a> {
    pub tasks: &'a HashMap<String, Task>,
    pub graph: &'a DependencyGraph,
    pub resources: &'a ResourceManager,
    pub history: &'a ExecutionHistory,
    pub now_ms: u64,
}

/// Check that `order` is a linear extension of the ordering subgraph.
pub fn respects_ordering(order: &[TaskId], graph: &DependencyGraph) -> bool {
    let position: HashMap<&TaskId, usize> =
        order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    for id in order {
        for pred in graph.ordering_predecessors(id) {
            if let (Some(pi), Some(ti)) = (position.get(&pred), position.get(id)) {
                if pi >= ti {
                    return false;
                }
            }
        }
    }
    true
}

/// Produces execution sequences.
pub struct Sequencer {
    weights: HybridWeights,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            weights: HybridWeights::default(),
        }
    }

    pub fn with_weights(weights: HybridWeights) -> Self {
        Self { weights }
    }

    /// Produce a sequence over the non-terminal tasks.
    pub fn sequence(
        &self,
        algorithm: SequenceAlgorithm,
        inputs: &SequenceInputs<'_>,
    ) -> Result<ExecutionSequence, GraphError> {
        let active: HashSet<&str> = inputs
            .tasks
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id.as_str())
            .collect();

        let (order, parallel_groups, constraints) = match algorithm {
            SequenceAlgorithm::Priority => {
                let order = self.priority_order(inputs, &active)?;
                let groups = self.active_groups(inputs, &active)?;
                (
                    order,
                    groups,
                    vec!["ordering edges respected".to_string()],
                )
            }
            SequenceAlgorithm::DependencyAware => {
                let order = self.dependency_aware_order(inputs, &active)?;
                let groups = self.active_groups(inputs, &active)?;
                (
                    order,
                    groups,
                    vec![
                        "ordering edges respected".to_string(),
                        "strata sorted by dynamic priority".to_string(),
                    ],
                )
            }
            SequenceAlgorithm::ResourceOptimal => {
                let groups = self.packed_groups(inputs, &active, |task| {
                    resource_efficiency(task)
                })?;
                let order = groups.iter().flatten().cloned().collect();
                (
                    order,
                    groups,
                    vec![
                        "ordering edges respected".to_string(),
                        "packed under pool capacity".to_string(),
                    ],
                )
            }
            SequenceAlgorithm::Hybrid => {
                let scores = self.hybrid_scores(inputs, &active)?;
                let groups = self.packed_groups(inputs, &active, |task| {
                    scores.get(task.id.as_str()).copied().unwrap_or(0.0)
                })?;
                let order = groups.iter().flatten().cloned().collect();
                (
                    order,
                    groups,
                    vec![
                        "ordering edges respected".to_string(),
                        "weighted hybrid score".to_string(),
                        "packed under pool capacity".to_string(),
                    ],
                )
            }
        };

        let critical_path = inputs.graph.critical_path()?;
        let estimated_total_ms = critical_path.total_ms;

        Ok(ExecutionSequence {
            metadata: SequenceMetadata {
                algorithm,
                generated_at_ms: inputs.now_ms,
                task_count: order.len(),
                constraints,
            },
            order,
            parallel_groups,
            critical_path,
            estimated_total_ms,
        })
    }

    /// Greedy list scheduling: always emit the ready task with the highest
    /// base priority (then earliest creation). Ready means every ordering
    /// predecessor is terminal or already emitted.
    fn priority_order(
        &self,
        inputs: &SequenceInputs<'_>,
        active: &HashSet<&str>,
    ) -> Result<Vec<TaskId>, GraphError> {
        // Fail fast on cyclic input
        let (topo, _) = inputs.graph.levels()?;

        let mut emitted: HashSet<TaskId> = HashSet::new();
        let mut order = Vec::new();
        let remaining: Vec<&TaskId> = topo.iter().filter(|id| active.contains(id.as_str())).collect();

        while order.len() < remaining.len() {
            let mut ready: Vec<&TaskId> = remaining
                .iter()
                .copied()
                .filter(|id| !emitted.contains(*id))
                .filter(|id| {
                    inputs.graph.ordering_predecessors(*id).iter().all(|pred| {
                        !active.contains(pred.as_str()) || emitted.contains(pred)
                    })
                })
                .collect::<Vec<&TaskId>>();
            if ready.is_empty() {
                break;
            }
            ready.sort_by(|a, b| {
                let ta = inputs.tasks.get(a.as_str());
                let tb = inputs.tasks.get(b.as_str());
                let pa = ta.map(|t| t.base_priority.value()).unwrap_or(0);
                let pb = tb.map(|t| t.base_priority.value()).unwrap_or(0);
                pb.cmp(&pa).then_with(|| {
                    let ca = ta.map(|t| t.created_at_ms).unwrap_or(u64::MAX);
                    let cb = tb.map(|t| t.created_at_ms).unwrap_or(u64::MAX);
                    ca.cmp(&cb)
                })
            });
            let chosen = ready[0].clone();
            emitted.insert(chosen.clone());
            order.push(chosen);
        }

        Ok(order)
    }

    /// Topological strata; within each stratum sort by dynamic priority
    /// descending, then estimated duration ascending.
    fn dependency_aware_order(
        &self,
        inputs: &SequenceInputs<'_>,
        active: &HashSet<&str>,
    ) -> Result<Vec<TaskId>, GraphError> {
        let (topo, levels) = inputs.graph.levels()?;

        let mut strata: HashMap<u32, Vec<TaskId>> = HashMap::new();
        for id in &topo {
            if active.contains(id.as_str()) {
                let level = levels.get(id).copied().unwrap_or(1);
                strata.entry(level).or_default().push(id.clone());
            }
        }

        let mut keys: Vec<u32> = strata.keys().copied().collect();
        keys.sort_unstable();

        let mut order = Vec::new();
        for level in keys {
            let mut members = strata.remove(&level).unwrap_or_default();
            members.sort_by(|a, b| {
                let ta = inputs.tasks.get(a.as_str());
                let tb = inputs.tasks.get(b.as_str());
                let pa = ta.map(|t| t.dynamic_priority).unwrap_or(0.0);
                let pb = tb.map(|t| t.dynamic_priority).unwrap_or(0.0);
                pb.partial_cmp(&pa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let da = ta.map(|t| t.estimated_duration_ms).unwrap_or(u64::MAX);
                        let db = tb.map(|t| t.estimated_duration_ms).unwrap_or(u64::MAX);
                        da.cmp(&db)
                    })
            });
            order.extend(members);
        }

        Ok(order)
    }

    /// The graph's parallel groups filtered to active tasks.
    fn active_groups(
        &self,
        inputs: &SequenceInputs<'_>,
        active: &HashSet<&str>,
    ) -> Result<Vec<Vec<TaskId>>, GraphError> {
        Ok(inputs
            .graph
            .parallel_groups()?
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter(|id| active.contains(id.as_str()))
                    .collect::<Vec<_>>()
            })
            .filter(|group: &Vec<TaskId>| !group.is_empty())
            .collect())
    }

    /// Sort each parallel group by a score, then greedily pack members
    /// into sub-batches that fit inside every pool's total capacity,
    /// starting a new batch when any resource would overflow.
    fn packed_groups(
        &self,
        inputs: &SequenceInputs<'_>,
        active: &HashSet<&str>,
        score: impl Fn(&Task) -> f64,
    ) -> Result<Vec<Vec<TaskId>>, GraphError> {
        let groups = self.active_groups(inputs, active)?;
        let mut packed = Vec::new();

        for group in groups {
            let mut members: Vec<&Task> = group
                .iter()
                .filter_map(|id| inputs.tasks.get(id.as_str()))
                .collect();
            members.sort_by(|a, b| {
                score(b)
                    .partial_cmp(&score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut batch: Vec<TaskId> = Vec::new();
            let mut remaining: HashMap<ResourceKind, u32> = HashMap::new();

            for task in members {
                let fits = task.required_resources.iter().all(|spec| {
                    match inputs.resources.capacity(&spec.kind) {
                        Some(capacity) => {
                            let used = remaining.get(&spec.kind).copied().unwrap_or(0);
                            used + spec.units <= capacity
                        }
                        None => true, // unmanaged kind
                    }
                });

                if !fits && !batch.is_empty() {
                    packed.push(std::mem::take(&mut batch));
                    remaining.clear();
                }

                for spec in &task.required_resources {
                    if inputs.resources.capacity(&spec.kind).is_some() {
                        *remaining.entry(spec.kind.clone()).or_insert(0) += spec.units;
                    }
                }
                batch.push(task.id.clone());
            }

            if !batch.is_empty() {
                packed.push(batch);
            }
        }

        Ok(packed)
    }

    /// Weighted hybrid score per active task.
    fn hybrid_scores(
        &self,
        inputs: &SequenceInputs<'_>,
        active: &HashSet<&str>,
    ) -> Result<HashMap<String, f64>, GraphError> {
        let w = &self.weights;

        let active_tasks: Vec<&Task> = inputs
            .tasks
            .values()
            .filter(|t| active.contains(t.id.as_str()))
            .collect();

        let max_dependents = active_tasks
            .iter()
            .map(|t| inputs.graph.ordering_dependents(&t.id).len())
            .max()
            .unwrap_or(0)
            .max(1) as f64;
        let min_duration = active_tasks
            .iter()
            .map(|t| t.estimated_duration_ms.max(1))
            .min()
            .unwrap_or(1) as f64;

        // Downstream reach per task (direct plus transitive dependents)
        let mut downstream: HashMap<&str, usize> = HashMap::new();
        for task in &active_tasks {
            let mut seen: HashSet<TaskId> = HashSet::new();
            let mut stack = inputs.graph.ordering_dependents(&task.id);
            while let Some(current) = stack.pop() {
                if seen.insert(current.clone()) {
                    stack.extend(inputs.graph.ordering_dependents(&current));
                }
            }
            downstream.insert(task.id.as_str(), seen.len());
        }
        let max_downstream = downstream.values().copied().max().unwrap_or(0).max(1) as f64;

        let mut scores = HashMap::new();
        for task in active_tasks {
            let priority = task.dynamic_priority / crate::priority::MAX_PRIORITY;

            let urgency = match task.deadline_ms {
                Some(deadline) => {
                    let remaining = deadline as f64 - inputs.now_ms as f64;
                    (1.0 - remaining / (7.0 * 24.0 * 3_600_000.0)).clamp(0.0, 1.0)
                }
                None => 0.2,
            };

            let impact = downstream
                .get(task.id.as_str())
                .copied()
                .unwrap_or(0) as f64
                / max_downstream;

            let dependency_weight =
                inputs.graph.ordering_dependents(&task.id).len() as f64 / max_dependents;

            let resource_availability = inputs.resources.availability_factor(task);

            let inverse_duration = min_duration / task.estimated_duration_ms.max(1) as f64;

            let historical = inputs
                .history
                .success_rate(task.category)
                .unwrap_or(1.0);

            let score = w.priority * priority
                + w.urgency * urgency
                + w.impact * impact
                + w.dependency_weight * dependency_weight
                + w.resource_availability * resource_availability
                + w.inverse_duration * inverse_duration
                + w.historical * historical;

            scores.insert(task.id.to_string(), score);
        }

        Ok(scores)
    }
}

/// Priority per unit of resource-time: `dynamic_priority / (Σunits × duration)`.
fn resource_efficiency(task: &Task) -> f64 {
    let units: u32 = task.required_resources.iter().map(|s| s.units).sum();
    let denominator = (units.max(1) as f64) * (task.estimated_duration_ms.max(1) as f64);
    task.dynamic_priority / denominator
}

#[cfg(test)]
#[path = "sequencer_tests.rs"]
mod tests;
