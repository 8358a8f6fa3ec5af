// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed dependency graph: cycle detection, topological order, critical
//! path, parallel groups, and impact analysis.
//!
//! The graph is a node table keyed by task id with two id-sets per node;
//! edges are small value objects. Only `blocks`/`enables` edges
//! contribute to the ordering subgraph; `conflicts` and `enhances` are
//! recorded on the side and consulted when building parallel groups.

use foreman_core::{DependencyType, EdgeId, ResourceKind, Task, TaskDependency, TaskId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

fn fmt_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors from graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("unknown dependency edge: {0} -> {1}")]
    UnknownEdge(TaskId, TaskId),
    #[error("adding dependency would form a cycle: {}", fmt_path(.path))]
    CycleWouldForm { path: Vec<TaskId> },
    #[error("ordering subgraph is cyclic: {}", fmt_path(.path))]
    Cyclic { path: Vec<TaskId> },
}

/// Per-node scheduling attributes cached from the task, plus adjacency.
#[derive(Debug, Clone, Default)]
struct Node {
    /// Ordering predecessors: tasks this one waits on.
    dependencies: HashSet<TaskId>,
    /// Ordering successors: tasks waiting on this one.
    dependents: HashSet<TaskId>,
    /// Tasks that may not run simultaneously with this one.
    conflicts: HashSet<TaskId>,
    /// Affinity hints (no scheduling constraint).
    enhances: HashSet<TaskId>,
    estimated_ms: u64,
    base_priority: u32,
    created_at_ms: u64,
    resource_kinds: HashSet<ResourceKind>,
}

/// Critical path through the ordering subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CriticalPath {
    pub tasks: Vec<TaskId>,
    /// Summed estimated duration along the path, i.e. the minimum total time.
    pub total_ms: u64,
}

/// Downstream impact of a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactReport {
    pub direct_dependents: Vec<TaskId>,
    pub indirect_dependents: Vec<TaskId>,
    pub on_critical_path: bool,
    /// Direct plus indirect dependent count.
    pub total_impact: usize,
}

/// The dependency graph over all known tasks.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<TaskId, Node>,
    edges: IndexMap<EdgeId, TaskDependency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_task(&self, id: &TaskId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &TaskDependency> {
        self.edges.values()
    }

    /// Insert or refresh a node from the task's scheduling attributes.
    pub fn add_task(&mut self, task: &Task) {
        let node = self.nodes.entry(task.id.clone()).or_default();
        node.estimated_ms = task.estimated_duration_ms;
        node.base_priority = task.base_priority.value();
        node.created_at_ms = task.created_at_ms;
        node.resource_kinds = task
            .required_resources
            .iter()
            .map(|spec| spec.kind.clone())
            .collect();
    }

    /// Remove a node and every edge touching it.
    pub fn remove_task(&mut self, id: &TaskId) {
        if self.nodes.shift_remove(id).is_none() {
            return;
        }
        for node in self.nodes.values_mut() {
            node.dependencies.remove(id);
            node.dependents.remove(id);
            node.conflicts.remove(id);
            node.enhances.remove(id);
        }
        self.edges
            .retain(|_, dep| dep.dependent != *id && dep.depends_on != *id);
    }

    /// Add a typed edge after checking it cannot form a cycle.
    ///
    /// Adding an ordering edge `(dependent, depends_on)` is rejected with
    /// [`GraphError::CycleWouldForm`] when `depends_on` is already
    /// reachable from `dependent`; the reported path starts and ends at
    /// `depends_on`, walking the would-be cycle.
    ///
    /// Re-adding an identical `(dependent, depends_on, type)` edge is
    /// idempotent and returns the existing edge id.
    pub fn add_edge(&mut self, dep: TaskDependency) -> Result<EdgeId, GraphError> {
        if !self.nodes.contains_key(&dep.dependent) {
            return Err(GraphError::UnknownTask(dep.dependent));
        }
        if !self.nodes.contains_key(&dep.depends_on) {
            return Err(GraphError::UnknownTask(dep.depends_on));
        }

        if let Some(existing) = self.edges.values().find(|e| {
            e.dependent == dep.dependent
                && e.depends_on == dep.depends_on
                && e.dep_type == dep.dep_type
        }) {
            return Ok(existing.id.clone());
        }

        if dep.dep_type.is_ordering() {
            if let Some(path) = self.find_ordering_path(&dep.dependent, &dep.depends_on) {
                let mut cycle = vec![dep.depends_on.clone()];
                cycle.extend(path);
                return Err(GraphError::CycleWouldForm { path: cycle });
            }
        }

        match dep.dep_type {
            DependencyType::Blocks | DependencyType::Enables => {
                if let Some(node) = self.nodes.get_mut(&dep.dependent) {
                    node.dependencies.insert(dep.depends_on.clone());
                }
                if let Some(node) = self.nodes.get_mut(&dep.depends_on) {
                    node.dependents.insert(dep.dependent.clone());
                }
            }
            DependencyType::Conflicts => {
                if let Some(node) = self.nodes.get_mut(&dep.dependent) {
                    node.conflicts.insert(dep.depends_on.clone());
                }
                if let Some(node) = self.nodes.get_mut(&dep.depends_on) {
                    node.conflicts.insert(dep.dependent.clone());
                }
            }
            DependencyType::Enhances => {
                if let Some(node) = self.nodes.get_mut(&dep.dependent) {
                    node.enhances.insert(dep.depends_on.clone());
                }
                if let Some(node) = self.nodes.get_mut(&dep.depends_on) {
                    node.enhances.insert(dep.dependent.clone());
                }
            }
        }

        let id = dep.id.clone();
        self.edges.insert(dep.id.clone(), dep);
        Ok(id)
    }

    /// Remove all edges between a pair, regardless of type. Always safe.
    pub fn remove_edge(&mut self, dependent: &TaskId, depends_on: &TaskId) -> Result<(), GraphError> {
        let before = self.edges.len();
        self.edges
            .retain(|_, e| !(e.dependent == *dependent && e.depends_on == *depends_on));
        if self.edges.len() == before {
            return Err(GraphError::UnknownEdge(dependent.clone(), depends_on.clone()));
        }

        // Rebuild the pair's adjacency from surviving edges (another edge
        // of a different type may still exist between other pairs).
        if let Some(node) = self.nodes.get_mut(dependent) {
            node.dependencies.remove(depends_on);
            node.conflicts.remove(depends_on);
            node.enhances.remove(depends_on);
        }
        if let Some(node) = self.nodes.get_mut(depends_on) {
            node.dependents.remove(dependent);
            node.conflicts.remove(dependent);
            node.enhances.remove(dependent);
        }
        Ok(())
    }

    /// Ordering predecessors of a task (its `blocks`/`enables` targets).
    pub fn ordering_predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.nodes
            .keys()
            .filter(|k| node.dependencies.contains(*k))
            .cloned()
            .collect()
    }

    /// Tasks that wait on `id` through an ordering edge.
    pub fn ordering_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.nodes
            .keys()
            .filter(|k| node.dependents.contains(*k))
            .cloned()
            .collect()
    }

    /// The ordering edges pointing from `dependent` at its predecessors.
    pub fn ordering_edges_of(&self, dependent: &TaskId) -> Vec<&TaskDependency> {
        self.edges
            .values()
            .filter(|e| e.dep_type.is_ordering() && e.dependent == *dependent)
            .collect()
    }

    /// Whether two tasks carry a `conflicts` edge.
    pub fn conflicts_with(&self, a: &TaskId, b: &TaskId) -> bool {
        self.nodes
            .get(a)
            .is_some_and(|node| node.conflicts.contains(b))
    }

    /// Whether two tasks share any required resource kind.
    pub fn shares_resource(&self, a: &TaskId, b: &TaskId) -> bool {
        let (Some(na), Some(nb)) = (self.nodes.get(a), self.nodes.get(b)) else {
            return false;
        };
        na.resource_kinds.iter().any(|k| nb.resource_kinds.contains(k))
    }

    /// BFS path along ordering edges from `from` to `to` (inclusive).
    fn find_ordering_path(&self, from: &TaskId, to: &TaskId) -> Option<Vec<TaskId>> {
        if from == to {
            return Some(vec![from.clone()]);
        }
        let mut prev: HashMap<TaskId, TaskId> = HashMap::new();
        let mut queue = VecDeque::from([from.clone()]);
        let mut seen = HashSet::from([from.clone()]);

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            // Iterate in node-table order for deterministic paths
            for next in self.nodes.keys().filter(|k| node.dependents.contains(*k)) {
                if !seen.insert(next.clone()) {
                    continue;
                }
                prev.insert(next.clone(), current.clone());
                if next == to {
                    let mut path = vec![to.clone()];
                    let mut cursor = to;
                    while let Some(p) = prev.get(cursor) {
                        path.push(p.clone());
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.clone());
            }
        }
        None
    }

    /// Find all cycles on the ordering subgraph via tri-color DFS.
    ///
    /// Each cycle is reported as the on-stack slice with the revisited
    /// node appended, e.g. `[b, a, b]`.
    pub fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        #[derive(PartialEq, Clone, Copy)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&TaskId, Color> =
            self.nodes.keys().map(|k| (k, Color::White)).collect();
        let mut cycles = Vec::new();

        for start in self.nodes.keys() {
            if colors[start] != Color::White {
                continue;
            }

            // Iterative DFS with an explicit stack of (node, next-child idx)
            let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = Vec::new();
            let children = |id: &TaskId| -> Vec<TaskId> {
                let Some(node) = self.nodes.get(id) else {
                    return Vec::new();
                };
                self.nodes
                    .keys()
                    .filter(|k| node.dependents.contains(*k))
                    .cloned()
                    .collect()
            };

            colors.insert(start, Color::Gray);
            stack.push((start.clone(), children(start), 0));

            while !stack.is_empty() {
                enum Step {
                    Descend(TaskId),
                    Finish(TaskId),
                }
                let step = {
                    let Some((current, kids, idx)) = stack.last_mut() else {
                        break;
                    };
                    if *idx >= kids.len() {
                        Step::Finish(current.clone())
                    } else {
                        let next = kids[*idx].clone();
                        *idx += 1;
                        Step::Descend(next)
                    }
                };

                match step {
                    Step::Finish(current) => {
                        if let Some(entry) = colors.get_mut(&current) {
                            *entry = Color::Black;
                        }
                        stack.pop();
                    }
                    Step::Descend(next) => {
                        match colors.get(&next).copied().unwrap_or(Color::Black) {
                            Color::White => {
                                if let Some((key, _)) = self.nodes.get_key_value(&next) {
                                    colors.insert(key, Color::Gray);
                                }
                                let next_children = children(&next);
                                stack.push((next, next_children, 0));
                            }
                            Color::Gray => {
                                // Back edge: the on-stack slice from `next`
                                // plus the revisited node is the cycle
                                let from = stack
                                    .iter()
                                    .position(|(id, _, _)| *id == next)
                                    .unwrap_or(0);
                                let mut cycle: Vec<TaskId> = stack[from..]
                                    .iter()
                                    .map(|(id, _, _)| id.clone())
                                    .collect();
                                cycle.push(next);
                                cycles.push(cycle);
                            }
                            Color::Black => {}
                        }
                    }
                }
            }
        }

        cycles
    }

    /// Kahn's algorithm over the ordering subgraph.
    ///
    /// Fails with [`GraphError::Cyclic`] when a cycle prevents a full
    /// ordering; the error names a concrete cycle path.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        Ok(self.levels()?.0)
    }

    /// Topological order plus each node's level (1 + max predecessor level).
    ///
    /// Tasks with identical level are eligible for the same parallel group.
    pub fn levels(&self) -> Result<(Vec<TaskId>, HashMap<TaskId, u32>), GraphError> {
        let mut in_degree: IndexMap<&TaskId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| {
                let live_preds = node
                    .dependencies
                    .iter()
                    .filter(|d| self.nodes.contains_key(*d))
                    .count();
                (id, live_preds)
            })
            .collect();

        let mut levels: HashMap<TaskId, u32> = HashMap::new();
        let mut ready: VecDeque<&TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_front() {
            let level = self
                .nodes
                .get(current)
                .map(|node| {
                    node.dependencies
                        .iter()
                        .filter_map(|d| levels.get(d))
                        .max()
                        .copied()
                        .unwrap_or(0)
                })
                .unwrap_or(0)
                + 1;
            levels.insert(current.clone(), level);
            order.push(current.clone());

            if let Some(node) = self.nodes.get(current) {
                for dependent in self.nodes.keys().filter(|k| node.dependents.contains(*k)) {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push_back(dependent);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let path = self
                .detect_cycles()
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(GraphError::Cyclic { path });
        }

        Ok((order, levels))
    }

    /// Critical path: forward pass computes earliest finish, backward pass
    /// latest start; zero-slack nodes form the path. Ties broken by higher
    /// base priority, then lower creation time.
    pub fn critical_path(&self) -> Result<CriticalPath, GraphError> {
        if self.nodes.is_empty() {
            return Ok(CriticalPath::default());
        }

        let (order, _) = self.levels()?;

        let mut earliest_start: HashMap<&TaskId, u64> = HashMap::new();
        let mut earliest_finish: HashMap<&TaskId, u64> = HashMap::new();
        let mut total = 0u64;

        for id in &order {
            let node = &self.nodes[id];
            let start = node
                .dependencies
                .iter()
                .filter_map(|d| earliest_finish.get(d).copied())
                .max()
                .unwrap_or(0);
            let finish = start + node.estimated_ms;
            total = total.max(finish);
            if let Some((key, _)) = self.nodes.get_key_value(id) {
                earliest_start.insert(key, start);
                earliest_finish.insert(key, finish);
            }
        }

        let mut latest_finish: HashMap<&TaskId, u64> = HashMap::new();
        for id in order.iter().rev() {
            let node = &self.nodes[id];
            let finish = self
                .nodes
                .keys()
                .filter(|k| node.dependents.contains(*k))
                .filter_map(|d| {
                    latest_finish
                        .get(d)
                        .map(|lf| lf.saturating_sub(self.nodes[d].estimated_ms))
                })
                .min()
                .unwrap_or(total);
            if let Some((key, _)) = self.nodes.get_key_value(id) {
                latest_finish.insert(key, finish);
            }
        }

        let is_critical = |id: &TaskId| -> bool {
            let node = &self.nodes[id];
            let es = earliest_start.get(id).copied().unwrap_or(0);
            let lf = latest_finish.get(id).copied().unwrap_or(0);
            lf.saturating_sub(node.estimated_ms) == es
        };

        // Walk the chain from time zero, picking the zero-slack successor
        // whose window starts where the previous one finished.
        let mut path = Vec::new();
        let mut cursor_finish = 0u64;
        loop {
            let mut candidates: Vec<&TaskId> = self
                .nodes
                .keys()
                .filter(|id| is_critical(id))
                .filter(|id| earliest_start.get(*id).copied().unwrap_or(0) == cursor_finish)
                .filter(|id| !path.contains(*id))
                .collect();
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by(|a, b| {
                let na = &self.nodes[*a];
                let nb = &self.nodes[*b];
                nb.base_priority
                    .cmp(&na.base_priority)
                    .then(na.created_at_ms.cmp(&nb.created_at_ms))
            });
            let chosen = candidates[0].clone();
            cursor_finish = earliest_finish.get(&chosen).copied().unwrap_or(cursor_finish);
            path.push(chosen);
            if cursor_finish >= total {
                break;
            }
        }

        Ok(CriticalPath {
            tasks: path,
            total_ms: total,
        })
    }

    /// Group tasks by level; within a level, tasks join a group only if
    /// they pairwise share no required resource kind and carry no
    /// `conflicts` edge.
    pub fn parallel_groups(&self) -> Result<Vec<Vec<TaskId>>, GraphError> {
        let (order, levels) = self.levels()?;

        let mut by_level: IndexMap<u32, Vec<TaskId>> = IndexMap::new();
        for id in &order {
            let level = levels.get(id).copied().unwrap_or(1);
            by_level.entry(level).or_default().push(id.clone());
        }

        let mut groups = Vec::new();
        let mut keys: Vec<u32> = by_level.keys().copied().collect();
        keys.sort_unstable();

        for level in keys {
            let members = &by_level[&level];
            let mut level_groups: Vec<Vec<TaskId>> = Vec::new();

            for id in members {
                let slot = level_groups.iter_mut().find(|group| {
                    group.iter().all(|other| {
                        !self.conflicts_with(id, other) && !self.shares_resource(id, other)
                    })
                });
                match slot {
                    Some(group) => group.push(id.clone()),
                    None => level_groups.push(vec![id.clone()]),
                }
            }
            groups.extend(level_groups);
        }

        Ok(groups)
    }

    /// Downstream impact of a task: direct and transitive dependents and
    /// critical-path membership.
    pub fn impact(&self, id: &TaskId) -> Result<ImpactReport, GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::UnknownTask(id.clone()));
        }

        let direct = self.ordering_dependents(id);
        let direct_set: HashSet<&TaskId> = direct.iter().collect();

        // Transitive closure over ordering successors
        let mut seen: HashSet<TaskId> = HashSet::from([id.clone()]);
        let mut queue: VecDeque<TaskId> = direct.iter().cloned().collect();
        let mut indirect = Vec::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if !direct_set.contains(&current) {
                indirect.push(current.clone());
            }
            for next in self.ordering_dependents(&current) {
                queue.push_back(next);
            }
        }

        let on_critical_path = self.critical_path()?.tasks.contains(id);
        let total_impact = direct.len() + indirect.len();

        Ok(ImpactReport {
            direct_dependents: direct,
            indirect_dependents: indirect,
            on_critical_path,
            total_impact,
        })
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
