// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed dependency edges between tasks.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a dependency edge.
    pub struct EdgeId;
}

/// Kind of relationship between a dependent task and the task it points at.
///
/// Only `Blocks` and `Enables` impose ordering. `Conflicts` forbids
/// simultaneous execution and `Enhances` is an affinity hint; neither
/// contributes edges to the ordering graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Blocks,
    Enables,
    Conflicts,
    Enhances,
}

impl DependencyType {
    /// True for edge types that constrain execution order.
    pub fn is_ordering(&self) -> bool {
        matches!(self, DependencyType::Blocks | DependencyType::Enables)
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyType::Blocks => "blocks",
            DependencyType::Enables => "enables",
            DependencyType::Conflicts => "conflicts",
            DependencyType::Enhances => "enhances",
        };
        write!(f, "{}", s)
    }
}

/// A directed, typed edge: `dependent` waits on (or relates to) `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: EdgeId,
    pub dependent: TaskId,
    pub depends_on: TaskId,
    pub dep_type: DependencyType,
    /// Optional edges order admission but do not fail the dependent when
    /// the dependency terminates unsuccessfully.
    #[serde(default)]
    pub optional: bool,
    /// Minimum delay after the dependency completes before the dependent
    /// becomes eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay_ms: Option<u64>,
}

/// Dependency declared at submission time, before an edge id exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLink {
    pub depends_on: TaskId,
    pub dep_type: DependencyType,
    #[serde(default)]
    pub optional: bool,
}

impl TaskLink {
    pub fn new(depends_on: impl Into<TaskId>, dep_type: DependencyType) -> Self {
        Self {
            depends_on: depends_on.into(),
            dep_type,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl TaskDependency {
    pub fn new(
        id: impl Into<EdgeId>,
        dependent: impl Into<TaskId>,
        depends_on: impl Into<TaskId>,
        dep_type: DependencyType,
    ) -> Self {
        Self {
            id: id.into(),
            dependent: dependent.into(),
            depends_on: depends_on.into(),
            dep_type,
            optional: false,
            min_delay_ms: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_min_delay_ms(mut self, ms: u64) -> Self {
        self.min_delay_ms = Some(ms);
        self
    }

    /// The unordered pair key used for conflict lookups.
    pub fn pair(&self) -> (TaskId, TaskId) {
        (self.dependent.clone(), self.depends_on.clone())
    }
}

#[cfg(test)]
#[path = "dependency_tests.rs"]
mod tests;
