// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::dependency::{DependencyType, TaskDependency};
use crate::resource::ResourceSpec;
use crate::task::{PriorityBand, Task, TaskCategory, TaskConfig};

// ── Task factories ──────────────────────────────────────────────────────────

/// A pending task with sensible defaults, created at epoch-ms 1_000_000.
pub fn task(id: &str) -> Task {
    Task::new_with_epoch_ms(
        TaskConfig::builder(id, format!("task {}", id), "noop").build(),
        1_000_000,
    )
}

/// A pending task with an explicit estimated duration.
pub fn task_with_duration(id: &str, estimated_ms: u64) -> Task {
    Task::new_with_epoch_ms(
        TaskConfig::builder(id, format!("task {}", id), "noop")
            .estimated_duration_ms(estimated_ms)
            .build(),
        1_000_000,
    )
}

/// A pending task in a priority band.
pub fn task_with_priority(id: &str, band: PriorityBand) -> Task {
    Task::new_with_epoch_ms(
        TaskConfig::builder(id, format!("task {}", id), "noop")
            .base_priority(band)
            .build(),
        1_000_000,
    )
}

/// A pending task that requires resources.
pub fn task_with_resources(id: &str, specs: Vec<ResourceSpec>) -> Task {
    let mut builder = TaskConfig::builder(id, format!("task {}", id), "noop");
    for spec in specs {
        builder = builder.resource(spec);
    }
    Task::new_with_epoch_ms(builder.build(), 1_000_000)
}

/// A pending task in a category.
pub fn task_in_category(id: &str, category: TaskCategory) -> Task {
    Task::new_with_epoch_ms(
        TaskConfig::builder(id, format!("task {}", id), "noop")
            .category(category)
            .build(),
        1_000_000,
    )
}

// ── Dependency factories ────────────────────────────────────────────────────

/// A blocking edge: `depends_on` must finish before `dependent` starts.
pub fn blocks(dependent: &str, depends_on: &str) -> TaskDependency {
    TaskDependency::new(
        format!("edge-{}-{}", dependent, depends_on),
        dependent,
        depends_on,
        DependencyType::Blocks,
    )
}

/// A conflicts edge: the pair may not run simultaneously.
pub fn conflicts(a: &str, b: &str) -> TaskDependency {
    TaskDependency::new(
        format!("edge-{}-{}", a, b),
        a,
        b,
        DependencyType::Conflicts,
    )
}
