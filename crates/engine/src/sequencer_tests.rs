// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::priority::ExecutionHistory;
use foreman_core::test_support::{blocks, task, task_with_duration, task_with_priority, task_with_resources};
use foreman_core::{PriorityBand, ResourceSpec, Task, TaskStatus};

struct Fixture {
    tasks: HashMap<String, Task>,
    graph: DependencyGraph,
    resources: ResourceManager,
    history: ExecutionHistory,
}

impl Fixture {
    fn new(tasks: Vec<Task>) -> Self {
        let mut graph = DependencyGraph::new();
        for task in &tasks {
            graph.add_task(task);
        }
        Self {
            tasks: tasks.into_iter().map(|t| (t.id.to_string(), t)).collect(),
            graph,
            resources: ResourceManager::new(),
            history: ExecutionHistory::new(),
        }
    }

    fn edge(&mut self, dependent: &str, depends_on: &str) {
        self.graph.add_edge(blocks(dependent, depends_on)).unwrap();
    }

    fn inputs(&self) -> SequenceInputs<'_> {
        SequenceInputs {
            tasks: &self.tasks,
            graph: &self.graph,
            resources: &self.resources,
            history: &self.history,
            now_ms: 2_000_000,
        }
    }
}

fn pos(order: &[TaskId], id: &str) -> usize {
    order.iter().position(|t| t == id).unwrap()
}

// ── Ordering invariant across algorithms ────────────────────────────────────

#[yare::parameterized(
    priority         = { SequenceAlgorithm::Priority },
    dependency_aware = { SequenceAlgorithm::DependencyAware },
    resource_optimal = { SequenceAlgorithm::ResourceOptimal },
    hybrid           = { SequenceAlgorithm::Hybrid },
)]
fn every_algorithm_is_a_linear_extension(algorithm: SequenceAlgorithm) {
    let mut fixture = Fixture::new(vec![
        task_with_priority("a", PriorityBand::Low),
        task_with_priority("b", PriorityBand::Critical),
        task_with_priority("c", PriorityBand::High),
        task_with_priority("d", PriorityBand::Medium),
    ]);
    // b waits on a, d waits on c
    fixture.edge("b", "a");
    fixture.edge("d", "c");

    let sequence = Sequencer::new().sequence(algorithm, &fixture.inputs()).unwrap();
    assert_eq!(sequence.order.len(), 4);
    assert!(respects_ordering(&sequence.order, &fixture.graph));
    assert_eq!(sequence.metadata.algorithm, algorithm);
    assert_eq!(sequence.metadata.task_count, 4);
}

#[test]
fn priority_algorithm_prefers_priority_within_constraints() {
    let mut fixture = Fixture::new(vec![
        task_with_priority("low-first", PriorityBand::Low),
        task_with_priority("crit-dependent", PriorityBand::Critical),
        task_with_priority("high-free", PriorityBand::High),
    ]);
    // The critical task waits on the low one
    fixture.edge("crit-dependent", "low-first");

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::Priority, &fixture.inputs())
        .unwrap();

    // high-free leads (highest unblocked); the critical task still runs
    // only after its predecessor
    assert_eq!(pos(&sequence.order, "high-free"), 0);
    assert!(pos(&sequence.order, "low-first") < pos(&sequence.order, "crit-dependent"));
}

#[test]
fn priority_ties_break_on_creation_time() {
    let older = Task::new_with_epoch_ms(
        foreman_core::TaskConfig::builder("older", "older", "noop").build(),
        500_000,
    );
    let newer = Task::new_with_epoch_ms(
        foreman_core::TaskConfig::builder("newer", "newer", "noop").build(),
        900_000,
    );
    let fixture = Fixture::new(vec![newer, older]);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::Priority, &fixture.inputs())
        .unwrap();
    assert!(pos(&sequence.order, "older") < pos(&sequence.order, "newer"));
}

#[test]
fn dependency_aware_sorts_strata_by_dynamic_priority() {
    let mut hot = task("hot");
    hot.dynamic_priority = 1500.0;
    let mut cold = task("cold");
    cold.dynamic_priority = 100.0;
    let fixture = Fixture::new(vec![cold, hot]);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::DependencyAware, &fixture.inputs())
        .unwrap();
    assert_eq!(pos(&sequence.order, "hot"), 0);
}

#[test]
fn dependency_aware_breaks_priority_tie_with_duration() {
    let quick = task_with_duration("quick", 1_000);
    let slow = task_with_duration("slow", 60_000);
    let fixture = Fixture::new(vec![slow, quick]);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::DependencyAware, &fixture.inputs())
        .unwrap();
    assert!(pos(&sequence.order, "quick") < pos(&sequence.order, "slow"));
}

// ── Resource packing ────────────────────────────────────────────────────────

#[test]
fn resource_optimal_packs_under_capacity() {
    let mut fixture = Fixture::new(vec![
        task_with_resources("t1", vec![ResourceSpec::new("cpu", 2)]),
        task_with_resources("t2", vec![ResourceSpec::new("cpu", 2)]),
        task_with_resources("t3", vec![ResourceSpec::new("cpu", 2)]),
    ]);
    fixture.resources.set_capacity("cpu".into(), 2);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::ResourceOptimal, &fixture.inputs())
        .unwrap();

    // Every packed batch fits inside cpu=2: one task per batch.
    // The graph's own parallel-group pass already splits tasks sharing a
    // resource kind, so packing preserves singletons here.
    assert!(sequence.parallel_groups.iter().all(|g| g.len() == 1));
    assert_eq!(sequence.order.len(), 3);
}

#[test]
fn resource_optimal_prefers_efficient_tasks() {
    // Same priority; the short task yields more priority per resource-ms
    let mut fixture = Fixture::new(vec![
        task_with_duration("long", 100_000),
        task_with_duration("short", 1_000),
    ]);
    fixture.resources.set_capacity("cpu".into(), 4);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::ResourceOptimal, &fixture.inputs())
        .unwrap();
    assert!(pos(&sequence.order, "short") < pos(&sequence.order, "long"));
}

// ── Hybrid scoring ──────────────────────────────────────────────────────────

#[test]
fn hybrid_orders_by_weighted_score() {
    let urgent = Task::new_with_epoch_ms(
        foreman_core::TaskConfig::builder("urgent", "urgent", "noop")
            .deadline_ms(2_000_000 + 3_600_000)
            .build(),
        1_000_000,
    );
    let relaxed = task("relaxed");
    let fixture = Fixture::new(vec![relaxed, urgent]);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::Hybrid, &fixture.inputs())
        .unwrap();
    assert_eq!(pos(&sequence.order, "urgent"), 0);
}

#[test]
fn hybrid_default_weights_sum_to_one() {
    let w = HybridWeights::default();
    let sum = w.priority
        + w.urgency
        + w.impact
        + w.dependency_weight
        + w.resource_availability
        + w.inverse_duration;
    assert!((sum - 1.0).abs() < 1e-9);
    assert_eq!(w.historical, 0.0);
}

// ── Terminal filtering & metadata ───────────────────────────────────────────

#[test]
fn terminal_tasks_are_excluded() {
    let mut done = task("done");
    done.transition(TaskStatus::Queued, 1).unwrap();
    done.transition(TaskStatus::Running, 2).unwrap();
    done.transition(TaskStatus::Completed, 3).unwrap();
    let live = task("live");
    let fixture = Fixture::new(vec![done, live]);

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::DependencyAware, &fixture.inputs())
        .unwrap();
    assert_eq!(sequence.order, vec![TaskId::new("live")]);
}

#[test]
fn sequence_carries_critical_path_estimate() {
    let mut fixture = Fixture::new(vec![
        task_with_duration("a", 10_000),
        task_with_duration("b", 20_000),
    ]);
    fixture.edge("b", "a");

    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::DependencyAware, &fixture.inputs())
        .unwrap();
    assert_eq!(sequence.estimated_total_ms, 30_000);
    assert_eq!(sequence.critical_path.tasks.len(), 2);
}

#[test]
fn empty_queue_sequences_empty() {
    let fixture = Fixture::new(vec![]);
    let sequence = Sequencer::new()
        .sequence(SequenceAlgorithm::Hybrid, &fixture.inputs())
        .unwrap();
    assert!(sequence.order.is_empty());
    assert!(sequence.parallel_groups.is_empty());
}

#[test]
fn identical_inputs_identical_output() {
    let mut fixture = Fixture::new(vec![task("a"), task("b"), task("c")]);
    fixture.edge("c", "a");

    let sequencer = Sequencer::new();
    let first = sequencer
        .sequence(SequenceAlgorithm::Hybrid, &fixture.inputs())
        .unwrap();
    let second = sequencer
        .sequence(SequenceAlgorithm::Hybrid, &fixture.inputs())
        .unwrap();
    assert_eq!(first.order, second.order);
    assert_eq!(first.parallel_groups, second.parallel_groups);
}
