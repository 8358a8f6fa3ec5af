// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::resources::ResourceManager;
use foreman_core::test_support::{blocks, conflicts, task, task_with_resources};
use foreman_core::{
    ExecutionId, Precondition, ResourceKind, ResourceSpec, TaskConfig, TaskId,
};

fn queue() -> QueueCore {
    let mut resources = ResourceManager::new();
    resources.set_capacity(ResourceKind::Cpu, 2);
    QueueCore::new(resources)
}

fn queue_with(tasks: Vec<foreman_core::Task>) -> QueueCore {
    let mut q = queue();
    for task in tasks {
        q.insert_task(task).unwrap();
    }
    q
}

fn order_of(q: &QueueCore) -> Vec<TaskId> {
    // Admission order used by tests: plain topological order
    q.graph().topological_order().unwrap()
}

// ── Insertion & dependencies ────────────────────────────────────────────────

#[test]
fn insert_rejects_duplicates() {
    let mut q = queue_with(vec![task("a")]);
    let err = q.insert_task(task("a")).unwrap_err();
    assert_eq!(err.code(), "duplicate_task");
    assert_eq!(q.metrics().submitted, 1);
}

#[test]
fn add_dependency_parks_dependent() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(blocks("b", "a"), 1_000).unwrap();

    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Blocked);
    // Reverse reference maintained
    assert_eq!(
        q.get(&TaskId::new("a")).unwrap().dependents,
        vec![TaskId::new("b")]
    );
}

#[test]
fn add_dependency_to_completed_pred_does_not_park() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    run_to_completion(&mut q, "a", 1_000);
    q.add_dependency(blocks("b", "a"), 2_000).unwrap();
    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Pending);
}

#[test]
fn remove_dependency_unparks() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(blocks("b", "a"), 1_000).unwrap();
    q.remove_dependency(&TaskId::new("b"), &TaskId::new("a"), 2_000)
        .unwrap();

    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Pending);
    assert!(q.get(&TaskId::new("a")).unwrap().dependents.is_empty());
}

// ── Eligibility ─────────────────────────────────────────────────────────────

#[test]
fn pending_without_constraints_is_eligible() {
    let q = queue_with(vec![task("a")]);
    assert!(q.is_eligible(q.get(&TaskId::new("a")).unwrap(), 1_000));
}

#[test]
fn unfinished_predecessor_blocks_eligibility() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(blocks("b", "a"), 1_000).unwrap();
    // b is Blocked, and even a hypothetical pending copy would not pass
    assert!(!q.is_eligible(q.get(&TaskId::new("b")).unwrap(), 1_000));

    run_to_completion(&mut q, "a", 2_000);
    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Pending);
    assert!(q.is_eligible(q.get(&TaskId::new("b")).unwrap(), 3_000));
}

#[test]
fn min_delay_defers_eligibility() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(blocks("b", "a").with_min_delay_ms(5_000), 1_000)
        .unwrap();
    run_to_completion(&mut q, "a", 2_000);

    let b = TaskId::new("b");
    assert!(!q.is_eligible(q.get(&b).unwrap(), 6_000));
    assert!(q.is_eligible(q.get(&b).unwrap(), 7_001));
}

#[test]
fn optional_edge_tolerates_failed_predecessor() {
    let mut q = queue_with(vec![task("a"), task("b"), task("c")]);
    q.add_dependency(blocks("b", "a").optional(), 1_000).unwrap();
    q.add_dependency(blocks("c", "a"), 1_000).unwrap();

    // a fails terminally
    q.mark_queued(&TaskId::new("a"), 2_000).unwrap();
    q.mark_running(&TaskId::new("a"), 2_000).unwrap();
    let mut a = q.get(&TaskId::new("a")).unwrap().clone();
    a.max_retries = 0;
    *q.get_mut(&TaskId::new("a")).unwrap() = a;
    q.finish_failure(&TaskId::new("a"), "boom".into(), true, 3_000)
        .unwrap();

    // b (optional edge) was unparked and may proceed; c may not
    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Pending);
    assert!(q.is_eligible(q.get(&TaskId::new("b")).unwrap(), 4_000));
    assert_eq!(q.get(&TaskId::new("c")).unwrap().status, TaskStatus::Blocked);
    assert!(!q.is_eligible(q.get(&TaskId::new("c")).unwrap(), 4_000));
}

#[test]
fn preconditions_gate_admission() {
    let wait = foreman_core::Task::new_with_epoch_ms(
        TaskConfig::builder("wait", "wait", "noop")
            .precondition(Precondition::NotBefore { epoch_ms: 10_000 })
            .build(),
        1_000,
    );
    let q = queue_with(vec![wait]);
    assert!(!q.is_eligible(q.get(&TaskId::new("wait")).unwrap(), 9_999));
    assert!(q.is_eligible(q.get(&TaskId::new("wait")).unwrap(), 10_000));
}

// ── Admission selection ─────────────────────────────────────────────────────

#[test]
fn selection_respects_concurrency_ceiling() {
    let q = queue_with(vec![task("a"), task("b"), task("c")]);
    let selected = q.select_admissions(&order_of(&q), 2, 1_000);
    assert_eq!(selected.len(), 2);
}

#[test]
fn selection_respects_resource_budget() {
    let q = queue_with(vec![
        task_with_resources("t1", vec![ResourceSpec::new("cpu", 2)]),
        task_with_resources("t2", vec![ResourceSpec::new("cpu", 2)]),
        task_with_resources("t3", vec![ResourceSpec::new("cpu", 2)]),
    ]);
    // cpu capacity is 2: only one fits per pass
    let selected = q.select_admissions(&order_of(&q), 5, 1_000);
    assert_eq!(selected.len(), 1);
}

#[test]
fn selection_skips_conflicting_pairs() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(conflicts("a", "b"), 1_000).unwrap();
    let selected = q.select_admissions(&order_of(&q), 5, 1_000);
    assert_eq!(selected.len(), 1);
}

#[test]
fn batch_group_tasks_admit_together() {
    let mk = |id: &str| {
        foreman_core::Task::new_with_epoch_ms(
            TaskConfig::builder(id, id, "noop").batch_group("lint").build(),
            1_000,
        )
    };
    let solo = task("solo");
    let q = queue_with(vec![mk("b1"), mk("b2"), solo]);

    let order = vec![TaskId::new("b1"), TaskId::new("b2"), TaskId::new("solo")];
    let selected = q.select_admissions(&order, 5, 1_000);
    // The batch admits together; the unrelated task waits for the next pass
    assert_eq!(selected, vec![TaskId::new("b1"), TaskId::new("b2")]);
}

#[test]
fn running_tasks_consume_ceiling() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    q.mark_running(&TaskId::new("a"), 1_000).unwrap();

    let selected = q.select_admissions(&order_of(&q), 1, 2_000);
    assert!(selected.is_empty());
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

fn run_to_completion(q: &mut QueueCore, id: &str, now_ms: u64) {
    let task_id = TaskId::new(id);
    q.mark_queued(&task_id, now_ms).unwrap();
    q.mark_running(&task_id, now_ms).unwrap();
    q.finish_success(&task_id, serde_json::json!({}), now_ms + 500)
        .unwrap();
}

#[test]
fn success_path_updates_everything() {
    let mut q = queue_with(vec![task("a"), task("b")]);
    q.add_dependency(blocks("b", "a"), 500).unwrap();

    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    let attempt = q.mark_running(&TaskId::new("a"), 1_000).unwrap();
    assert_eq!(attempt, 0);
    assert!(q.running().contains("a"));

    q.push_record(ExecutionRecord::begin(
        TaskId::new("a"),
        ExecutionId::new("x-1"),
        0,
        vec![],
        1_000,
    ));

    let unblocked = q
        .finish_success(&TaskId::new("a"), serde_json::json!({"ok": true}), 2_000)
        .unwrap();
    assert_eq!(unblocked, vec![TaskId::new("b")]);
    assert!(!q.running().contains("a"));
    assert_eq!(q.metrics().completed, 1);
    assert_eq!(q.progress_of(&TaskId::new("a")), Some(100));
    assert_eq!(
        q.output_of(&TaskId::new("a")),
        Some(&serde_json::json!({"ok": true}))
    );
    assert!(q.records_for(&TaskId::new("a"))[0].succeeded());
    assert_eq!(q.get(&TaskId::new("b")).unwrap().status, TaskStatus::Pending);
}

#[test]
fn retriable_failure_returns_to_pending_with_backoff() {
    let mut q = queue_with(vec![task("a")]);
    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    q.mark_running(&TaskId::new("a"), 1_000).unwrap();

    let disposition = q
        .finish_failure(&TaskId::new("a"), "flaky".into(), true, 2_000)
        .unwrap();
    assert_eq!(
        disposition,
        FailureDisposition::Retry {
            attempt: 1,
            backoff_ms: 1_000,
        }
    );

    let a = q.get(&TaskId::new("a")).unwrap();
    assert_eq!(a.status, TaskStatus::Pending);
    assert_eq!(a.retry_count, 1);
    assert_eq!(q.metrics().retried, 1);

    // Backoff gates eligibility until it elapses
    assert!(!q.is_eligible(a, 2_999));
    assert!(q.is_eligible(q.get(&TaskId::new("a")).unwrap(), 3_000));
}

#[test]
fn exhausted_retries_fail_terminally() {
    let mut q = queue_with(vec![task("a")]);
    let task_id = TaskId::new("a");

    for attempt in 0..3u32 {
        q.mark_queued(&task_id, 1_000 + attempt as u64).unwrap();
        q.mark_running(&task_id, 1_000 + attempt as u64).unwrap();
        // Clear the backoff gate for the test's immediate re-admission
        let disposition = q
            .finish_failure(&task_id, "flaky".into(), true, 2_000)
            .unwrap();
        assert!(matches!(disposition, FailureDisposition::Retry { .. }));
        q.clear_retry_gate(&task_id);
    }

    q.mark_queued(&task_id, 5_000).unwrap();
    q.mark_running(&task_id, 5_000).unwrap();
    let disposition = q
        .finish_failure(&task_id, "flaky".into(), true, 6_000)
        .unwrap();
    assert_eq!(disposition, FailureDisposition::Terminal);
    assert_eq!(q.get(&task_id).unwrap().status, TaskStatus::Failed);
    assert_eq!(q.metrics().failed, 1);
}

#[test]
fn fatal_failure_skips_retries() {
    let mut q = queue_with(vec![task("a")]);
    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    q.mark_running(&TaskId::new("a"), 1_000).unwrap();

    let disposition = q
        .finish_failure(&TaskId::new("a"), "broken".into(), false, 2_000)
        .unwrap();
    assert_eq!(disposition, FailureDisposition::Terminal);
    assert_eq!(q.get(&TaskId::new("a")).unwrap().status, TaskStatus::Failed);
}

#[test]
fn cancel_pending_is_immediate() {
    let mut q = queue_with(vec![task("a")]);
    assert!(q.cancel(&TaskId::new("a"), 1_000).unwrap());
    assert_eq!(q.get(&TaskId::new("a")).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(q.metrics().cancelled, 1);
}

#[test]
fn cancel_is_idempotent() {
    let mut q = queue_with(vec![task("a")]);
    assert!(q.cancel(&TaskId::new("a"), 1_000).unwrap());
    assert!(!q.cancel(&TaskId::new("a"), 2_000).unwrap());
    assert_eq!(q.metrics().cancelled, 1);
}

#[test]
fn cancel_running_defers_to_harness() {
    let mut q = queue_with(vec![task("a")]);
    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    q.mark_running(&TaskId::new("a"), 1_000).unwrap();

    assert!(q.cancel(&TaskId::new("a"), 2_000).unwrap());
    // Still running until the harness confirms
    assert_eq!(q.get(&TaskId::new("a")).unwrap().status, TaskStatus::Running);

    q.finish_cancelled(&TaskId::new("a"), 3_000).unwrap();
    assert_eq!(q.get(&TaskId::new("a")).unwrap().status, TaskStatus::Cancelled);
    assert!(!q.running().contains("a"));
}

// ── Snapshot round-trip ─────────────────────────────────────────────────────

#[test]
fn snapshot_body_round_trip_preserves_queue() {
    let mut q = queue_with(vec![task("a"), task("b"), task("c")]);
    q.add_dependency(blocks("b", "a"), 500).unwrap();
    run_to_completion(&mut q, "a", 1_000);

    let body = q.snapshot_body();

    let mut restored = queue();
    restored.restore_from(body);

    assert_eq!(restored.tasks().len(), 3);
    assert_eq!(
        restored.get(&TaskId::new("a")).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(restored.graph().edges().count(), 1);
    assert_eq!(restored.metrics().completed, 1);
    assert_eq!(
        restored.output_of(&TaskId::new("a")),
        Some(&serde_json::json!({}))
    );
}

#[test]
fn restore_returns_interrupted_work_to_pending() {
    let mut q = queue_with(vec![task("a")]);
    q.mark_queued(&TaskId::new("a"), 1_000).unwrap();
    q.mark_running(&TaskId::new("a"), 1_000).unwrap();

    let body = q.snapshot_body();
    let mut restored = queue();
    restored.restore_from(body);

    let a = restored.get(&TaskId::new("a")).unwrap();
    assert_eq!(a.status, TaskStatus::Pending);
    assert!(a.started_at_ms.is_none());
    assert!(restored.running().is_empty());
}
