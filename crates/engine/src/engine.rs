// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine handle: public API plus the coordination loop.
//!
//! All shared structures (task map, graph, resource pools, session
//! registry, txn log, timers) live behind one coordination lock, so
//! admission decisions observe a consistent snapshot and per-task state
//! transitions are linearizable. The loop runs on a dedicated tokio
//! task; admitted tasks execute on independent workers that report back
//! over a channel.
//!
//! Locking discipline: ownership → resources → execution slot, released
//! strictly LIFO on every exit path.

use crate::conflict::{ConflictResolver, Resolution, ResolutionStrategy, SyncConflict};
use crate::error::EngineError;
use crate::events::{EventBus, EventFilter, Subscription};
use crate::executor::{
    run_attempt, AttemptOutcome, Breakdown, CapabilityRegistry, ExecContext, Execute, NoBreakdown,
    ProgressReport,
};
use crate::graph::ImpactReport;
use crate::optimizer::{Optimizer, Recommendation};
use crate::priority::{PriorityContext, PriorityEngine};
use crate::queue::{FailureDisposition, QueueCore};
use crate::recovery::{self, RecoveryReport};
use crate::resources::{ResourceLease, ResourceManager};
use crate::sequencer::{ExecutionSequence, SequenceAlgorithm, SequenceInputs, Sequencer};
use crate::sessions::{SessionRegistry, SessionRegistryConfig};
use crate::timers::TimerQueue;
use foreman_core::{
    Clock, Event, ExecutionId, ExecutionRecord, IdGen, OwnershipMode, PriorityFactors,
    ResourceSpec, SessionId, SnapshotKind, SystemClock, Task, TaskConfig, TaskDependency, TaskId,
    TaskStatus, UuidIdGen,
};
use foreman_storage::{
    EntityKind, SessionStore, SnapshotManager, TxnEntry, TxnLog, TxnOp, VerifyReport, WorkDir,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

/// Persistence failures tolerated before the engine turns read-only.
const MAX_PERSIST_FAILURES: u32 = 3;

/// Engine configuration supplied by the embedder (no file loading here).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workdir: PathBuf,
    /// Identity of the embedding agent, recorded on the session.
    pub agent_id: String,
    /// Concurrency ceiling for simultaneous executions.
    pub max_concurrent: usize,
    /// Algorithm the admission loop sequences with.
    pub admission_algorithm: SequenceAlgorithm,
    pub snapshot_interval_ms: u64,
    /// Automatic snapshot after this many logged operations.
    pub snapshot_every_ops: u64,
    pub heartbeat_interval_ms: u64,
    pub session_timeout_ms: u64,
    pub crash_timeout_ms: u64,
    /// Grace window for cooperative cancellation.
    pub cancel_grace_ms: u64,
    pub compress_snapshots: bool,
    pub snapshot_retention: usize,
    /// Typed pools: kind plus capacity.
    pub resource_pools: Vec<ResourceSpec>,
    pub default_resolution: ResolutionStrategy,
}

impl EngineConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            agent_id: "foreman".to_string(),
            max_concurrent: 5,
            admission_algorithm: SequenceAlgorithm::Hybrid,
            snapshot_interval_ms: 5 * 60_000,
            snapshot_every_ops: 1_000,
            heartbeat_interval_ms: 30_000,
            session_timeout_ms: 30 * 60_000,
            crash_timeout_ms: 10 * 60_000,
            cancel_grace_ms: 5_000,
            compress_snapshots: false,
            snapshot_retention: 10,
            resource_pools: Vec::new(),
            default_resolution: ResolutionStrategy::LastWriteWins,
        }
    }
}

/// Point-in-time view of one task, returned by [`Engine::status`].
#[derive(Debug, Clone)]
pub struct TaskStatusReport {
    pub id: TaskId,
    pub state: TaskStatus,
    pub progress: Option<u8>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Stable code of the terminal failure, when failed.
    pub error_code: Option<String>,
    pub attempts: u32,
    pub dynamic_priority: f64,
    pub factors: PriorityFactors,
    pub executions: usize,
}

/// A running task's control block.
struct RunningTask {
    cancel_tx: watch::Sender<bool>,
    lease: ResourceLease,
    #[allow(dead_code)]
    execution_id: ExecutionId,
}

/// Message from a worker back to the coordination loop.
enum EngineMsg {
    AttemptDone {
        task_id: TaskId,
        outcome: AttemptOutcome,
    },
}

/// Everything behind the coordination lock.
struct CoreState {
    queue: QueueCore,
    sessions: SessionRegistry,
    txn: TxnLog,
    timers: TimerQueue,
    running_handles: HashMap<String, RunningTask>,
    cancel_reasons: HashMap<String, String>,
    pending_conflicts: HashMap<String, SyncConflict>,
    /// Signatures of conflicts already surfaced, so a rescan of the
    /// (bounded) log does not re-detect them.
    seen_conflicts: HashSet<String>,
    ops_since_snapshot: u64,
    persist_failures: u32,
    read_only: bool,
    shutting_down: bool,
}

struct Inner<C: Clock> {
    cfg: EngineConfig,
    clock: C,
    session_id: SessionId,
    ids: UuidIdGen,
    state: Mutex<CoreState>,
    snapshots: SnapshotManager,
    session_store: SessionStore,
    bus: EventBus,
    registry: CapabilityRegistry,
    breakdown: Mutex<Box<dyn Breakdown>>,
    priority: PriorityEngine,
    sequencer: Sequencer,
    resolver: ConflictResolver,
    optimizer: Optimizer,
    msg_tx: mpsc::Sender<EngineMsg>,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    recovery: RecoveryReport,
}

/// The scheduling engine. Construct with [`Engine::open`]. Not Clone;
/// share it behind an `Arc` if multiple owners need it.
pub struct Engine<C: Clock + Clone + 'static = SystemClock> {
    inner: Arc<Inner<C>>,
    loop_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine<SystemClock> {
    /// Open an engine on a working directory with the system clock.
    ///
    /// Loads the latest valid snapshot, reconciles crashed peer
    /// sessions, and starts the coordination loop. Must be called inside
    /// a tokio runtime.
    pub fn open(cfg: EngineConfig) -> Result<Self, EngineError> {
        Self::open_with_clock(cfg, SystemClock)
    }
}

impl<C: Clock + Clone + 'static> Engine<C> {
    /// Open with an explicit clock (deterministic tests).
    pub fn open_with_clock(cfg: EngineConfig, clock: C) -> Result<Self, EngineError> {
        let workdir = WorkDir::new(cfg.workdir.clone());
        workdir.ensure_layout()?;

        let snapshots = SnapshotManager::new(workdir.clone())
            .with_retention(foreman_storage::RetentionPolicy {
                snapshots: cfg.snapshot_retention,
                backups: 5,
            })
            .with_compression(cfg.compress_snapshots);
        let session_store = SessionStore::new(workdir.clone());

        let mut resources = ResourceManager::new();
        for pool in &cfg.resource_pools {
            resources.set_capacity(pool.kind.clone(), pool.units);
        }
        let mut queue = QueueCore::new(resources);

        let mut report = recovery::restore_latest(&mut queue, &snapshots)?;

        let ids = UuidIdGen;
        let session_id = SessionId::new(ids.next());
        let now_ms = clock.epoch_ms();

        let mut sessions = SessionRegistry::new(SessionRegistryConfig {
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            session_timeout_ms: cfg.session_timeout_ms,
            crash_timeout_ms: cfg.crash_timeout_ms,
        });
        let own = sessions.open(session_id.clone(), cfg.agent_id.clone(), now_ms).clone();
        session_store.save(&own)?;

        recovery::recover_crashed_sessions(
            &mut queue,
            &mut sessions,
            &snapshots,
            &session_store,
            &session_id,
            &clock,
            &mut report,
        );

        let txn = TxnLog::open(&workdir.txn_log_path())?;

        let (msg_tx, msg_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            resolver: ConflictResolver::new(),
            optimizer: Optimizer::new(),
            priority: PriorityEngine::new(),
            sequencer: Sequencer::new(),
            breakdown: Mutex::new(Box::new(NoBreakdown)),
            registry: CapabilityRegistry::new(),
            bus: EventBus::new(),
            session_store,
            snapshots,
            state: Mutex::new(CoreState {
                queue,
                sessions,
                txn,
                timers: TimerQueue::new(),
                running_handles: HashMap::new(),
                cancel_reasons: HashMap::new(),
                pending_conflicts: HashMap::new(),
                seen_conflicts: HashSet::new(),
                ops_since_snapshot: 0,
                persist_failures: 0,
                read_only: false,
                shutting_down: false,
            }),
            ids,
            session_id,
            clock,
            cfg,
            msg_tx,
            wake: Notify::new(),
            shutdown_tx,
            recovery: report,
        });

        {
            let mut st = inner.state.lock();
            let now = Instant::now();
            st.timers.set(
                "heartbeat",
                Duration::from_millis(inner.cfg.heartbeat_interval_ms),
                now,
            );
            st.timers.set(
                "snapshot",
                Duration::from_millis(inner.cfg.snapshot_interval_ms),
                now,
            );
        }

        let loop_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            run_loop(loop_inner, msg_rx).await;
        });

        info!(session = %inner.session_id, "engine opened");
        Ok(Self {
            inner,
            loop_task: Mutex::new(Some(handle)),
        })
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Register an `Execute` capability under a key.
    pub fn register_capability(&self, key: impl Into<String>, capability: Arc<dyn Execute>) {
        self.inner.registry.register(key, capability);
        self.inner.wake.notify_one();
    }

    /// Install a breakdown hook (replaces the no-op default).
    pub fn set_breakdown(&self, hook: Box<dyn Breakdown>) {
        *self.inner.breakdown.lock() = hook;
    }

    /// This engine's session id.
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// What startup recovery found.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery
    }

    // ── Task API ────────────────────────────────────────────────────────────

    /// Submit a task. An empty `id` in the config gets a generated one.
    ///
    /// The executor key must already be registered; restored tasks are
    /// exempt (their capabilities may be re-registered later).
    pub async fn submit(&self, mut config: TaskConfig) -> Result<TaskId, EngineError> {
        if !self.inner.registry.contains(&config.executor_key) {
            return Err(EngineError::UnknownExecutor(config.executor_key));
        }
        if config.id.is_empty() {
            config.id = self.inner.ids.next();
        }

        let (task_id, events) = {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                return Err(EngineError::ShuttingDown);
            }
            if st.read_only {
                return Err(EngineError::ReadOnly);
            }
            submit_locked(&self.inner, &mut st, config)?
        };

        for event in events {
            self.inner.bus.publish(&event).await;
        }
        self.inner.wake.notify_one();
        Ok(task_id)
    }

    /// Cancel a task. Idempotent; returns `false` when the task was
    /// already terminal. Running tasks get a cooperative signal and
    /// finalize within the grace window.
    pub async fn cancel(&self, id: &TaskId, reason: &str) -> Result<bool, EngineError> {
        let (changed, event) = {
            let mut st = self.inner.state.lock();
            let now_ms = self.inner.clock.epoch_ms();
            let before = st.queue.get(id).and_then(|t| serde_json::to_value(t).ok());
            let changed = st.queue.cancel(id, now_ms)?;
            if !changed {
                return Ok(false);
            }

            if let Some(cancel_tx) = st.running_handles.get(id.as_str()).map(|h| h.cancel_tx.clone()) {
                // Cooperative: the harness reports back and the loop
                // finalizes state then
                st.cancel_reasons.insert(id.to_string(), reason.to_string());
                let _ = cancel_tx.send(true);
                (true, None)
            } else {
                let after = st.queue.get(id).and_then(|t| serde_json::to_value(t).ok());
                self.log_txn(
                    &mut st,
                    TxnOp::Transition,
                    EntityKind::Task,
                    id.as_str(),
                    before,
                    after,
                );
                (
                    true,
                    Some(Event::TaskCancelled {
                        id: id.clone(),
                        reason: reason.to_string(),
                    }),
                )
            }
        };

        if let Some(event) = event {
            self.inner.bus.publish(&event).await;
        }
        self.inner.wake.notify_one();
        Ok(changed)
    }

    /// Current state of a task.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatusReport, EngineError> {
        let st = self.inner.state.lock();
        let task = st.queue.require(id)?;
        Ok(TaskStatusReport {
            id: task.id.clone(),
            state: task.status,
            progress: st.queue.progress_of(id),
            result: st.queue.output_of(id).cloned(),
            error: task.error.clone(),
            error_code: match task.status {
                TaskStatus::Failed => Some("execution_failed".to_string()),
                TaskStatus::Cancelled => Some("cancelled".to_string()),
                _ => None,
            },
            attempts: task.retry_count + 1,
            dynamic_priority: task.dynamic_priority,
            factors: task.priority_factors.clone(),
            executions: st.queue.records_for(id).len(),
        })
    }

    /// All tasks (snapshot copy).
    pub fn tasks(&self) -> HashMap<String, Task> {
        self.inner.state.lock().queue.tasks().clone()
    }

    /// Queue metrics (snapshot copy).
    pub fn metrics(&self) -> foreman_core::QueueMetrics {
        self.inner.state.lock().queue.metrics().clone()
    }

    // ── Dependency API ──────────────────────────────────────────────────────

    /// Add a typed dependency edge.
    ///
    /// Fails with [`EngineError::CycleWouldForm`] (naming the exact
    /// path) when the edge would close an ordering cycle; a
    /// `cycle:detected` event is published as well.
    pub async fn add_dependency(
        &self,
        dependent: &TaskId,
        depends_on: &TaskId,
        dep_type: foreman_core::DependencyType,
        optional: bool,
    ) -> Result<foreman_core::EdgeId, EngineError> {
        let edge_id = foreman_core::EdgeId::new(self.inner.ids.next());
        let mut dep = TaskDependency::new(
            edge_id.clone(),
            dependent.clone(),
            depends_on.clone(),
            dep_type,
        );
        if optional {
            dep = dep.optional();
        }

        let result = {
            let mut st = self.inner.state.lock();
            let now_ms = self.inner.clock.epoch_ms();
            let after = serde_json::to_value(&dep).ok();
            match st.queue.add_dependency(dep, now_ms) {
                Ok(()) => {
                    self.log_txn(
                        &mut st,
                        TxnOp::Create,
                        EntityKind::Dependency,
                        edge_id.as_str(),
                        None,
                        after,
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                self.inner
                    .bus
                    .publish(&Event::DependencyAdded {
                        id: edge_id.clone(),
                        dependent: dependent.clone(),
                        depends_on: depends_on.clone(),
                        dep_type,
                    })
                    .await;
                self.inner.wake.notify_one();
                Ok(edge_id)
            }
            Err(EngineError::CycleWouldForm { path }) => {
                self.inner
                    .bus
                    .publish(&Event::CycleDetected { path: path.clone() })
                    .await;
                Err(EngineError::CycleWouldForm { path })
            }
            Err(e) => Err(e),
        }
    }

    /// Remove all edges between a pair.
    pub async fn remove_dependency(
        &self,
        dependent: &TaskId,
        depends_on: &TaskId,
    ) -> Result<(), EngineError> {
        {
            let mut st = self.inner.state.lock();
            let now_ms = self.inner.clock.epoch_ms();
            st.queue.remove_dependency(dependent, depends_on, now_ms)?;
            self.log_txn(
                &mut st,
                TxnOp::Delete,
                EntityKind::Dependency,
                &format!("{}->{}", dependent, depends_on),
                None,
                None,
            );
        }
        self.inner
            .bus
            .publish(&Event::DependencyRemoved {
                dependent: dependent.clone(),
                depends_on: depends_on.clone(),
            })
            .await;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Downstream impact of a task.
    pub fn impact(&self, id: &TaskId) -> Result<ImpactReport, EngineError> {
        let st = self.inner.state.lock();
        Ok(st.queue.graph().impact(id)?)
    }

    // ── Sequencing ──────────────────────────────────────────────────────────

    /// Produce an execution sequence under the given algorithm.
    pub fn sequence(&self, algorithm: SequenceAlgorithm) -> Result<ExecutionSequence, EngineError> {
        let st = self.inner.state.lock();
        let inputs = SequenceInputs {
            tasks: st.queue.tasks(),
            graph: st.queue.graph(),
            resources: st.queue.resources(),
            history: st.queue.history(),
            now_ms: self.inner.clock.epoch_ms(),
        };
        Ok(self.inner.sequencer.sequence(algorithm, &inputs)?)
    }

    // ── Persistence API ─────────────────────────────────────────────────────

    /// Take a snapshot now. Returns the snapshot id.
    pub async fn snapshot(&self, kind: SnapshotKind) -> Result<String, EngineError> {
        let meta = {
            let mut st = self.inner.state.lock();
            let _ = st.txn.flush();
            let body = st.queue.snapshot_body();
            let queue_state = if st.shutting_down { "shutdown" } else { "active" };
            let meta = self.inner.snapshots.create(
                body,
                self.inner.session_id.clone(),
                kind,
                queue_state,
                chrono::Utc::now(),
            )?;
            st.ops_since_snapshot = 0;
            st.queue.metrics_mut().snapshots_created += 1;
            meta
        };

        self.inner
            .bus
            .publish(&Event::SnapshotCreated {
                id: meta.id.clone(),
                kind: meta.kind,
                task_count: meta.task_count,
                size_bytes: meta.size_bytes,
            })
            .await;
        Ok(meta.id)
    }

    /// Restore queue state from a snapshot.
    ///
    /// Running tasks are signalled to cancel first; interrupted work
    /// re-runs from `pending` after the restore (at-least-once).
    pub async fn restore(&self, snapshot_id: &str) -> Result<(), EngineError> {
        let snapshot = self
            .inner
            .snapshots
            .load(snapshot_id)?
            .ok_or_else(|| EngineError::UnknownSnapshot(snapshot_id.to_string()))?;

        {
            let mut st = self.inner.state.lock();
            for handle in st.running_handles.values() {
                let _ = handle.cancel_tx.send(true);
            }
            st.running_handles.clear();
            st.queue.restore_from(snapshot.body);
        }

        self.inner
            .bus
            .publish(&Event::SnapshotRestored {
                id: snapshot_id.to_string(),
            })
            .await;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Mark a snapshot as a retained backup.
    pub fn backup_snapshot(&self, snapshot_id: &str) -> Result<(), EngineError> {
        Ok(self.inner.snapshots.mark_backup(snapshot_id)?)
    }

    /// Replay the txn log's checksums.
    pub fn verify_log(&self) -> Result<VerifyReport, EngineError> {
        let mut st = self.inner.state.lock();
        Ok(st.txn.verify()?)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    // ── Sessions & conflicts ────────────────────────────────────────────────

    /// Record a mutation observed from another session (bridged in by
    /// the embedder). Feeds conflict detection.
    pub fn record_remote_change(
        &self,
        session_id: &SessionId,
        entity: EntityKind,
        entity_id: &str,
        ts_ms: u64,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Result<(), EngineError> {
        let mut st = self.inner.state.lock();
        let entry = TxnEntry::new(
            self.inner.ids.next(),
            ts_ms,
            TxnOp::Update,
            entity,
            entity_id,
            session_id.clone(),
            before,
            after,
        );
        st.txn.append(&entry)?;
        Ok(())
    }

    /// Conflicts detected but awaiting a manual resolution payload.
    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.inner
            .state
            .lock()
            .pending_conflicts
            .values()
            .cloned()
            .collect()
    }

    /// Resolve a pending conflict with an explicit strategy.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        manual_payload: Option<Value>,
    ) -> Result<(), EngineError> {
        let resolution = {
            let mut st = self.inner.state.lock();
            let conflict = st
                .pending_conflicts
                .get(conflict_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownConflict(conflict_id.to_string()))?;
            let resolution = self
                .inner
                .resolver
                .resolve(&conflict, strategy, manual_payload)?;
            st.pending_conflicts.remove(conflict_id);
            st.queue.metrics_mut().conflicts_resolved += 1;
            apply_resolution(&mut st, &resolution, self.inner.clock.epoch_ms());
            resolution
        };

        self.inner
            .bus
            .publish(&Event::ConflictResolved {
                id: resolution.conflict_id.clone(),
                strategy: resolution.strategy.as_str().to_string(),
                winner: resolution.winner.session_id.clone(),
            })
            .await;
        Ok(())
    }

    // ── Advisory ────────────────────────────────────────────────────────────

    /// Current optimizer recommendations.
    pub fn recommendations(&self) -> Vec<Recommendation> {
        let st = self.inner.state.lock();
        self.inner.optimizer.analyze(
            st.queue.tasks(),
            st.queue.execution_records(),
            st.queue.metrics(),
            st.queue.resources(),
            self.inner.cfg.max_concurrent,
        )
    }

    /// Apply the breakdown hook to a task, submitting any subtasks it
    /// yields. Returns the new task ids (empty with the default hook).
    pub async fn breakdown(&self, id: &TaskId) -> Result<Vec<TaskId>, EngineError> {
        let configs = {
            let st = self.inner.state.lock();
            let task = st.queue.require(id)?.clone();
            self.inner.breakdown.lock().breakdown(&task)
        };

        let mut created = Vec::new();
        for config in configs {
            created.push(self.submit(config).await?);
        }
        Ok(created)
    }

    // ── Shutdown ────────────────────────────────────────────────────────────

    /// Stop admitting, drain (or cancel) running work, persist, and
    /// terminate the session. After a non-forced shutdown returns, no
    /// task remains `running`.
    pub async fn shutdown(&self, force: bool) -> Result<(), EngineError> {
        {
            let mut st = self.inner.state.lock();
            st.shutting_down = true;
            if force {
                for handle in st.running_handles.values() {
                    let _ = handle.cancel_tx.send(true);
                }
            }
        }
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.wake.notify_one();

        let handle = self.loop_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Final persistence pass
        let final_snapshot = {
            let mut st = self.inner.state.lock();
            let _ = st.txn.flush();
            st.queue.snapshot_body()
        };
        if let Err(e) = self.inner.snapshots.create(
            final_snapshot,
            self.inner.session_id.clone(),
            SnapshotKind::Automatic,
            "shutdown",
            chrono::Utc::now(),
        ) {
            warn!(error = %e, "final shutdown snapshot failed");
        }

        {
            let mut st = self.inner.state.lock();
            st.sessions.terminate(&self.inner.session_id);
            if let Some(session) = st.sessions.get(&self.inner.session_id) {
                let _ = self.inner.session_store.save(session);
            }
        }

        info!(session = %self.inner.session_id, forced = force, "engine shut down");
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────────

    /// Append a txn entry, tracking the write-degradation ladder.
    fn log_txn(
        &self,
        st: &mut CoreState,
        op: TxnOp,
        entity: EntityKind,
        entity_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let entry = TxnEntry::new(
            self.inner.ids.next(),
            self.inner.clock.epoch_ms(),
            op,
            entity,
            entity_id,
            self.inner.session_id.clone(),
            before,
            after,
        );
        st.ops_since_snapshot += 1;
        if let Err(e) = st.txn.append(&entry) {
            st.persist_failures += 1;
            error!(
                error = %e,
                failures = st.persist_failures,
                "txn log append failed; continuing in memory",
            );
            if st.persist_failures >= MAX_PERSIST_FAILURES {
                st.read_only = true;
                error!("persistence failing repeatedly; engine now read-only");
            }
        }
    }
}

/// Route a resolution's winning payload through the normal mutation path.
fn apply_resolution(st: &mut CoreState, resolution: &Resolution, now_ms: u64) {
    let Some(payload) = &resolution.apply_payload else {
        return;
    };
    if resolution.winner.entity != EntityKind::Task {
        return;
    }
    match serde_json::from_value::<Task>(payload.clone()) {
        Ok(mut task) => {
            let id = task.id.to_string();
            if let Some(existing) = st.queue.tasks().get(&id) {
                task.version = task.version.max(existing.version) + 1;
            }
            if let Some(existing) = st.queue.get_mut(&task.id) {
                *existing = task;
                debug!(task = %id, at = now_ms, "applied conflict winner");
            }
        }
        Err(e) => {
            warn!(error = %e, "conflict winner payload is not a task; skipping apply");
        }
    }
}

// ── Coordination loop ───────────────────────────────────────────────────────

async fn run_loop<C: Clock + Clone + 'static>(
    inner: Arc<Inner<C>>,
    mut msg_rx: mpsc::Receiver<EngineMsg>,
) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    loop {
        let sleep_for = {
            let st = inner.state.lock();
            st.timers
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(500))
        };

        tokio::select! {
            _ = inner.wake.notified() => {}
            msg = msg_rx.recv() => {
                if let Some(msg) = msg {
                    handle_msg(&inner, msg).await;
                }
            }
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown_rx.changed() => {}
        }

        process_timers(&inner).await;
        {
            let mut st = inner.state.lock();
            if st.txn.needs_flush() {
                if let Err(e) = st.txn.flush() {
                    st.persist_failures += 1;
                    error!(error = %e, "txn log flush failed");
                    if st.persist_failures >= MAX_PERSIST_FAILURES {
                        st.read_only = true;
                    }
                }
            }
        }
        pump_admissions(&inner).await;
        maybe_ops_snapshot(&inner).await;

        let done = {
            let st = inner.state.lock();
            st.shutting_down && st.running_handles.is_empty()
        };
        if done {
            break;
        }
    }
}

/// Fired timers: heartbeat maintenance, periodic snapshots, retry wakes.
async fn process_timers<C: Clock + Clone + 'static>(inner: &Arc<Inner<C>>) {
    let now = Instant::now();
    let fired = {
        let mut st = inner.state.lock();
        st.timers.fired(now)
    };
    if fired.is_empty() {
        return;
    }

    for id in fired {
        match id.as_str() {
            "heartbeat" => heartbeat_tick(inner).await,
            "snapshot" => {
                let should = {
                    let st = inner.state.lock();
                    st.ops_since_snapshot > 0 && !st.shutting_down
                };
                if should {
                    if let Err(e) = snapshot_automatic(inner).await {
                        warn!(error = %e, "periodic snapshot failed");
                    }
                }
                let mut st = inner.state.lock();
                st.timers.set(
                    "snapshot",
                    Duration::from_millis(inner.cfg.snapshot_interval_ms),
                    Instant::now(),
                );
            }
            other => {
                // retry:<task> timers exist only to wake the admission
                // loop once the backoff elapsed
                debug!(timer = other, "timer fired");
            }
        }
    }
}

async fn heartbeat_tick<C: Clock + Clone + 'static>(inner: &Arc<Inner<C>>) {
    let now_ms = inner.clock.epoch_ms();
    let mut events = Vec::new();

    {
        let mut st = inner.state.lock();

        // Own heartbeat, persisted so peers can see us alive
        if let Some(event) = st.sessions.heartbeat(&inner.session_id, now_ms) {
            events.push(event);
        }
        if let Some(session) = st.sessions.get(&inner.session_id) {
            let _ = inner.session_store.save(session);
        }

        // Peer liveness from session files
        if let Ok(stored) = inner.session_store.list() {
            for session in stored {
                if session.id != inner.session_id {
                    st.sessions.upsert(session);
                }
            }
        }
        let crash_events = st.sessions.tick(now_ms);
        for event in &crash_events {
            if let Event::SessionCrashed { id } = event {
                st.queue.resources_mut().release_session(id);
            }
        }
        events.extend(crash_events);

        // Dynamic priority refresh
        recompute_priorities(&mut st, &inner.priority, now_ms);

        // Conflict scan over the txn log
        events.extend(scan_conflicts(inner, &mut st, now_ms));

        st.timers.set(
            "heartbeat",
            Duration::from_millis(inner.cfg.heartbeat_interval_ms),
            Instant::now(),
        );
    }

    for event in events {
        inner.bus.publish(&event).await;
    }
}

/// Recompute dynamic priorities for live tasks.
fn recompute_priorities(st: &mut CoreState, engine: &PriorityEngine, now_ms: u64) {
    let critical: HashSet<TaskId> = match st.queue.graph().critical_path() {
        Ok(path) => path.tasks.into_iter().collect(),
        Err(_) => HashSet::new(),
    };

    let decisions: Vec<(TaskId, f64, PriorityFactors)> = {
        let ctx = PriorityContext {
            tasks: st.queue.tasks(),
            graph: st.queue.graph(),
            resources: st.queue.resources(),
            history: st.queue.history(),
            critical_path: &critical,
            now_ms,
        };
        st.queue
            .tasks()
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| {
                let decision = engine.recompute(t, &ctx);
                (t.id.clone(), decision.dynamic_priority, decision.factors)
            })
            .collect()
    };

    for (id, dynamic_priority, factors) in decisions {
        if let Some(task) = st.queue.get_mut(&id) {
            task.dynamic_priority = dynamic_priority;
            task.priority_factors = factors;
        }
    }
}

/// Detect fresh conflicts and auto-resolve under the default strategy.
fn scan_conflicts<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    st: &mut CoreState,
    now_ms: u64,
) -> Vec<Event> {
    let mut events = Vec::new();

    // The log is bounded, so a full scan per tick stays cheap; the
    // seen-signature set keeps rescans from re-surfacing old conflicts.
    let entries = match st.txn.entries() {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "conflict scan could not read txn log");
            return events;
        }
    };

    for conflict in inner.resolver.detect(&entries, now_ms) {
        let signature = format!(
            "{}:{}:{}",
            conflict.entity,
            conflict.entity_id,
            conflict.changes.first().map(|c| c.ts_ms).unwrap_or(0)
        );
        if !st.seen_conflicts.insert(signature) {
            continue;
        }

        st.queue.metrics_mut().conflicts_detected += 1;
        events.push(Event::ConflictDetected {
            id: conflict.id.clone(),
            entity_kind: conflict.entity.to_string(),
            entity_id: conflict.entity_id.clone(),
            sessions: conflict.sessions(),
        });

        match inner
            .resolver
            .resolve(&conflict, inner.cfg.default_resolution, None)
        {
            Ok(resolution) => {
                apply_resolution(st, &resolution, now_ms);
                st.queue.metrics_mut().conflicts_resolved += 1;
                events.push(Event::ConflictResolved {
                    id: resolution.conflict_id.clone(),
                    strategy: resolution.strategy.as_str().to_string(),
                    winner: resolution.winner.session_id.clone(),
                });
            }
            Err(EngineError::ManualResolutionRequired(_)) => {
                // Parked for an explicit resolve_conflict call
                st.pending_conflicts
                    .insert(conflict.id.clone(), conflict);
            }
            Err(e) => {
                warn!(error = %e, "conflict resolution failed");
            }
        }
    }

    events
}

async fn snapshot_automatic<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
) -> Result<(), EngineError> {
    let meta = {
        let mut st = inner.state.lock();
        let _ = st.txn.flush();
        let body = st.queue.snapshot_body();
        let meta = inner.snapshots.create(
            body,
            inner.session_id.clone(),
            SnapshotKind::Automatic,
            "active",
            chrono::Utc::now(),
        )?;
        st.ops_since_snapshot = 0;
        st.queue.metrics_mut().snapshots_created += 1;
        meta
    };

    inner
        .bus
        .publish(&Event::SnapshotCreated {
            id: meta.id.clone(),
            kind: meta.kind,
            task_count: meta.task_count,
            size_bytes: meta.size_bytes,
        })
        .await;
    Ok(())
}

async fn maybe_ops_snapshot<C: Clock + Clone + 'static>(inner: &Arc<Inner<C>>) {
    let due = {
        let st = inner.state.lock();
        st.ops_since_snapshot >= inner.cfg.snapshot_every_ops && !st.shutting_down
    };
    if due {
        if let Err(e) = snapshot_automatic(inner).await {
            warn!(error = %e, "ops-threshold snapshot failed");
        }
    }
}

/// Admit eligible work up to the ceiling and dispatch workers.
async fn pump_admissions<C: Clock + Clone + 'static>(inner: &Arc<Inner<C>>) {
    struct Dispatch {
        task_id: TaskId,
        capability: Arc<dyn Execute>,
        ctx: ExecContext,
        cancel_tx: watch::Sender<bool>,
        timeout: Duration,
        grace: Duration,
    }

    let mut events: Vec<Event> = Vec::new();
    let mut dispatches: Vec<Dispatch> = Vec::new();

    {
        let mut st = inner.state.lock();
        if st.shutting_down {
            return;
        }
        let now_ms = inner.clock.epoch_ms();

        let order = {
            let inputs = SequenceInputs {
                tasks: st.queue.tasks(),
                graph: st.queue.graph(),
                resources: st.queue.resources(),
                history: st.queue.history(),
                now_ms,
            };
            match inner.sequencer.sequence(inner.cfg.admission_algorithm, &inputs) {
                Ok(sequence) => sequence.order,
                Err(e) => {
                    warn!(error = %e, "sequencing failed; skipping admission pass");
                    return;
                }
            }
        };

        let selected = st
            .queue
            .select_admissions(&order, inner.cfg.max_concurrent, now_ms);

        for task_id in selected {
            let Some(task) = st.queue.get(&task_id) else {
                continue;
            };
            let Some(capability) = inner.registry.get(&task.executor_key) else {
                debug!(task = %task_id, key = %task.executor_key, "no capability registered; leaving pending");
                continue;
            };
            let params = task.params.clone();
            let timeout = Duration::from_millis(task.timeout_ms);
            let before = serde_json::to_value(task).ok();

            // Locking order: ownership → resources → execution slot
            if let Err(e) = st.sessions.acquire(
                &task_id,
                &inner.session_id,
                inner.cfg.agent_id.clone(),
                OwnershipMode::Exclusive,
                now_ms,
                None,
            ) {
                debug!(task = %task_id, error = %e, "ownership contended; skipping");
                continue;
            }

            let lease = {
                let Some(task) = st.queue.get(&task_id) else {
                    st.sessions.release(&task_id, &inner.session_id);
                    continue;
                };
                let task = task.clone();
                match st.queue.resources_mut().allocate(&task, &inner.session_id) {
                    Ok(lease) => lease,
                    Err(e) => {
                        debug!(task = %task_id, error = %e, "resources contended; skipping");
                        st.sessions.release(&task_id, &inner.session_id);
                        continue;
                    }
                }
            };

            let admitted = match st.queue.mark_queued(&task_id, now_ms) {
                Ok(()) => st.queue.mark_running(&task_id, now_ms),
                Err(e) => Err(e),
            };
            let attempt = match admitted {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!(task = %task_id, error = %e, "admission transition failed");
                    st.queue.resources_mut().release(&lease);
                    st.sessions.release(&task_id, &inner.session_id);
                    continue;
                }
            };

            let execution_id = ExecutionId::new(inner.ids.next());
            let resources = st
                .queue
                .get(&task_id)
                .map(|t| t.required_resources.clone())
                .unwrap_or_default();
            st.queue.push_record(ExecutionRecord::begin(
                task_id.clone(),
                execution_id.clone(),
                attempt,
                resources,
                now_ms,
            ));

            let after = st.queue.get(&task_id).and_then(|t| serde_json::to_value(t).ok());
            inner_log_txn(inner, &mut st, TxnOp::Transition, &task_id, before, after);

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let ctx = ExecContext::new(
                task_id.clone(),
                attempt,
                params,
                cancel_rx,
                Some(inner_progress_sender(inner)),
            );

            st.running_handles.insert(
                task_id.to_string(),
                RunningTask {
                    cancel_tx: cancel_tx.clone(),
                    lease,
                    execution_id,
                },
            );

            events.push(Event::TaskQueued {
                id: task_id.clone(),
            });
            events.push(Event::TaskStarted {
                id: task_id.clone(),
                session_id: inner.session_id.clone(),
                attempt,
            });

            dispatches.push(Dispatch {
                task_id,
                capability,
                ctx,
                cancel_tx,
                timeout,
                grace: Duration::from_millis(inner.cfg.cancel_grace_ms),
            });
        }
    }

    for event in events {
        inner.bus.publish(&event).await;
    }

    for dispatch in dispatches {
        let msg_tx = inner.msg_tx.clone();
        let Dispatch {
            task_id,
            capability,
            ctx,
            cancel_tx,
            timeout,
            grace,
        } = dispatch;
        tokio::spawn(async move {
            let outcome = run_attempt(capability, ctx, cancel_tx, timeout, grace).await;
            let _ = msg_tx.send(EngineMsg::AttemptDone { task_id, outcome }).await;
        });
    }
}

async fn handle_msg<C: Clock + Clone + 'static>(inner: &Arc<Inner<C>>, msg: EngineMsg) {
    match msg {
        EngineMsg::AttemptDone { task_id, outcome } => {
            handle_attempt_done(inner, task_id, outcome).await;
        }
    }
}

async fn handle_attempt_done<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    task_id: TaskId,
    outcome: AttemptOutcome,
) {
    let mut events: Vec<Event> = Vec::new();
    let mut rollback: Option<(Arc<dyn Execute>, ExecContext)> = None;
    let mut next_configs: Vec<TaskConfig> = Vec::new();

    {
        let mut st = inner.state.lock();
        let Some(handle) = st.running_handles.remove(task_id.as_str()) else {
            return;
        };
        let now_ms = inner.clock.epoch_ms();
        let before = st.queue.get(&task_id).and_then(|t| serde_json::to_value(t).ok());

        match outcome {
            AttemptOutcome::Completed(output) => {
                let post_ok = st
                    .queue
                    .get(&task_id)
                    .map(|t| t.postconditions.iter().all(|p| p.holds(&output.output)))
                    .unwrap_or(true);

                if post_ok {
                    match st.queue.finish_success(&task_id, output.output, now_ms) {
                        Ok(_unblocked) => {
                            let duration_ms = st
                                .queue
                                .get(&task_id)
                                .and_then(|t| t.actual_duration_ms)
                                .unwrap_or(0);
                            events.push(Event::TaskCompleted {
                                id: task_id.clone(),
                                duration_ms,
                            });
                            if let Some(session) = st.sessions.get_mut(&inner.session_id) {
                                session.note_task();
                            }
                            if let Some(task) = st.queue.get(&task_id) {
                                if let Some(record) = st.queue.records_for(&task_id).last() {
                                    inner.priority.observe(task, record);
                                }
                            }
                            next_configs = output.next_tasks;
                        }
                        Err(e) => warn!(task = %task_id, error = %e, "completion bookkeeping failed"),
                    }
                } else {
                    events.extend(fail_attempt(
                        inner,
                        &mut st,
                        &task_id,
                        "postcondition not met".to_string(),
                        true,
                        now_ms,
                        &mut rollback,
                    ));
                }
            }

            AttemptOutcome::Failed { message, retriable } => {
                events.extend(fail_attempt(
                    inner,
                    &mut st,
                    &task_id,
                    message,
                    retriable,
                    now_ms,
                    &mut rollback,
                ));
            }

            AttemptOutcome::TimedOut { leaked } => {
                st.queue.metrics_mut().timeouts += 1;
                if leaked {
                    st.queue.metrics_mut().resource_leaks += 1;
                }
                let retriable = !st
                    .queue
                    .get(&task_id)
                    .map(|t| t.fatal_on_timeout)
                    .unwrap_or(false);
                events.extend(fail_attempt(
                    inner,
                    &mut st,
                    &task_id,
                    "execution timed out".to_string(),
                    retriable,
                    now_ms,
                    &mut rollback,
                ));
            }

            AttemptOutcome::Cancelled { leaked } => {
                if leaked {
                    st.queue.metrics_mut().resource_leaks += 1;
                }
                if let Err(e) = st.queue.finish_cancelled(&task_id, now_ms) {
                    warn!(task = %task_id, error = %e, "cancel bookkeeping failed");
                }
                let reason = st
                    .cancel_reasons
                    .remove(task_id.as_str())
                    .unwrap_or_else(|| "cancelled".to_string());
                events.push(Event::TaskCancelled {
                    id: task_id.clone(),
                    reason,
                });
            }
        }

        // LIFO release: slot already left via finish_*; then resources,
        // then ownership
        st.queue.resources_mut().release(&handle.lease);
        st.sessions.release(&task_id, &inner.session_id);
        st.cancel_reasons.remove(task_id.as_str());

        let after = st.queue.get(&task_id).and_then(|t| serde_json::to_value(t).ok());
        inner_log_txn(inner, &mut st, TxnOp::Transition, &task_id, before, after);
    }

    for event in events {
        inner.bus.publish(&event).await;
    }

    if let Some((capability, ctx)) = rollback {
        tokio::spawn(async move {
            capability.rollback(&ctx).await;
        });
    }

    for config in next_configs {
        if let Err(e) = submit_follow_up(inner, config).await {
            warn!(error = %e, "follow-up submission failed");
        }
    }

    inner.wake.notify_one();
}

/// Shared failure path: classify retry vs terminal, arm timers, queue
/// rollback on terminal failure.
fn fail_attempt<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    st: &mut CoreState,
    task_id: &TaskId,
    message: String,
    retriable: bool,
    now_ms: u64,
    rollback: &mut Option<(Arc<dyn Execute>, ExecContext)>,
) -> Vec<Event> {
    let mut events = Vec::new();

    match st.queue.finish_failure(task_id, message.clone(), retriable, now_ms) {
        Ok(FailureDisposition::Retry { attempt, backoff_ms }) => {
            st.timers.set(
                format!("retry:{}", task_id),
                Duration::from_millis(backoff_ms),
                Instant::now(),
            );
            events.push(Event::TaskRetrying {
                id: task_id.clone(),
                attempt,
                backoff_ms,
            });
        }
        Ok(FailureDisposition::Terminal) => {
            let attempts = st.queue.get(task_id).map(|t| t.retry_count + 1).unwrap_or(1);
            let code = if retriable {
                "retries_exhausted"
            } else {
                "execution_failed"
            };
            events.push(Event::TaskFailed {
                id: task_id.clone(),
                code: code.to_string(),
                error: message,
                attempts,
            });
            if let Some(session) = st.sessions.get_mut(&inner.session_id) {
                session.note_error();
            }

            // Best-effort rollback with a fresh, already-cancelled context
            if let Some(task) = st.queue.get(task_id) {
                if let Some(capability) = inner.registry.get(&task.executor_key) {
                    let (tx, rx) = watch::channel(true);
                    drop(tx);
                    let ctx = ExecContext::new(
                        task_id.clone(),
                        task.retry_count,
                        task.params.clone(),
                        rx,
                        None,
                    );
                    *rollback = Some((capability, ctx));
                }
                if let Some(record) = st.queue.records_for(task_id).last() {
                    inner.priority.observe(task, record);
                }
            }
        }
        Err(e) => warn!(task = %task_id, error = %e, "failure bookkeeping failed"),
    }

    events
}

/// Insert a task plus its declared dependency edges under the lock.
///
/// Dependency targets are validated first, so an input error leaves no
/// state behind.
fn submit_locked<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    st: &mut CoreState,
    mut config: TaskConfig,
) -> Result<(TaskId, Vec<Event>), EngineError> {
    if config.id.is_empty() {
        config.id = inner.ids.next();
    }

    for link in &config.dependencies {
        if st.queue.get(&link.depends_on).is_none() {
            return Err(EngineError::UnknownTask(link.depends_on.clone()));
        }
    }

    let now_ms = inner.clock.epoch_ms();
    let links = std::mem::take(&mut config.dependencies);
    let task = Task::new_with_epoch_ms(config, now_ms);
    let task_id = task.id.clone();

    let mut events = vec![Event::TaskSubmitted {
        id: task_id.clone(),
        title: task.title.clone(),
        category: task.category,
        base_priority: task.base_priority,
    }];

    let after = serde_json::to_value(&task).ok();
    st.queue.insert_task(task)?;
    inner_log_txn(inner, st, TxnOp::Create, &task_id, None, after);

    for link in links {
        let edge_id = foreman_core::EdgeId::new(inner.ids.next());
        let mut dep = TaskDependency::new(
            edge_id.clone(),
            task_id.clone(),
            link.depends_on.clone(),
            link.dep_type,
        );
        if link.optional {
            dep = dep.optional();
        }
        // A freshly inserted task has no dependents, so no cycle can form
        st.queue.add_dependency(dep, now_ms)?;
        events.push(Event::DependencyAdded {
            id: edge_id,
            dependent: task_id.clone(),
            depends_on: link.depends_on,
            dep_type: link.dep_type,
        });
    }

    if let Some(session) = st.sessions.get_mut(&inner.session_id) {
        session.note_operation();
    }

    Ok((task_id, events))
}

async fn submit_follow_up<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    config: TaskConfig,
) -> Result<(), EngineError> {
    let events = {
        let mut st = inner.state.lock();
        if st.shutting_down || st.read_only {
            return Err(EngineError::ShuttingDown);
        }
        let (_, events) = submit_locked(inner, &mut st, config)?;
        events
    };

    for event in events {
        inner.bus.publish(&event).await;
    }
    inner.wake.notify_one();
    Ok(())
}

/// Free-function twin of `Engine::log_txn` for loop-side paths.
fn inner_log_txn<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
    st: &mut CoreState,
    op: TxnOp,
    task_id: &TaskId,
    before: Option<Value>,
    after: Option<Value>,
) {
    let entry = TxnEntry::new(
        inner.ids.next(),
        inner.clock.epoch_ms(),
        op,
        EntityKind::Task,
        task_id.as_str(),
        inner.session_id.clone(),
        before,
        after,
    );
    st.ops_since_snapshot += 1;
    if let Err(e) = st.txn.append(&entry) {
        st.persist_failures += 1;
        error!(error = %e, "txn log append failed");
        if st.persist_failures >= MAX_PERSIST_FAILURES {
            st.read_only = true;
        }
    }
}

fn inner_progress_sender<C: Clock + Clone + 'static>(
    inner: &Arc<Inner<C>>,
) -> mpsc::Sender<ProgressReport> {
    // Progress reports bypass the main message channel; a small bridge
    // task forwards them into queue state and onto the bus.
    let (tx, mut rx) = mpsc::channel::<ProgressReport>(64);
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            {
                let mut st = inner.state.lock();
                st.queue.set_progress(&report.task_id, report.percent);
            }
            inner
                .bus
                .publish(&Event::TaskProgress {
                    id: report.task_id.clone(),
                    percent: report.percent,
                    note: report.note.clone(),
                })
                .await;
        }
    });
    tx
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
