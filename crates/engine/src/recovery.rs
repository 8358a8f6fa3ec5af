// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: restore queue state from the latest valid snapshot
//! and reconcile sessions that died without a graceful shutdown.
//!
//! The rule is conservative: never guess intent. Recovery restores the
//! most recent state a crashed session persisted, after first freezing
//! the current state into a `crash_recovery` snapshot so nothing is
//! lost if the restore goes wrong.

use crate::queue::QueueCore;
use crate::sessions::SessionRegistry;
use foreman_core::{Clock, SessionId, SessionStatus, SnapshotKind};
use foreman_storage::{SessionStore, Snapshot, SnapshotManager};
use tracing::{info, warn};

/// Result of the startup recovery pass.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Snapshot id the queue state was restored from, if any.
    pub restored_from: Option<String>,
    /// Snapshots skipped because their integrity check failed.
    pub integrity_failures: usize,
    /// Sessions found crashed at startup.
    pub crashed_sessions: Vec<SessionId>,
    /// Crashed sessions whose state could not be recovered.
    pub unrecoverable: Vec<SessionId>,
}

/// Load the latest valid snapshot into the queue.
pub fn restore_latest(
    queue: &mut QueueCore,
    snapshots: &SnapshotManager,
) -> Result<RecoveryReport, foreman_storage::SnapshotError> {
    let mut report = RecoveryReport::default();
    let (snapshot, skipped) = snapshots.load_latest()?;
    report.integrity_failures = skipped;

    if let Some(snapshot) = snapshot {
        info!(
            snapshot = %snapshot.meta.id,
            tasks = snapshot.meta.task_count,
            "restoring queue state from snapshot",
        );
        report.restored_from = Some(snapshot.meta.id.clone());
        queue.restore_from(snapshot.body);
    }

    Ok(report)
}

/// Identify peer sessions that crashed, and recover their state.
///
/// For each session whose last heartbeat is older than the crash
/// threshold (and which never recorded a graceful shutdown):
///
/// 1. take a `crash_recovery` snapshot of current state first,
/// 2. restore from the crashed session's most recent snapshot inside a
///    single swap,
/// 3. on any failure, keep current state and mark the session
///    unrecoverable.
pub fn recover_crashed_sessions(
    queue: &mut QueueCore,
    registry: &mut SessionRegistry,
    snapshots: &SnapshotManager,
    session_store: &SessionStore,
    own_session: &SessionId,
    clock: &impl Clock,
    report: &mut RecoveryReport,
) {
    let now_ms = clock.epoch_ms();
    let crash_timeout = registry.config().crash_timeout_ms;

    let stored = match session_store.list() {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "could not list session files for crash detection");
            return;
        }
    };

    for mut session in stored {
        if session.id == *own_session {
            continue;
        }
        let silent = session.silent_for_ms(now_ms);
        let already_crashed = session.status == SessionStatus::Crashed;
        let crashed_now = !session.graceful_shutdown
            && matches!(
                session.status,
                SessionStatus::Active | SessionStatus::Inactive
            )
            && silent > crash_timeout;

        if !already_crashed && !crashed_now {
            registry.upsert(session);
            continue;
        }

        let id = session.id.clone();
        warn!(session = %id, silent_ms = silent, "detected crashed session");
        report.crashed_sessions.push(id.clone());
        session.status = SessionStatus::Crashed;

        let recovered = recover_one(queue, snapshots, own_session, &id, now_ms);
        if !recovered {
            report.unrecoverable.push(id.clone());
            // Stop re-attempting on every startup
            session.status = SessionStatus::Terminated;
        }

        if let Err(e) = session_store.save(&session) {
            warn!(session = %id, error = %e, "could not persist session status");
        }
        registry.upsert(session);
    }
}

/// Restore from one crashed session's latest snapshot. Returns success.
fn recover_one(
    queue: &mut QueueCore,
    snapshots: &SnapshotManager,
    own_session: &SessionId,
    crashed: &SessionId,
    now_ms: u64,
) -> bool {
    let meta = match snapshots.latest_for_session(crashed) {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            warn!(session = %crashed, "crashed session left no snapshot; nothing to restore");
            return false;
        }
        Err(e) => {
            warn!(session = %crashed, error = %e, "could not look up crashed session snapshots");
            return false;
        }
    };

    // Freeze current state first so the restore can be rolled back by hand
    let safety = snapshots.create(
        queue.snapshot_body(),
        own_session.clone(),
        SnapshotKind::CrashRecovery,
        "crash_recovery",
        chrono::Utc::now(),
    );
    if let Err(e) = safety {
        warn!(error = %e, "crash-recovery safety snapshot failed; aborting restore");
        return false;
    }

    let snapshot: Option<Snapshot> = match snapshots.load(&meta.id) {
        Ok(s) => s,
        Err(e) => {
            warn!(snapshot = %meta.id, error = %e, "crashed session snapshot unreadable");
            None
        }
    };
    let Some(snapshot) = snapshot else {
        return false;
    };

    // Single swap: restore_from replaces the whole state at once
    queue.restore_from(snapshot.body);
    info!(
        session = %crashed,
        snapshot = %meta.id,
        at = now_ms,
        "restored state from crashed session's snapshot",
    );
    true
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
