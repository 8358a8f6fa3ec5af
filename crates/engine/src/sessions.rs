// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: liveness by heartbeat, crash detection, and task
//! ownership.
//!
//! A session unseen for `session_timeout` is marked inactive; one unseen
//! for `crash_timeout` without a graceful-shutdown record is marked
//! crashed. Ownership is exclusive by default and released on completion,
//! cancellation, timeout, or crash.

use crate::error::EngineError;
use foreman_core::{
    Event, OwnershipMode, Session, SessionId, SessionStatus, TaskId, TaskOwnership,
};
use std::collections::HashMap;

/// Timeouts governing liveness transitions.
#[derive(Debug, Clone, Copy)]
pub struct SessionRegistryConfig {
    pub heartbeat_interval_ms: u64,
    pub session_timeout_ms: u64,
    pub crash_timeout_ms: u64,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            session_timeout_ms: 30 * 60_000,
            crash_timeout_ms: 10 * 60_000,
        }
    }
}

/// Tracks live sessions and task ownership.
pub struct SessionRegistry {
    config: SessionRegistryConfig,
    sessions: HashMap<String, Session>,
    /// Holders per task. The exclusive invariant is enforced on acquire.
    ownerships: HashMap<String, Vec<TaskOwnership>>,
}

impl SessionRegistry {
    pub fn new(config: SessionRegistryConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            ownerships: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionRegistryConfig {
        &self.config
    }

    /// Register (or refresh) a session record.
    pub fn upsert(&mut self, session: Session) {
        self.sessions.insert(session.id.to_string(), session);
    }

    /// Open a new active session.
    pub fn open(&mut self, id: SessionId, agent_id: impl Into<String>, now_ms: u64) -> &Session {
        let session = Session::new(id.clone(), agent_id, now_ms);
        self.sessions.insert(id.to_string(), session);
        // Just inserted above
        &self.sessions[id.as_str()]
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id.as_str())
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id.as_str())
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Record a heartbeat for a session.
    pub fn heartbeat(&mut self, id: &SessionId, now_ms: u64) -> Option<Event> {
        let session = self.sessions.get_mut(id.as_str())?;
        session.heartbeat(now_ms);
        Some(Event::SessionHeartbeat { id: id.clone() })
    }

    /// Apply liveness transitions; returns crash events to publish.
    ///
    /// Crashed sessions have their ownerships released.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Event> {
        let mut events = Vec::new();
        let mut crashed: Vec<SessionId> = Vec::new();

        for session in self.sessions.values_mut() {
            if !matches!(
                session.status,
                SessionStatus::Active | SessionStatus::Inactive
            ) {
                continue;
            }
            let silent = session.silent_for_ms(now_ms);

            if !session.graceful_shutdown && silent > self.config.crash_timeout_ms {
                session.status = SessionStatus::Crashed;
                crashed.push(session.id.clone());
                events.push(Event::SessionCrashed {
                    id: session.id.clone(),
                });
                continue;
            }

            if session.status == SessionStatus::Active && silent > self.config.session_timeout_ms {
                session.status = SessionStatus::Inactive;
            }
        }

        for id in crashed {
            self.release_all_for(&id);
        }

        events
    }

    /// Mark a session terminated after a graceful shutdown.
    pub fn terminate(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id.as_str()) {
            session.status = SessionStatus::Terminated;
            session.graceful_shutdown = true;
        }
        self.release_all_for(id);
    }

    /// Sessions currently marked crashed.
    pub fn crashed(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Crashed)
            .map(|s| s.id.clone())
            .collect()
    }

    // ── Ownership ───────────────────────────────────────────────────────────

    /// Acquire ownership of a task.
    ///
    /// Exclusive mode admits a single holder; acquiring exclusively over
    /// any live holder (or any mode over an exclusive holder) fails with
    /// [`EngineError::OwnershipHeld`]. Expired holds are swept first.
    pub fn acquire(
        &mut self,
        task_id: &TaskId,
        session_id: &SessionId,
        agent_id: impl Into<String>,
        mode: OwnershipMode,
        now_ms: u64,
        expires_at_ms: Option<u64>,
    ) -> Result<(), EngineError> {
        let holders = self.ownerships.entry(task_id.to_string()).or_default();
        holders.retain(|o| !o.is_expired(now_ms));

        // Re-acquire by the same session refreshes the hold
        holders.retain(|o| o.session_id != *session_id);

        let contended = holders.iter().find(|o| {
            o.mode == OwnershipMode::Exclusive || mode == OwnershipMode::Exclusive
        });
        if let Some(holder) = contended {
            return Err(EngineError::OwnershipHeld {
                task: task_id.clone(),
                owner: holder.session_id.clone(),
            });
        }

        holders.push(TaskOwnership {
            task_id: task_id.clone(),
            session_id: session_id.clone(),
            agent_id: agent_id.into(),
            acquired_at_ms: now_ms,
            expires_at_ms,
            mode,
            parent: None,
        });
        Ok(())
    }

    /// Release a session's hold on a task. Idempotent.
    pub fn release(&mut self, task_id: &TaskId, session_id: &SessionId) {
        if let Some(holders) = self.ownerships.get_mut(task_id.as_str()) {
            holders.retain(|o| o.session_id != *session_id);
            if holders.is_empty() {
                self.ownerships.remove(task_id.as_str());
            }
        }
    }

    /// Release everything a session holds (shutdown or crash).
    pub fn release_all_for(&mut self, session_id: &SessionId) {
        for holders in self.ownerships.values_mut() {
            holders.retain(|o| o.session_id != *session_id);
        }
        self.ownerships.retain(|_, holders| !holders.is_empty());
    }

    /// The exclusive holder of a task, if any.
    pub fn exclusive_owner(&self, task_id: &TaskId) -> Option<&TaskOwnership> {
        self.ownerships
            .get(task_id.as_str())?
            .iter()
            .find(|o| o.mode == OwnershipMode::Exclusive)
    }

    /// All holders of a task.
    pub fn holders(&self, task_id: &TaskId) -> &[TaskOwnership] {
        self.ownerships
            .get(task_id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
