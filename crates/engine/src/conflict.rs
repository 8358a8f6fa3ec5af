// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict detection and resolution across sessions.
//!
//! Detection operates over persisted txn-log entries only: two changes
//! to the same (kind, id) from different sessions inside a 5-second
//! window form a conflict. Resolution picks a winner per strategy; the
//! engine applies the winner through the normal mutation path and marks
//! the losers synchronized.

use crate::error::EngineError;
use foreman_core::{IdGen, SessionId, UuidIdGen};
use foreman_storage::{EntityKind, TxnEntry, TxnOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Two changes within this window collide.
pub const CONFLICT_WINDOW_MS: u64 = 5_000;

/// How a conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    #[default]
    LastWriteWins,
    FirstWriteWins,
    VersionBased,
    Merge,
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::FirstWriteWins => "first_write_wins",
            ResolutionStrategy::VersionBased => "version_based",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One colliding change, distilled from a txn-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChange {
    pub entry_id: String,
    pub ts_ms: u64,
    pub session_id: SessionId,
    pub op: TxnOp,
    pub entity: EntityKind,
    pub entity_id: String,
    /// The post-change payload (`after`), if the entry carried one.
    pub payload: Option<Value>,
    /// Entity version extracted from the payload, for version-based
    /// resolution.
    pub version: Option<u64>,
}

impl DataChange {
    fn from_entry(entry: &TxnEntry) -> Self {
        let version = entry
            .after
            .as_ref()
            .and_then(|v| v.get("version"))
            .and_then(|v| v.as_u64());
        Self {
            entry_id: entry.id.clone(),
            ts_ms: entry.ts_ms,
            session_id: entry.session_id.clone(),
            op: entry.op,
            entity: entry.entity,
            entity_id: entry.entity_id.clone(),
            payload: entry.after.clone(),
            version,
        }
    }
}

/// A detected collision between sessions on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub changes: Vec<DataChange>,
    pub detected_at_ms: u64,
}

impl SyncConflict {
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut out: Vec<SessionId> = Vec::new();
        for change in &self.changes {
            if !out.contains(&change.session_id) {
                out.push(change.session_id.clone());
            }
        }
        out
    }
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub winner: DataChange,
    /// Payload to apply; differs from the winner's own payload for
    /// `Merge` (shallow metadata merge) and `Manual` (supplied payload).
    pub apply_payload: Option<Value>,
    /// Entry ids of discarded changes, marked synchronized.
    pub losers: Vec<String>,
}

/// Detects and resolves concurrent mutations.
pub struct ConflictResolver<G: IdGen = UuidIdGen> {
    window_ms: u64,
    ids: G,
}

impl Default for ConflictResolver<UuidIdGen> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver<UuidIdGen> {
    pub fn new() -> Self {
        Self::with_ids(UuidIdGen)
    }
}

impl<G: IdGen> ConflictResolver<G> {
    pub fn with_ids(ids: G) -> Self {
        Self {
            window_ms: CONFLICT_WINDOW_MS,
            ids,
        }
    }

    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Scan txn-log entries for collisions.
    ///
    /// Entries are grouped by (kind, id) and sorted by timestamp; a
    /// maximal run of changes where each is within the window of the
    /// previous, touching two or more sessions, forms one conflict.
    pub fn detect(&self, entries: &[TxnEntry], now_ms: u64) -> Vec<SyncConflict> {
        let mut by_entity: HashMap<(EntityKind, &str), Vec<&TxnEntry>> = HashMap::new();
        for entry in entries {
            by_entity
                .entry((entry.entity, entry.entity_id.as_str()))
                .or_default()
                .push(entry);
        }

        let mut conflicts = Vec::new();
        for ((entity, entity_id), mut group) in by_entity {
            group.sort_by_key(|e| e.ts_ms);

            let mut run: Vec<&TxnEntry> = Vec::new();
            let mut runs: Vec<Vec<&TxnEntry>> = Vec::new();
            for entry in group {
                match run.last() {
                    Some(last) if entry.ts_ms.saturating_sub(last.ts_ms) <= self.window_ms => {
                        run.push(entry);
                    }
                    _ => {
                        if run.len() > 1 {
                            runs.push(std::mem::take(&mut run));
                        } else {
                            run.clear();
                        }
                        run.push(entry);
                    }
                }
            }
            if run.len() > 1 {
                runs.push(run);
            }

            for run in runs {
                let mut sessions: Vec<&SessionId> = Vec::new();
                for entry in &run {
                    if !sessions.contains(&&entry.session_id) {
                        sessions.push(&entry.session_id);
                    }
                }
                if sessions.len() < 2 {
                    continue;
                }
                conflicts.push(SyncConflict {
                    id: self.ids.next(),
                    entity,
                    entity_id: entity_id.to_string(),
                    changes: run.iter().map(|e| DataChange::from_entry(e)).collect(),
                    detected_at_ms: now_ms,
                });
            }
        }

        // Deterministic output order for identical inputs
        conflicts.sort_by(|a, b| {
            a.entity_id
                .cmp(&b.entity_id)
                .then_with(|| a.changes[0].ts_ms.cmp(&b.changes[0].ts_ms))
        });
        conflicts
    }

    /// Pick a winner per strategy.
    ///
    /// `Manual` requires `manual_payload`, otherwise
    /// [`EngineError::ManualResolutionRequired`] is returned.
    pub fn resolve(
        &self,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        manual_payload: Option<Value>,
    ) -> Result<Resolution, EngineError> {
        let latest = conflict
            .changes
            .iter()
            .max_by_key(|c| c.ts_ms)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConflict(conflict.id.clone()))?;
        let earliest = conflict
            .changes
            .iter()
            .min_by_key(|c| c.ts_ms)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConflict(conflict.id.clone()))?;

        let (winner, apply_payload) = match strategy {
            ResolutionStrategy::LastWriteWins => {
                let payload = latest.payload.clone();
                (latest, payload)
            }
            ResolutionStrategy::FirstWriteWins => {
                let payload = earliest.payload.clone();
                (earliest, payload)
            }
            ResolutionStrategy::VersionBased => {
                let max_version = conflict
                    .changes
                    .iter()
                    .map(|c| c.version.unwrap_or(0))
                    .max()
                    .unwrap_or(0);
                let top: Vec<&DataChange> = conflict
                    .changes
                    .iter()
                    .filter(|c| c.version.unwrap_or(0) == max_version)
                    .collect();
                // Tie on version falls back to last-write-wins
                let winner = top
                    .iter()
                    .max_by_key(|c| c.ts_ms)
                    .map(|c| (*c).clone())
                    .unwrap_or(latest);
                let payload = winner.payload.clone();
                (winner, payload)
            }
            ResolutionStrategy::Merge => {
                // Latest wins; metadata merged shallowly across all
                // changes in timestamp order
                let mut payload = latest.payload.clone();
                if let Some(Value::Object(target)) = payload.as_mut() {
                    let mut merged = serde_json::Map::new();
                    let mut ordered = conflict.changes.clone();
                    ordered.sort_by_key(|c| c.ts_ms);
                    for change in &ordered {
                        if let Some(Value::Object(meta)) =
                            change.payload.as_ref().and_then(|p| p.get("metadata"))
                        {
                            for (k, v) in meta {
                                merged.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    if !merged.is_empty() {
                        target.insert("metadata".to_string(), Value::Object(merged));
                    }
                }
                (latest, payload)
            }
            ResolutionStrategy::Manual => {
                let payload = manual_payload
                    .ok_or_else(|| EngineError::ManualResolutionRequired(conflict.id.clone()))?;
                (latest, Some(payload))
            }
        };

        let losers = conflict
            .changes
            .iter()
            .filter(|c| c.entry_id != winner.entry_id)
            .map(|c| c.entry_id.clone())
            .collect();

        Ok(Resolution {
            conflict_id: conflict.id.clone(),
            strategy,
            winner,
            apply_payload,
            losers,
        })
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
