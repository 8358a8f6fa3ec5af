// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot format: a consistent, integrity-hashed serialization of
//! queue state.
//!
//! The integrity hash is SHA-256 over the canonical serialization of the
//! body (tasks, dependencies, execution records, metrics, custom data);
//! the metadata block carrying the hash is excluded, and compression
//! never affects the hash because it is computed over the uncompressed
//! canonical bytes.

use crate::canonical;
use crate::store::{self, StoreError, StoreWriter};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use foreman_core::{
    ExecutionRecord, QueueMetrics, SessionId, SnapshotKind, Task, TaskDependency,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Current snapshot format version.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// zstd level 3 is a good balance of speed and compression
const COMPRESSION_LEVEL: i32 = 3;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("snapshot {id} failed integrity check (expected {expected}, got {actual})")]
    IntegrityFailed {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("snapshot body missing in {0}")]
    MissingBody(String),
}

/// Metadata block of a snapshot file. Excluded from the integrity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    pub session_id: SessionId,
    pub kind: SnapshotKind,
    pub task_count: usize,
    /// Queue state at freeze time (e.g. "active", "shutdown").
    pub queue_state: String,
    pub integrity_hash: String,
    /// Uncompressed canonical body size in bytes.
    pub size_bytes: u64,
    /// Body compression codec (`"zstd"`), absent when uncompressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

/// The hashed payload of a snapshot: the full queue state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub tasks: HashMap<String, Task>,
    pub dependencies: HashMap<String, TaskDependency>,
    #[serde(default)]
    pub execution_records: HashMap<String, Vec<ExecutionRecord>>,
    #[serde(default)]
    pub metrics: QueueMetrics,
    #[serde(default)]
    pub custom_data: serde_json::Value,
}

/// A complete snapshot: metadata plus body.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub body: SnapshotBody,
}

/// On-disk shape. Exactly one of `body` / `body_zstd` is present.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    metadata: SnapshotMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<SnapshotBody>,
    /// base64-encoded zstd-compressed canonical body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_zstd: Option<String>,
}

impl Snapshot {
    /// Build a snapshot over a frozen body, computing the integrity hash.
    pub fn new(
        id: impl Into<String>,
        session_id: SessionId,
        kind: SnapshotKind,
        queue_state: impl Into<String>,
        body: SnapshotBody,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SnapshotError> {
        let canonical_bytes = canonical::canonical_bytes(&body)?;
        let integrity_hash = canonical::sha256_hex(&canonical_bytes);
        Ok(Self {
            meta: SnapshotMeta {
                id: id.into(),
                created_at,
                version: CURRENT_SNAPSHOT_VERSION,
                session_id,
                kind,
                task_count: body.tasks.len(),
                queue_state: queue_state.into(),
                integrity_hash,
                size_bytes: canonical_bytes.len() as u64,
                compression: None,
            },
            body,
        })
    }

    /// Recompute the body hash and compare against the metadata.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        let actual = canonical::integrity_hash(&self.body)?;
        if actual != self.meta.integrity_hash {
            return Err(SnapshotError::IntegrityFailed {
                id: self.meta.id.clone(),
                expected: self.meta.integrity_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Save the snapshot atomically (write to .tmp, fsync, rename,
    /// fsync dir). Returns the final file size.
    ///
    /// With `compress`, only the body is compressed; metadata stays
    /// readable and the hash still covers the uncompressed bytes.
    pub fn save<W: StoreWriter>(
        &self,
        writer: &W,
        path: &Path,
        compress: bool,
    ) -> Result<u64, SnapshotError> {
        let file = if compress {
            let canonical_bytes = canonical::canonical_bytes(&self.body)?;
            let compressed = zstd::encode_all(canonical_bytes.as_slice(), COMPRESSION_LEVEL)
                .map_err(|e| SnapshotError::Compress(e.to_string()))?;
            let mut meta = self.meta.clone();
            meta.compression = Some("zstd".to_string());
            SnapshotFile {
                metadata: meta,
                body: None,
                body_zstd: Some(base64::engine::general_purpose::STANDARD.encode(compressed)),
            }
        } else {
            SnapshotFile {
                metadata: self.meta.clone(),
                body: Some(self.body.clone()),
                body_zstd: None,
            }
        };

        let bytes = serde_json::to_vec(&file)?;
        Ok(store::atomic_write(writer, path, &bytes)?)
    }

    /// Load a snapshot and verify its integrity hash.
    ///
    /// Returns `Ok(None)` if the file doesn't exist. An unparseable or
    /// hash-mismatched file is an error; callers decide whether to
    /// quarantine and fall back.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let parsed: SnapshotFile = serde_json::from_reader(reader)?;

        let body = match (parsed.body, parsed.body_zstd) {
            (Some(body), _) => body,
            (None, Some(encoded)) => {
                let compressed = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| SnapshotError::Compress(e.to_string()))?;
                let bytes = zstd::decode_all(compressed.as_slice())
                    .map_err(|e| SnapshotError::Compress(e.to_string()))?;
                serde_json::from_slice(&bytes)?
            }
            (None, None) => {
                return Err(SnapshotError::MissingBody(path.display().to_string()))
            }
        };

        let snapshot = Self {
            meta: parsed.metadata,
            body,
        };
        snapshot.verify()?;
        Ok(Some(snapshot))
    }

    /// Read only the metadata block (skips body decompression and hash
    /// verification). Used for listing.
    pub fn load_meta(path: &Path) -> Result<Option<SnapshotMeta>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }
        #[derive(Deserialize)]
        struct MetaOnly {
            metadata: SnapshotMeta,
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let parsed: MetaOnly = serde_json::from_reader(reader)?;
        Ok(Some(parsed.metadata))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
