// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only transaction log with per-entry checksums.
//!
//! Every state mutation is recorded as a checksummed entry, one JSON line
//! per entry. The log is the single source of ordering across structures
//! and the substrate for cross-session conflict detection. Group commit
//! batches appends (~10ms) before a single fsync.
//!
//! The log is bounded: when it reaches [`MAX_ENTRIES`] it is truncated
//! oldest-first down to [`TRUNCATE_TO`] entries via an atomic rewrite.

use crate::canonical;
use foreman_core::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Entry count at which the log is truncated.
pub const MAX_ENTRIES: usize = 10_000;

/// Entry count kept (newest-first) after truncation.
pub const TRUNCATE_TO: usize = 5_000;

/// Errors that can occur in transaction-log operations
#[derive(Debug, Error)]
pub enum TxnLogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind of mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnOp {
    Create,
    Update,
    Delete,
    Transition,
}

impl fmt::Display for TxnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnOp::Create => "create",
            TxnOp::Update => "update",
            TxnOp::Delete => "delete",
            TxnOp::Transition => "transition",
        };
        write!(f, "{}", s)
    }
}

/// Entity table an entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Dependency,
    Session,
    Resource,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Task => "task",
            EntityKind::Dependency => "dependency",
            EntityKind::Session => "session",
            EntityKind::Resource => "resource",
        };
        write!(f, "{}", s)
    }
}

/// One logged mutation.
///
/// The checksum covers the canonical serialization of
/// `(op, kind, id, before, after)`; a mismatch marks the entry
/// unverifiable but does not fail reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnEntry {
    pub id: String,
    pub ts_ms: u64,
    pub op: TxnOp,
    pub entity: EntityKind,
    pub entity_id: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub checksum: String,
}

impl TxnEntry {
    /// Build an entry, computing its checksum.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        ts_ms: u64,
        op: TxnOp,
        entity: EntityKind,
        entity_id: impl Into<String>,
        session_id: SessionId,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Self {
        let entity_id = entity_id.into();
        let checksum = Self::compute_checksum(op, entity, &entity_id, &before, &after);
        Self {
            id: id.into(),
            ts_ms,
            op,
            entity,
            entity_id,
            session_id,
            before,
            after,
            checksum,
        }
    }

    /// Checksum over the canonical `(op, kind, id, before, after)` payload.
    pub fn compute_checksum(
        op: TxnOp,
        entity: EntityKind,
        entity_id: &str,
        before: &Option<Value>,
        after: &Option<Value>,
    ) -> String {
        let payload = serde_json::json!({
            "op": op,
            "kind": entity,
            "id": entity_id,
            "before": before,
            "after": after,
        });
        canonical::sha256_hex(canonical::canonical_json(&payload).as_bytes())
    }

    /// Recompute the checksum and compare with the stored one.
    pub fn verify(&self) -> bool {
        Self::compute_checksum(
            self.op,
            self.entity,
            &self.entity_id,
            &self.before,
            &self.after,
        ) == self.checksum
    }
}

/// Result of a full-log verification pass.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub total: usize,
    /// Ids of entries whose checksum did not verify.
    pub unverifiable: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.unverifiable.is_empty()
    }
}

/// Bounded append-only JSONL transaction log with group commit.
///
/// Entries are buffered in memory and flushed to disk either when
/// `needs_flush()` reports the interval elapsed / buffer full, or
/// explicitly via `flush()`.
pub struct TxnLog {
    file: File,
    path: PathBuf,
    /// Number of entries currently on disk plus buffered.
    entry_count: usize,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    /// Last flush timestamp for interval checking
    last_flush: Instant,
}

impl TxnLog {
    /// Open or create a transaction log at the given path.
    ///
    /// A corrupt tail (unparseable line) rotates the file to `.bak`,
    /// preserving the valid prefix.
    pub fn open(path: &Path) -> Result<Self, TxnLogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut entry_count, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = crate::store::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "Corrupt txn log detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
            entry_count = valid_lines.len();
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            entry_count,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Scan the log counting parseable entries.
    ///
    /// Returns `(count, corrupt)` where `corrupt` is true if a parse error
    /// was encountered (not just EOF).
    fn scan(file: &File) -> Result<(usize, bool), TxnLogError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut count = 0usize;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if serde_json::from_str::<TxnEntry>(trimmed).is_err() {
                corrupt = true;
                break;
            }
            count += 1;
        }

        Ok((count, corrupt))
    }

    /// Read all valid lines, stopping at the first corrupt entry.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, TxnLogError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid_lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if serde_json::from_str::<TxnEntry>(trimmed).is_err() {
                break;
            }
            valid_lines.push(trimmed.to_string());
        }

        Ok(valid_lines)
    }

    /// Append an entry to the write buffer.
    ///
    /// The entry is NOT durable until `flush()`. Triggers oldest-first
    /// truncation once the bound is reached.
    pub fn append(&mut self, entry: &TxnEntry) -> Result<(), TxnLogError> {
        let json_bytes = serde_json::to_vec(entry)?;
        self.write_buffer.push(json_bytes);
        self.entry_count += 1;

        if self.entry_count >= MAX_ENTRIES {
            self.truncate_oldest(TRUNCATE_TO)?;
        }
        Ok(())
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush all buffered entries to disk with a single fsync.
    ///
    /// This is the durability point.
    pub fn flush(&mut self) -> Result<(), TxnLogError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        for mut json_bytes in self.write_buffer.drain(..) {
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }

        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Number of entries (on disk plus buffered).
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Read all entries currently in the log (flushes first).
    pub fn entries(&mut self) -> Result<Vec<TxnEntry>, TxnLogError> {
        self.flush()?;

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<TxnEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(error = %e, "Corrupt txn log entry during read, stopping");
                    break;
                }
            }
        }

        Ok(entries)
    }

    /// Entries with `ts_ms >= since_ms`, oldest first.
    pub fn entries_since(&mut self, since_ms: u64) -> Result<Vec<TxnEntry>, TxnLogError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.ts_ms >= since_ms)
            .collect())
    }

    /// Replay every entry's checksum.
    pub fn verify(&mut self) -> Result<VerifyReport, TxnLogError> {
        let entries = self.entries()?;
        let mut report = VerifyReport {
            total: entries.len(),
            unverifiable: Vec::new(),
        };
        for entry in &entries {
            if !entry.verify() {
                warn!(entry = %entry.id, "txn log entry failed checksum verification");
                report.unverifiable.push(entry.id.clone());
            }
        }
        Ok(report)
    }

    /// Truncate the log oldest-first, keeping the newest `keep` entries.
    ///
    /// Rewrites to a temp file and renames atomically, like the snapshot
    /// path, so a crash mid-truncation never loses the log.
    pub fn truncate_oldest(&mut self, keep: usize) -> Result<(), TxnLogError> {
        self.flush()?;

        let mut entries_lines: Vec<String> = Vec::new();
        {
            let mut reader = BufReader::new(self.file.try_clone()?);
            reader.seek(SeekFrom::Start(0))?;
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                    Err(e) => return Err(e.into()),
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if serde_json::from_str::<TxnEntry>(trimmed).is_err() {
                    break;
                }
                entries_lines.push(trimmed.to_string());
            }
        }

        let start = entries_lines.len().saturating_sub(keep);
        let kept = &entries_lines[start..];

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp_file = File::create(&tmp_path)?;
            for kept_line in kept {
                tmp_file.write_all(kept_line.as_bytes())?;
                tmp_file.write_all(b"\n")?;
            }
            tmp_file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.entry_count = kept.len();

        Ok(())
    }
}

#[cfg(test)]
#[path = "txn_log_tests.rs"]
mod tests;
