// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable blob writing and the working-directory layout.
//!
//! All persisted files go through the same atomic sequence: write to a
//! `.tmp` sibling, fsync it, rename over the target, fsync the directory.
//! The directory fsync makes the rename itself durable, which matters for
//! anything a later step depends on (e.g. txn-log truncation after a
//! snapshot).
//!
//! The `StoreWriter` trait abstracts the filesystem calls, enabling
//! deterministic unit tests and error injection for crash scenarios.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from blob-store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
}

/// Trait abstracting durable-write I/O for testability.
pub trait StoreWriter: Send + Sync + 'static {
    /// Write raw data to a temporary file, creating parent directories.
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;

    /// Fsync a file so its data is durable.
    fn fsync_file(&self, path: &Path) -> Result<(), StoreError>;

    /// Atomically rename the tmp file to its final path.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError>;

    /// Fsync a directory so a rename inside it is durable.
    fn fsync_dir(&self, path: &Path) -> Result<(), StoreError>;

    /// File size in bytes (for metrics).
    fn file_size(&self, path: &Path) -> Result<u64, StoreError>;
}

/// Production writer using real filesystem operations.
#[derive(Debug, Clone, Default)]
pub struct FsStoreWriter;

impl StoreWriter for FsStoreWriter {
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), StoreError> {
        let dir = File::open(path)?;
        dir.sync_all()?;
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64, StoreError> {
        Ok(std::fs::metadata(path)?.len())
    }
}

/// Write `data` to `path` atomically. Returns the final file size.
pub fn atomic_write<W: StoreWriter>(writer: &W, path: &Path, data: &[u8]) -> Result<u64, StoreError> {
    let tmp_path = path.with_extension("tmp");

    writer.write_tmp(&tmp_path, data)?;
    writer.fsync_file(&tmp_path)?;
    writer.rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        writer.fsync_dir(parent)?;
    }

    Ok(writer.file_size(path).unwrap_or(data.len() as u64))
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = std::fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = std::fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

/// The on-disk layout of a scheduler working directory:
///
/// ```text
/// <root>/
///   snapshots/snapshot-<id>.json
///   backups/<id>.backup.json
///   session-<id>.json
///   txnlog.json
/// ```
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn snapshot_path(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("snapshot-{}.json", id))
    }

    pub fn backup_path(&self, id: &str) -> PathBuf {
        self.backups_dir().join(format!("{}.backup.json", id))
    }

    pub fn session_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("session-{}.json", id))
    }

    pub fn txn_log_path(&self) -> PathBuf {
        self.root.join("txnlog.json")
    }

    /// Create the directory skeleton if missing.
    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.snapshots_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
