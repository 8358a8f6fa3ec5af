// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot manager: creation triggers, retention, and recovery loading.
//!
//! Creation is triggered by a periodic timer, an operation-count
//! threshold, an explicit call, or crash recovery; the engine owns the
//! timers and calls in; the manager owns files and retention. Loading
//! walks snapshots newest-first, quarantining any file that fails its
//! integrity check and falling back to the next.

use crate::snapshot::{Snapshot, SnapshotBody, SnapshotError, SnapshotMeta};
use crate::store::{rotate_bak_path, FsStoreWriter, StoreWriter, WorkDir};
use chrono::{DateTime, Utc};
use foreman_core::{IdGen, SessionId, SnapshotKind, UuidIdGen};
use tracing::{info, warn};

/// How many snapshots (and backups) to keep.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub snapshots: usize,
    pub backups: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            snapshots: 10,
            backups: 5,
        }
    }
}

/// Manages snapshot files in a working directory.
pub struct SnapshotManager<W: StoreWriter = FsStoreWriter, G: IdGen = UuidIdGen> {
    workdir: WorkDir,
    writer: W,
    ids: G,
    retention: RetentionPolicy,
    compress: bool,
}

impl SnapshotManager<FsStoreWriter, UuidIdGen> {
    /// Create a manager with the default filesystem writer and UUID ids.
    pub fn new(workdir: WorkDir) -> Self {
        Self::with_parts(workdir, FsStoreWriter, UuidIdGen)
    }
}

impl<W: StoreWriter, G: IdGen> SnapshotManager<W, G> {
    /// Create a manager with custom writer and id generator (for tests).
    pub fn with_parts(workdir: WorkDir, writer: W, ids: G) -> Self {
        Self {
            workdir,
            writer,
            ids,
            retention: RetentionPolicy::default(),
            compress: false,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Enable zstd body compression for newly created snapshots.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    /// Freeze a body into a new snapshot file and apply retention.
    ///
    /// Returns the metadata of the written snapshot (with final size).
    pub fn create(
        &self,
        body: SnapshotBody,
        session_id: SessionId,
        kind: SnapshotKind,
        queue_state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotMeta, SnapshotError> {
        self.workdir.ensure_layout()?;

        let id = self.ids.next();
        let snapshot = Snapshot::new(
            id.clone(),
            session_id,
            kind,
            queue_state,
            body,
            created_at,
        )?;

        let path = self.workdir.snapshot_path(&id);
        let written = snapshot.save(&self.writer, &path, self.compress)?;

        info!(
            snapshot = %id,
            kind = %kind,
            tasks = snapshot.meta.task_count,
            bytes = written,
            "snapshot created",
        );

        // Retention only after a successful replacement write
        self.prune_snapshots()?;

        Ok(snapshot.meta)
    }

    /// List snapshot metadata, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let dir = self.workdir.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut metas = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("snapshot-") && n.ends_with(".json"));
            if !is_snapshot {
                continue;
            }
            match Snapshot::load_meta(&path) {
                Ok(Some(meta)) => metas.push(meta),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable snapshot metadata, skipping");
                }
            }
        }

        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }

    /// Load a specific snapshot by id, verifying integrity.
    pub fn load(&self, id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Snapshot::load(&self.workdir.snapshot_path(id))
    }

    /// Load the most recent snapshot that passes its integrity check.
    ///
    /// A snapshot failing integrity is quarantined to `.bak` and the next
    /// most recent is tried; the fallback is logged and reported in the
    /// second tuple field so callers can surface it.
    pub fn load_latest(&self) -> Result<(Option<Snapshot>, usize), SnapshotError> {
        let metas = self.list()?;
        let mut skipped = 0usize;

        for meta in metas {
            let path = self.workdir.snapshot_path(&meta.id);
            match Snapshot::load(&path) {
                Ok(Some(snapshot)) => return Ok((Some(snapshot), skipped)),
                Ok(None) => {}
                Err(e) => {
                    let bak = rotate_bak_path(&path);
                    warn!(
                        snapshot = %meta.id,
                        error = %e,
                        bak = %bak.display(),
                        "snapshot failed to load, quarantining and falling back",
                    );
                    let _ = std::fs::rename(&path, &bak);
                    skipped += 1;
                }
            }
        }

        Ok((None, skipped))
    }

    /// Most recent snapshot produced by a given session, if any.
    pub fn latest_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SnapshotMeta>, SnapshotError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|m| &m.session_id == session_id))
    }

    /// Copy a snapshot into `backups/<id>.backup.json`.
    pub fn mark_backup(&self, id: &str) -> Result<(), SnapshotError> {
        self.workdir.ensure_layout()?;
        let src = self.workdir.snapshot_path(id);
        let dst = self.workdir.backup_path(id);
        std::fs::copy(&src, &dst)?;
        self.prune_backups()?;
        Ok(())
    }

    /// Delete snapshots beyond the retention limit, oldest first.
    fn prune_snapshots(&self) -> Result<(), SnapshotError> {
        let metas = self.list()?;
        for meta in metas.iter().skip(self.retention.snapshots) {
            let path = self.workdir.snapshot_path(&meta.id);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(snapshot = %meta.id, error = %e, "failed to prune snapshot");
            }
        }
        Ok(())
    }

    /// Delete backups beyond the retention limit, oldest first (by mtime).
    fn prune_backups(&self) -> Result<(), SnapshotError> {
        let dir = self.workdir.backups_dir();
        if !dir.exists() {
            return Ok(());
        }

        let mut backups: Vec<(std::time::SystemTime, std::path::PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".backup.json"));
            if !is_backup {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            backups.push((modified, path));
        }

        backups.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in backups.into_iter().skip(self.retention.backups) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
