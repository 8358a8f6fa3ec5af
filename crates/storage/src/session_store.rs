// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session metadata files (`session-<id>.json`).
//!
//! Each live session persists its record so that a later process can
//! detect crashed peers from their last heartbeat. Writes are atomic;
//! corrupt files are quarantined to `.bak` and treated as absent.

use crate::store::{self, rotate_bak_path, FsStoreWriter, StoreError, StoreWriter, WorkDir};
use foreman_core::{Session, SessionId};
use std::fs::File;
use std::io::BufReader;
use tracing::warn;

/// Reads and writes session files in a working directory.
pub struct SessionStore<W: StoreWriter = FsStoreWriter> {
    workdir: WorkDir,
    writer: W,
}

impl SessionStore<FsStoreWriter> {
    pub fn new(workdir: WorkDir) -> Self {
        Self::with_writer(workdir, FsStoreWriter)
    }
}

impl<W: StoreWriter> SessionStore<W> {
    pub fn with_writer(workdir: WorkDir, writer: W) -> Self {
        Self { workdir, writer }
    }

    /// Persist a session record atomically.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.workdir.session_path(session.id.as_str());
        let bytes = serde_json::to_vec(session)?;
        store::atomic_write(&self.writer, &path, &bytes)?;
        Ok(())
    }

    /// Load a session record if present and parseable.
    ///
    /// Corrupt files are moved to `.bak` and reported as absent.
    pub fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let path = self.workdir.session_path(id.as_str());
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        match serde_json::from_reader(reader) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                let bak = rotate_bak_path(&path);
                warn!(
                    session = %id,
                    error = %e,
                    bak = %bak.display(),
                    "Corrupt session file, moving to .bak",
                );
                std::fs::rename(&path, &bak)?;
                Ok(None)
            }
        }
    }

    /// All parseable session records in the working directory.
    pub fn list(&self) -> Result<Vec<Session>, StoreError> {
        let root = self.workdir.root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !name.starts_with("session-") || !name.ends_with(".json") {
                continue;
            }

            let file = File::open(&path)?;
            match serde_json::from_reader(BufReader::new(file)) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt session file");
                }
            }
        }
        Ok(sessions)
    }

    /// Remove a session file (idempotent).
    pub fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        let path = self.workdir.session_path(id.as_str());
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;
