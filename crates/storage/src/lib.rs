// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for Foreman: durable snapshots, the transaction log,
//! and per-session files, all written atomically with integrity hashes.

pub mod canonical;
mod manager;
mod session_store;
mod snapshot;
mod store;
mod txn_log;

pub use manager::{RetentionPolicy, SnapshotManager};
pub use session_store::SessionStore;
pub use snapshot::{Snapshot, SnapshotBody, SnapshotError, SnapshotMeta, CURRENT_SNAPSHOT_VERSION};
pub use store::{rotate_bak_path, FsStoreWriter, StoreError, StoreWriter, WorkDir};
pub use txn_log::{EntityKind, TxnEntry, TxnLog, TxnLogError, TxnOp, VerifyReport};
