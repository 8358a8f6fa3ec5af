// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! foreman-core: Domain types for the Foreman task scheduling engine

pub mod clock;
pub mod dependency;
pub mod event;
pub mod id;
pub mod metrics;
pub mod record;
pub mod resource;
pub mod session;
pub mod task;
pub mod time_fmt;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use dependency::{DependencyType, EdgeId, TaskDependency, TaskLink};
pub use event::{Event, SnapshotKind};
pub use id::{IdGen, SequentialIdGen, ShortId, UuidIdGen};
pub use metrics::QueueMetrics;
pub use record::{ExecutionId, ExecutionRecord};
pub use resource::{ResourceKind, ResourceSpec};
pub use session::{OwnershipMode, Session, SessionId, SessionStatus, TaskOwnership};
pub use task::{
    InvalidTransition, Postcondition, Precondition, PriorityBand, PriorityFactors, Task,
    TaskCategory, TaskConfig, TaskId, TaskStatus,
};
pub use time_fmt::{format_elapsed, format_elapsed_ms};
