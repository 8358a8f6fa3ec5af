// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Foreman scheduling and execution engine

mod conflict;
mod engine;
mod error;
mod events;
mod executor;
mod graph;
mod optimizer;
mod priority;
mod queue;
mod recovery;
mod resources;
mod sequencer;
mod sessions;
mod timers;

pub use conflict::{
    ConflictResolver, DataChange, Resolution, ResolutionStrategy, SyncConflict,
};
pub use engine::{Engine, EngineConfig, TaskStatusReport};
pub use error::EngineError;
pub use events::{EventBus, EventFilter, Subscription};
pub use executor::{
    retry_backoff_ms, Breakdown, CapabilityRegistry, ExecContext, ExecError, ExecOutput, Execute,
    NoBreakdown,
};
pub use graph::{CriticalPath, DependencyGraph, GraphError, ImpactReport};
pub use optimizer::{Optimizer, Recommendation, RecommendationKind};
pub use priority::{
    ExecutionHistory, PriorityContext, PriorityDecision, PriorityEngine, PriorityModel,
};
pub use queue::QueueCore;
pub use resources::{ResourceError, ResourceLease, ResourceManager};
pub use sequencer::{
    ExecutionSequence, HybridWeights, SequenceAlgorithm, SequenceMetadata, Sequencer,
};
pub use sessions::{SessionRegistry, SessionRegistryConfig};
