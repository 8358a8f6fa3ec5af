// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor harness: runs a task's `Execute` capability under a timeout
//! race with cooperative cancellation and a cleanup grace window.
//!
//! Tasks carry an *executor key*; the capability registry maps keys to
//! implementations. Persistence stores the key, never the code, which is
//! how queued work survives a restart.

use foreman_core::{TaskConfig, TaskId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Retry backoff: `min(1s × 2^attempt, 30s)`.
pub fn retry_backoff_ms(attempt: u32) -> u64 {
    let base = 1_000u64;
    base.saturating_mul(1u64 << attempt.min(5)).min(30_000)
}

/// Failure from an `Execute` capability.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Transient: the harness may retry per the task's policy.
    #[error("retriable: {0}")]
    Retriable(String),
    /// Fatal: no retry; rollback is attempted.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ExecError {
    pub fn retriable(message: impl Into<String>) -> Self {
        ExecError::Retriable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ExecError::Fatal(message.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ExecError::Retriable(_))
    }
}

/// Successful capability output.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub output: serde_json::Value,
    /// Follow-up work the engine submits on success.
    pub next_tasks: Vec<TaskConfig>,
}

impl ExecOutput {
    pub fn value(output: serde_json::Value) -> Self {
        Self {
            output,
            next_tasks: Vec::new(),
        }
    }
}

/// Progress report sent from a running capability to the engine loop.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub task_id: TaskId,
    pub percent: u8,
    pub note: Option<String>,
}

/// Execution context handed to a capability.
///
/// Carries the task parameters, the attempt index, a cancellation signal,
/// and a progress channel. Capabilities should poll
/// [`ExecContext::is_cancelled`] (or await [`ExecContext::cancelled`]) at
/// natural suspension points and release their resources promptly.
pub struct ExecContext {
    pub task_id: TaskId,
    pub attempt: u32,
    pub params: serde_json::Value,
    cancel: watch::Receiver<bool>,
    progress: Option<mpsc::Sender<ProgressReport>>,
}

impl ExecContext {
    pub fn new(
        task_id: TaskId,
        attempt: u32,
        params: serde_json::Value,
        cancel: watch::Receiver<bool>,
        progress: Option<mpsc::Sender<ProgressReport>>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            params,
            cancel,
            progress,
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&mut self) {
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }

    /// Emit a progress report (non-blocking; dropped under back-pressure).
    pub fn report_progress(&self, percent: u8, note: Option<String>) {
        if let Some(progress) = &self.progress {
            let _ = progress.try_send(ProgressReport {
                task_id: self.task_id.clone(),
                percent: percent.min(100),
                note,
            });
        }
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A unit of executable work, registered under an executor key.
#[async_trait::async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, ctx: &mut ExecContext) -> Result<ExecOutput, ExecError>;

    /// Best-effort compensation after a fatal failure. Default: no-op.
    async fn rollback(&self, _ctx: &ExecContext) {}
}

/// Extension hook that splits a large task into subtasks.
///
/// The default implementation returns nothing; the engine submits
/// whatever a custom implementation yields.
pub trait Breakdown: Send + Sync {
    fn breakdown(&self, _task: &foreman_core::Task) -> Vec<TaskConfig> {
        Vec::new()
    }
}

/// Default no-op breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBreakdown;

impl Breakdown for NoBreakdown {}

/// Maps executor keys to capability implementations.
///
/// The embedder re-registers capabilities after a restart; tasks loaded
/// from a snapshot reference them by key.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Arc<RwLock<HashMap<String, Arc<dyn Execute>>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, capability: Arc<dyn Execute>) {
        self.capabilities.write().insert(key.into(), capability);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Execute>> {
        self.capabilities.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.capabilities.read().contains_key(key)
    }
}

/// Outcome of a single harnessed attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed(ExecOutput),
    Failed { message: String, retriable: bool },
    /// The timeout fired. `leaked` is set when the capability also failed
    /// to wind down inside the grace window.
    TimedOut { leaked: bool },
    /// A cancellation signal arrived. `leaked` as above.
    Cancelled { leaked: bool },
}

/// Run one attempt of a capability under the timeout race.
///
/// On timeout or external cancellation the cancel signal is delivered
/// and the capability gets `grace` to finish cooperatively; if it does
/// not, it is dropped and the leak reported in the outcome.
pub async fn run_attempt(
    capability: Arc<dyn Execute>,
    mut ctx: ExecContext,
    cancel_tx: watch::Sender<bool>,
    timeout: Duration,
    grace: Duration,
) -> AttemptOutcome {
    let mut cancel_rx = cancel_tx.subscribe();

    let exec = capability.execute(&mut ctx);
    tokio::pin!(exec);

    // Biased: an external cancel signal outranks the capability's own
    // reaction to it, so a cancelled run is reported as cancelled, not
    // as whatever error the capability bailed out with.
    let raced = tokio::select! {
        biased;
        _ = wait_cancel(&mut cancel_rx) => {
            // External cancel: let the capability wind down in the grace window
            match tokio::time::timeout(grace, &mut exec).await {
                Ok(_) => return AttemptOutcome::Cancelled { leaked: false },
                Err(_) => return AttemptOutcome::Cancelled { leaked: true },
            }
        }
        result = &mut exec => Some(result),
        _ = tokio::time::sleep(timeout) => None,
    };

    match raced {
        Some(Ok(output)) => AttemptOutcome::Completed(output),
        Some(Err(e)) => AttemptOutcome::Failed {
            retriable: e.is_retriable(),
            message: e.to_string(),
        },
        None => {
            // Timeout: signal cancellation, then grace race
            let _ = cancel_tx.send(true);
            match tokio::time::timeout(grace, &mut exec).await {
                Ok(_) => AttemptOutcome::TimedOut { leaked: false },
                Err(_) => AttemptOutcome::TimedOut { leaked: true },
            }
        }
    }
}

async fn wait_cancel(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender gone; treat as never-cancelled
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
