// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the scenario tests.

use foreman_engine::{EngineConfig, ExecContext, ExecError, ExecOutput, Execute, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(20);

/// Engine config tuned for fast test iteration.
pub fn test_config(dir: &std::path::Path) -> EngineConfig {
    let mut cfg = EngineConfig::new(dir);
    cfg.heartbeat_interval_ms = 50;
    cfg.snapshot_interval_ms = 60_000;
    cfg.cancel_grace_ms = 500;
    cfg
}

/// Block until the subscription yields the named event.
pub async fn wait_for(sub: &Subscription, name: &str) -> foreman_core::Event {
    tokio::time::timeout(WAIT, async {
        loop {
            let Some(event) = sub.recv().await else {
                panic!("subscription closed while waiting for {name}");
            };
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// Collect `n` occurrences of the named event.
pub async fn wait_for_n(sub: &Subscription, name: &str, n: usize) {
    for _ in 0..n {
        wait_for(sub, name).await;
    }
}

/// Completes immediately, echoing its params.
pub struct Echo;

#[async_trait::async_trait]
impl Execute for Echo {
    async fn execute(&self, ctx: &mut ExecContext) -> Result<ExecOutput, ExecError> {
        Ok(ExecOutput::value(serde_json::json!({
            "echo": ctx.params.clone()
        })))
    }
}

/// Sleeps for a fixed duration, recording start/finish instants and the
/// peak number of concurrent executions.
pub struct Timed {
    pub sleep: Duration,
    pub spans: Arc<Mutex<Vec<(String, Instant, Instant)>>>,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl Timed {
    pub fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            spans: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

}

#[async_trait::async_trait]
impl Execute for Timed {
    async fn execute(&self, ctx: &mut ExecContext) -> Result<ExecOutput, ExecError> {
        let started = Instant::now();
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        tokio::time::sleep(self.sleep).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.spans
            .lock()
            .push((ctx.task_id.to_string(), started, Instant::now()));
        Ok(ExecOutput::default())
    }
}

/// Fails with a retriable error until the configured attempt succeeds.
pub struct FlakyUntil {
    pub succeed_on_attempt: u32,
    pub attempts: Arc<AtomicU32>,
    pub attempt_times: Arc<Mutex<Vec<Instant>>>,
}

impl FlakyUntil {
    pub fn new(succeed_on_attempt: u32) -> Self {
        Self {
            succeed_on_attempt,
            attempts: Arc::new(AtomicU32::new(0)),
            attempt_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

}

#[async_trait::async_trait]
impl Execute for FlakyUntil {
    async fn execute(&self, _ctx: &mut ExecContext) -> Result<ExecOutput, ExecError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempt_times.lock().push(Instant::now());
        if attempt < self.succeed_on_attempt {
            Err(ExecError::retriable(format!("flaky on attempt {attempt}")))
        } else {
            Ok(ExecOutput::value(serde_json::json!({"attempt": attempt})))
        }
    }
}
