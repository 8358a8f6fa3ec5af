// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus: typed per-subscriber streams with explicit back-pressure.
//!
//! Each subscriber owns a bounded buffer. Non-critical events
//! (progress, heartbeats) drop oldest-first under pressure; lifecycle
//! events block the publisher briefly and only then overwrite the oldest
//! entry, counting the drop. Delivery is per-subscriber FIFO.

use foreman_core::{Event, TaskId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

/// How long a publisher waits for buffer space on a critical event
/// before overwriting the oldest entry.
const PUBLISH_TIMEOUT: Duration = Duration::from_millis(100);

/// Which events a subscription receives.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these event names (serialized tags); `None` = all.
    names: Option<HashSet<String>>,
    /// Restrict to events about this task.
    task: Option<TaskId>,
}

impl EventFilter {
    /// Receive everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Receive only the named event kinds (e.g. `"task:completed"`).
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Some(names.into_iter().map(Into::into).collect()),
            task: None,
        }
    }

    /// Receive only events about one task.
    pub fn for_task(id: impl Into<TaskId>) -> Self {
        Self {
            names: None,
            task: Some(id.into()),
        }
    }

    /// Narrow an existing filter to one task.
    pub fn with_task(mut self, id: impl Into<TaskId>) -> Self {
        self.task = Some(id.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(names) = &self.names {
            if !names.contains(event.name()) {
                return false;
            }
        }
        if let Some(task) = &self.task {
            if event.task_id() != Some(task) {
                return false;
            }
        }
        true
    }
}

struct Shared {
    buf: Mutex<VecDeque<Event>>,
    capacity: usize,
    closed: AtomicBool,
    /// Signalled when an event is pushed or the stream closes.
    data: Notify,
    /// Signalled when buffer space frees up.
    space: Notify,
    dropped: AtomicU64,
}

impl Shared {
    fn push_dropping_oldest(&self, event: Event) {
        let mut buf = self.buf.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(event);
        drop(buf);
        self.data.notify_one();
    }
}

/// A pull-based subscription. Call [`Subscription::recv`] to consume
/// events; [`Subscription::close`] drains and detaches.
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// Next event, in FIFO order. `None` once the subscription is closed
    /// and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut buf = self.shared.buf.lock();
                if let Some(event) = buf.pop_front() {
                    drop(buf);
                    self.shared.space.notify_one();
                    return Some(event);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.shared.data.notified().await;
        }
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&self) -> Option<Event> {
        let mut buf = self.shared.buf.lock();
        let event = buf.pop_front();
        if event.is_some() {
            self.shared.space.notify_one();
        }
        event
    }

    /// Close the subscription. Buffered events are discarded and the bus
    /// stops delivering to it.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.buf.lock().clear();
        self.shared.data.notify_waiters();
        self.shared.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Events this subscriber lost to back-pressure.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fan-out of lifecycle events to subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(EventFilter, Arc<Shared>)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the default buffer capacity.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.subscribe_with_capacity(filter, DEFAULT_CAPACITY)
    }

    /// Register a subscriber with an explicit buffer capacity.
    pub fn subscribe_with_capacity(&self, filter: EventFilter, capacity: usize) -> Subscription {
        let shared = Arc::new(Shared {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            data: Notify::new(),
            space: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.subscribers
            .lock()
            .push((filter, Arc::clone(&shared)));
        Subscription { shared }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|(_, s)| !s.closed.load(Ordering::Acquire))
            .count()
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Non-critical events drop the subscriber's oldest buffered event
    /// when full. Critical events wait up to [`PUBLISH_TIMEOUT`] for
    /// space, then overwrite the oldest entry (counted as dropped).
    pub async fn publish(&self, event: &Event) {
        let targets: Vec<Arc<Shared>> = {
            let mut subs = self.subscribers.lock();
            subs.retain(|(_, s)| !s.closed.load(Ordering::Acquire));
            subs.iter()
                .filter(|(filter, _)| filter.matches(event))
                .map(|(_, s)| Arc::clone(s))
                .collect()
        };

        for shared in targets {
            if !event.is_critical() {
                shared.push_dropping_oldest(event.clone());
                continue;
            }

            // Critical: block-with-timeout for space, then force
            let deadline = tokio::time::Instant::now() + PUBLISH_TIMEOUT;
            loop {
                {
                    let mut buf = shared.buf.lock();
                    if shared.closed.load(Ordering::Acquire) {
                        break;
                    }
                    if buf.len() < shared.capacity {
                        buf.push_back(event.clone());
                        drop(buf);
                        shared.data.notify_one();
                        break;
                    }
                }
                let wait = shared.space.notified();
                if tokio::time::timeout_at(deadline, wait).await.is_err() {
                    shared.push_dropping_oldest(event.clone());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
