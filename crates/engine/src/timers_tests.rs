// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base() -> Instant {
    Instant::now()
}

#[test]
fn set_and_fire() {
    let mut timers = TimerQueue::new();
    let now = base();
    timers.set("retry:t-1", Duration::from_millis(100), now);

    assert!(timers.fired(now).is_empty());
    let fired = timers.fired(now + Duration::from_millis(100));
    assert_eq!(fired, vec!["retry:t-1".to_string()]);
    // One-shot: firing removes it
    assert!(!timers.has_timers());
}

#[test]
fn multiple_fired_sorted() {
    let mut timers = TimerQueue::new();
    let now = base();
    timers.set("b", Duration::from_millis(10), now);
    timers.set("a", Duration::from_millis(20), now);

    let fired = timers.fired(now + Duration::from_millis(50));
    assert_eq!(fired, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn cancel_removes() {
    let mut timers = TimerQueue::new();
    let now = base();
    timers.set("retry:t-1", Duration::from_millis(10), now);
    timers.cancel("retry:t-1");
    assert!(timers.fired(now + Duration::from_secs(1)).is_empty());
}

#[test]
fn cancel_prefix_sweeps_related() {
    let mut timers = TimerQueue::new();
    let now = base();
    timers.set("retry:t-1", Duration::from_millis(10), now);
    timers.set("retry:t-2", Duration::from_millis(10), now);
    timers.set("heartbeat", Duration::from_millis(10), now);

    timers.cancel_prefix("retry:");
    let fired = timers.fired(now + Duration::from_secs(1));
    assert_eq!(fired, vec!["heartbeat".to_string()]);
}

#[test]
fn reset_replaces_deadline() {
    let mut timers = TimerQueue::new();
    let now = base();
    timers.set("snapshot", Duration::from_millis(10), now);
    timers.set("snapshot", Duration::from_millis(500), now);

    assert!(timers.fired(now + Duration::from_millis(100)).is_empty());
    assert_eq!(
        timers.fired(now + Duration::from_millis(500)),
        vec!["snapshot".to_string()]
    );
}

#[test]
fn next_deadline_is_earliest() {
    let mut timers = TimerQueue::new();
    let now = base();
    assert!(timers.next_deadline().is_none());

    timers.set("late", Duration::from_secs(10), now);
    timers.set("soon", Duration::from_millis(50), now);

    let deadline = timers.next_deadline().unwrap();
    assert_eq!(deadline, now + Duration::from_millis(50));
}
