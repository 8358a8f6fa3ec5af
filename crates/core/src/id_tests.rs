// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::borrow::Borrow;
use std::collections::HashMap;

// --- define_id! macro tests ---

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId;
}

#[test]
fn define_id_new_and_as_str() {
    let id = TestId::new("abc");
    assert_eq!(id.as_str(), "abc");
}

#[test]
fn define_id_display() {
    let id = TestId::new("hello");
    assert_eq!(format!("{}", id), "hello");
}

#[test]
fn define_id_from_string_and_str() {
    let owned: TestId = String::from("owned").into();
    let borrowed: TestId = "borrowed".into();
    assert_eq!(owned.as_str(), "owned");
    assert_eq!(borrowed.as_str(), "borrowed");
}

#[test]
fn define_id_partial_eq_str() {
    let id = TestId::new("test");
    assert_eq!(id, *"test");
    assert_eq!(id, "test");
}

#[test]
fn define_id_borrow_enables_str_lookup() {
    let id = TestId::new("key");
    let borrowed: &str = id.borrow();
    assert_eq!(borrowed, "key");

    let mut map: HashMap<TestId, u32> = HashMap::new();
    map.insert(TestId::new("key"), 7);
    assert_eq!(map.get("key"), Some(&7));
}

#[test]
fn define_id_short_truncates() {
    let id = TestId::new("abcdefgh");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefgh");
}

#[test]
fn define_id_serde_round_trip() {
    let id = TestId::new("abc-123");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"abc-123\"");
    let back: TestId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// --- ShortId ---

#[test]
fn short_id_on_str() {
    assert_eq!("abcdef".short(3), "abc");
    assert_eq!("ab".short(3), "ab");
}

// --- generators ---

#[test]
fn uuid_gen_produces_unique_ids() {
    let g = UuidIdGen;
    let a = g.next();
    let b = g.next();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn sequential_gen_counts_up() {
    let g = SequentialIdGen::new("task");
    assert_eq!(g.next(), "task-1");
    assert_eq!(g.next(), "task-2");

    // Clones share the counter
    let h = g.clone();
    assert_eq!(h.next(), "task-3");
    assert_eq!(g.next(), "task-4");
}
