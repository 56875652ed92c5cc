#![allow(clippy::float_cmp)]

use super::*;
use crate::model::{BoardObject, Geometry, Timestamp};

fn at(id: &str, x: f64, updated_ms: Option<i64>) -> BoardObject {
    let mut obj = BoardObject::new(id, x, 0.0, Geometry::Rectangle { width: 10.0, height: 10.0 });
    obj.updated_at = updated_ms.map(Timestamp::from_millis);
    obj
}

#[test]
fn remote_newer_wins() {
    let local = at("o", 1.0, Some(1000));
    let remote = at("o", 2.0, Some(1001));
    assert_eq!(resolve(&local, &remote), Winner::Remote);
    assert_eq!(merge(&local, &remote).x, remote.x);
}

#[test]
fn local_newer_wins() {
    let local = at("o", 1.0, Some(5000));
    let remote = at("o", 2.0, Some(4000));
    assert_eq!(resolve(&local, &remote), Winner::Local);
}

#[test]
fn equal_timestamps_keep_local() {
    let local = at("o", 1.0, Some(3000));
    let remote = at("o", 2.0, Some(3000));
    assert_eq!(resolve(&local, &remote), Winner::Local);
    assert_eq!(merge(&local, &remote).x, local.x);
}

#[test]
fn unusable_local_loses_to_remote() {
    let local = at("o", 1.0, None);
    let remote = at("o", 2.0, Some(2000));
    assert_eq!(resolve(&local, &remote), Winner::Remote);
}

#[test]
fn malformed_local_timestamp_counts_as_unusable() {
    let mut local = at("o", 1.0, None);
    local.updated_at = Some(Timestamp { seconds: 10, nanoseconds: 2_000_000_000 });
    let remote = at("o", 2.0, Some(0));
    assert_eq!(resolve(&local, &remote), Winner::Remote);
}

#[test]
fn unusable_remote_keeps_local() {
    let local = at("o", 1.0, Some(2000));
    let remote = at("o", 2.0, None);
    assert_eq!(resolve(&local, &remote), Winner::Local);
}

#[test]
fn both_unusable_keep_local() {
    let local = at("o", 1.0, None);
    let remote = at("o", 2.0, None);
    assert_eq!(resolve(&local, &remote), Winner::Local);
}

#[test]
fn ties_favour_the_local_argument() {
    let a = at("o", 1.0, Some(10));
    let b = at("o", 2.0, Some(10));
    // Ties favour whichever side is passed as local.
    assert_eq!(merge(&a, &b).x, a.x);
    assert_eq!(merge(&b, &a).x, b.x);
}
