//! Last-write-wins conflict resolution between two copies of one object.
//!
//! The remote copy wins only when its `updated_at` is strictly later than the
//! local copy's. A local copy with an unusable timestamp counts as the oldest
//! possible value, so any comparable remote beats it. Equal timestamps keep
//! the local copy.
//!
//! TODO: break equal-timestamp ties by id once every writer stamps
//! `updated_at`; today ties always keep the local copy.

#[cfg(test)]
#[path = "conflict_test.rs"]
mod conflict_test;

use crate::model::{BoardObject, Timestamp};

/// Which copy survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

fn millis_or_oldest(ts: Option<Timestamp>) -> i64 {
    ts.and_then(|t| t.to_millis()).unwrap_or(i64::MIN)
}

/// Decide which copy of the same object wins.
#[must_use]
pub fn resolve(local: &BoardObject, remote: &BoardObject) -> Winner {
    let local_ms = millis_or_oldest(local.updated_at);
    let remote_ms = millis_or_oldest(remote.updated_at);
    if remote_ms > local_ms { Winner::Remote } else { Winner::Local }
}

/// Return the winning copy.
#[must_use]
pub fn merge<'a>(local: &'a BoardObject, remote: &'a BoardObject) -> &'a BoardObject {
    match resolve(local, remote) {
        Winner::Local => local,
        Winner::Remote => remote,
    }
}
