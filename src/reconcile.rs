//! Incremental snapshot reconciliation.
//!
//! DESIGN
//! ======
//! A remote snapshot arrives as a list of `added` / `modified` / `removed`
//! records. Reconciliation applies them to the current id → object map
//! copy-on-write: the map is cloned only when the first real change is found.
//! When nothing changes the caller gets back the very same `Arc`, so
//! "did anything change" is answerable both from the `did_change` flag and by
//! `Arc::ptr_eq`.
//!
//! Remote echoes of this client's own writes are the common case and must not
//! cause a re-render; `modified` records that are visually identical to the
//! local copy are skipped. Records for objects with a pending local write are
//! adjudicated by the conflict resolver so a late, older echo cannot clobber
//! a newer local edit.
//!
//! ERROR HANDLING
//! ==============
//! A record whose payload does not decode is skipped with a warning; the rest
//! of the batch still applies.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::conflict::{self, Winner};
use crate::model::{BoardObject, ObjectId};

/// Live objects keyed by id, in insertion order.
pub type ObjectMap = IndexMap<ObjectId, BoardObject>;

/// Kind of a remote change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One record from a remote snapshot. `object` is the full document payload,
/// kept undecoded so a bad record can be skipped individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub object: serde_json::Value,
}

impl RemoteChange {
    /// Build a change record from a typed object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be encoded as JSON.
    pub fn from_object(change_type: ChangeType, object: &BoardObject) -> Result<Self, serde_json::Error> {
        Ok(Self { change_type, object: serde_json::to_value(object)? })
    }

    #[must_use]
    pub fn removed(id: &str) -> Self {
        Self { change_type: ChangeType::Removed, object: serde_json::json!({ "id": id }) }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Next map. Same `Arc` as the input when `did_change` is false.
    pub objects: Arc<ObjectMap>,
    pub did_change: bool,
    /// Ids inserted, replaced or removed, in first-touched order.
    pub touched: Vec<ObjectId>,
}

/// True when two copies render identically. Provenance fields are ignored
/// and point lists are compared by value.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn visually_equal(a: &BoardObject, b: &BoardObject) -> bool {
    a.id == b.id
        && a.x == b.x
        && a.y == b.y
        && a.rotation == b.rotation
        && a.geometry == b.geometry
        && a.style == b.style
        && a.parent_frame() == b.parent_frame()
}

/// Reconcile with no pending local writes.
#[must_use]
pub fn reconcile(current: &Arc<ObjectMap>, changes: &[RemoteChange]) -> Reconciliation {
    reconcile_with_pending(current, changes, |_| false)
}

/// Reconcile a batch of remote changes against `current`.
///
/// `is_pending` reports whether an id has a local write still waiting to be
/// persisted; such ids only take the remote copy when it wins LWW.
#[must_use]
pub fn reconcile_with_pending<F>(current: &Arc<ObjectMap>, changes: &[RemoteChange], is_pending: F) -> Reconciliation
where
    F: Fn(&str) -> bool,
{
    let mut next: Option<ObjectMap> = None;
    let mut touched: IndexSet<ObjectId> = IndexSet::new();

    for change in changes {
        match change.change_type {
            ChangeType::Removed => {
                let Some(id) = change.object.get("id").and_then(serde_json::Value::as_str) else {
                    warn!("skipping removal record without an id");
                    continue;
                };
                if !view(next.as_ref(), current).contains_key(id) {
                    continue;
                }
                working(&mut next, current).shift_remove(id);
                touched.insert(id.to_owned());
            }
            ChangeType::Added | ChangeType::Modified => {
                let incoming = match BoardObject::deserialize(&change.object) {
                    Ok(obj) => obj,
                    Err(e) => {
                        let id = change.object.get("id").and_then(serde_json::Value::as_str);
                        warn!(error = %e, id = ?id, "skipping malformed remote object");
                        continue;
                    }
                };

                let skip = match view(next.as_ref(), current).get(&incoming.id) {
                    Some(existing) if visually_equal(existing, &incoming) => true,
                    Some(existing) if is_pending(&incoming.id) => {
                        conflict::resolve(existing, &incoming) == Winner::Local
                    }
                    _ => false,
                };
                if skip {
                    continue;
                }

                let id = incoming.id.clone();
                let map = working(&mut next, current);
                if let Some(slot) = map.get_mut(&id) {
                    *slot = incoming;
                } else {
                    map.insert(id.clone(), incoming);
                }
                touched.insert(id);
            }
        }
    }

    match next {
        Some(map) => Reconciliation { objects: Arc::new(map), did_change: true, touched: touched.into_iter().collect() },
        None => Reconciliation { objects: Arc::clone(current), did_change: false, touched: Vec::new() },
    }
}

fn view<'a>(next: Option<&'a ObjectMap>, current: &'a ObjectMap) -> &'a ObjectMap {
    next.unwrap_or(current)
}

fn working<'a>(next: &'a mut Option<ObjectMap>, current: &ObjectMap) -> &'a mut ObjectMap {
    next.get_or_insert_with(|| current.clone())
}
