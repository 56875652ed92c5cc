//! In-memory persistence backend.
//!
//! Keeps one JSON document per `(board, object)`, merges applied patches
//! field by field, and fans every change out to the board's subscribers as a
//! remote snapshot, including echoes of the writer's own patches. Failures
//! can be injected with [`MemoryBackend::fail_next`].

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{PendingWrite, PersistError, PersistenceBoundary, SnapshotEvent, Subscription};
use crate::model::{BoardId, BoardObject, ObjectId};
use crate::reconcile::{ChangeType, RemoteChange};

const SUBSCRIPTION_CAPACITY: usize = 256;

/// One recorded `apply` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyCall {
    pub board_id: BoardId,
    pub writes: Vec<PendingWrite>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct Inner {
    boards: HashMap<BoardId, IndexMap<ObjectId, Value>>,
    subscribers: HashMap<BoardId, Vec<mpsc::Sender<SnapshotEvent>>>,
    fail_next: usize,
    calls: Vec<ApplyCall>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store `objects` for `board_id` without notifying subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Encode`] if an object cannot be encoded.
    pub fn seed<I>(&self, board_id: &str, objects: I) -> Result<(), PersistError>
    where
        I: IntoIterator<Item = BoardObject>,
    {
        let mut docs = Vec::new();
        for obj in objects {
            docs.push((obj.id.clone(), serde_json::to_value(&obj)?));
        }
        let mut inner = self.lock();
        let board = inner.boards.entry(board_id.to_owned()).or_default();
        board.extend(docs);
        Ok(())
    }

    /// Make the next `n` `apply` calls fail with [`PersistError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Every `apply` call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ApplyCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn document(&self, board_id: &str, object_id: &str) -> Option<Value> {
        self.lock()
            .boards
            .get(board_id)
            .and_then(|b| b.get(object_id))
            .cloned()
    }

    #[must_use]
    pub fn document_count(&self, board_id: &str) -> usize {
        self.lock().boards.get(board_id).map_or(0, IndexMap::len)
    }

    /// Apply changes made by another client and broadcast them.
    pub fn publish(&self, board_id: &str, changes: Vec<RemoteChange>) {
        let mut inner = self.lock();
        let board = inner.boards.entry(board_id.to_owned()).or_default();
        for change in &changes {
            let Some(id) = change.object.get("id").and_then(Value::as_str) else {
                continue;
            };
            match change.change_type {
                ChangeType::Removed => {
                    board.shift_remove(id);
                }
                ChangeType::Added | ChangeType::Modified => {
                    board.insert(id.to_owned(), change.object.clone());
                }
            }
        }
        broadcast(&mut inner, board_id, changes);
    }
}

#[async_trait]
impl PersistenceBoundary for MemoryBackend {
    async fn apply(&self, board_id: &str, writes: &[PendingWrite]) -> Result<(), PersistError> {
        let mut encoded = Vec::with_capacity(writes.len());
        for write in writes {
            encoded.push((write.object_id.clone(), serde_json::to_value(&write.fields)?));
        }

        let mut inner = self.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            inner.calls.push(ApplyCall { board_id: board_id.to_owned(), writes: writes.to_vec(), succeeded: false });
            return Err(PersistError::Unavailable);
        }

        // Updates only: a write for a missing document rejects the batch.
        let missing = writes
            .iter()
            .find(|w| !inner.boards.get(board_id).is_some_and(|b| b.contains_key(&w.object_id)));
        if let Some(write) = missing {
            inner.calls.push(ApplyCall { board_id: board_id.to_owned(), writes: writes.to_vec(), succeeded: false });
            return Err(PersistError::Rejected {
                board_id: board_id.to_owned(),
                reason: format!("no document `{}`", write.object_id),
            });
        }
        inner.calls.push(ApplyCall { board_id: board_id.to_owned(), writes: writes.to_vec(), succeeded: true });

        let board = inner.boards.entry(board_id.to_owned()).or_default();
        let mut changes = Vec::with_capacity(encoded.len());
        for (object_id, fields) in encoded {
            let Some(doc) = board.get_mut(&object_id) else {
                continue;
            };
            merge_fields(doc, fields);
            changes.push(RemoteChange { change_type: ChangeType::Modified, object: doc.clone() });
        }
        debug!(board_id, count = changes.len(), "memory backend applied batch");
        broadcast(&mut inner, board_id, changes);
        Ok(())
    }

    async fn subscribe(&self, board_id: &str) -> Result<Subscription, PersistError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let mut inner = self.lock();
        let objects: Vec<Value> = inner
            .boards
            .get(board_id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        let initial = SnapshotEvent { objects, changes: Vec::new(), is_initial: true };
        if tx.try_send(initial).is_err() {
            return Err(PersistError::SubscriptionClosed);
        }
        inner
            .subscribers
            .entry(board_id.to_owned())
            .or_default()
            .push(tx);
        Ok(Subscription::new(board_id.to_owned(), rx))
    }
}

fn merge_fields(doc: &mut Value, fields: Value) {
    let (Some(doc), Value::Object(fields)) = (doc.as_object_mut(), fields) else {
        return;
    };
    for (key, value) in fields {
        doc.insert(key, value);
    }
}

fn broadcast(inner: &mut Inner, board_id: &str, changes: Vec<RemoteChange>) {
    if changes.is_empty() {
        return;
    }
    let Some(subs) = inner.subscribers.get_mut(board_id) else {
        return;
    };
    subs.retain(|tx| !tx.is_closed());
    for tx in subs.iter() {
        let event = SnapshotEvent { objects: Vec::new(), changes: changes.clone(), is_initial: false };
        if let Err(e) = tx.try_send(event) {
            warn!(board_id, error = %e, "dropping snapshot for slow subscriber");
        }
    }
}
