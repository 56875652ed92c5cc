//! Board session: the single owner of a board's store and write queue.
//!
//! DESIGN
//! ======
//! `BoardSession` is plain synchronous state. Local edits are applied to the
//! store optimistically and queued in the same call, so a reader never sees
//! the queue ahead of the store. Remote snapshots are reconciled against the
//! store with the queue's pending set as the conflict predicate. Time comes
//! from an injected [`Clock`]; async plumbing lives in [`crate::worker`].

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::conflict::{self, Winner};
use crate::geometry::Bounds;
use crate::model::{BoardId, BoardObject, ObjectId, ObjectPatch};
use crate::persistence::{PersistError, SnapshotEvent};
use crate::reconcile::reconcile_with_pending;
use crate::store::ObjectStore;
use crate::viewport;
use crate::write_queue::{QueueStats, WriteBatch, WriteQueue};

pub struct BoardSession {
    store: ObjectStore,
    queue: WriteQueue,
    clock: Arc<dyn Clock>,
    board_id: Option<BoardId>,
    persistence_ready: bool,
}

impl BoardSession {
    #[must_use]
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ObjectStore::new(config.cell_size),
            queue: WriteQueue::new(config.write_debounce, config.write_retry),
            clock,
            board_id: None,
            persistence_ready: false,
        }
    }

    // =========================================================================
    // BOARD LIFECYCLE
    // =========================================================================

    /// Switch to `board_id` (or to no board). Clears the store and returns
    /// any writes still pending for the previous board, to be sent at once.
    pub fn set_board(&mut self, board_id: Option<BoardId>) -> Option<WriteBatch> {
        if self.board_id == board_id {
            return None;
        }
        info!(from = ?self.board_id, to = ?board_id, "switching board");
        self.store.clear();
        self.persistence_ready = false;
        self.board_id.clone_from(&board_id);
        self.queue.set_board(board_id)
    }

    #[must_use]
    pub fn board_id(&self) -> Option<&str> {
        self.board_id.as_deref()
    }

    /// Allow writes to be queued. Until this is called (once per board)
    /// local edits stay local.
    pub fn mark_persistence_ready(&mut self) {
        self.persistence_ready = true;
    }

    #[must_use]
    pub fn is_persistence_ready(&self) -> bool {
        self.persistence_ready
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Queue `patch` for `id` without touching the store. Returns `false`
    /// when there is no board or persistence is not ready.
    pub fn queue_write(&mut self, id: &str, patch: ObjectPatch) -> bool {
        if !self.persistence_ready {
            return false;
        }
        self.queue.queue_write(id, patch, self.clock.now())
    }

    /// Apply `patch` to the local copy and queue it for persistence.
    ///
    /// A patch without `updated_at` is stamped with the current time so the
    /// local copy wins against older remote echoes.
    pub fn queue_object_update(&mut self, id: &str, mut patch: ObjectPatch) -> bool {
        if patch.updated_at.is_none() {
            patch.updated_at = Some(self.clock.timestamp());
        }
        if !self.store.update_object(id, &patch) {
            debug!(id, "update for object not in store; queueing only");
        }
        self.queue_write(id, patch)
    }

    /// Insert a locally created object. Persisting the creation is up to the
    /// caller.
    pub fn insert_local(&mut self, obj: BoardObject) {
        self.store.set_object(obj);
    }

    pub fn set_dragging<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ObjectId>,
    {
        self.store.set_dragging(ids);
    }

    pub fn clear_dragging(&mut self) {
        self.store.clear_dragging();
    }

    // =========================================================================
    // REMOTE SNAPSHOTS
    // =========================================================================

    /// Fold a snapshot delivery into the store. Returns whether anything
    /// visible changed.
    pub fn apply_snapshot(&mut self, event: &SnapshotEvent) -> bool {
        let mut changed = false;
        if event.is_initial {
            self.replace_all(&event.objects);
            changed = true;
        }
        if !event.changes.is_empty() {
            let queue = &self.queue;
            let rec = reconcile_with_pending(self.store.objects(), &event.changes, |id| queue.is_pending(id));
            if rec.did_change {
                debug!(count = rec.touched.len(), "remote changes applied");
            }
            changed |= rec.did_change;
            self.store.apply_reconciliation(rec);
        }
        changed
    }

    /// Initial snapshot: take the remote set wholesale, except objects whose
    /// pending local copy still wins.
    fn replace_all(&mut self, docs: &[serde_json::Value]) {
        let mut objects = Vec::with_capacity(docs.len());
        for doc in docs {
            let remote: BoardObject = match serde_json::from_value(doc.clone()) {
                Ok(obj) => obj,
                Err(e) => {
                    warn!(error = %e, "skipping malformed object in initial snapshot");
                    continue;
                }
            };
            let keep_local = self
                .store
                .get(&remote.id)
                .filter(|local| self.queue.is_pending(&local.id) && conflict::resolve(local, &remote) == Winner::Local)
                .cloned();
            objects.push(keep_local.unwrap_or(remote));
        }
        info!(board_id = ?self.board_id, count = objects.len(), "initial snapshot loaded");
        self.store.set_all(objects);
    }

    // =========================================================================
    // FLUSHING
    // =========================================================================

    /// Batches whose debounce or retry deadline has passed.
    pub fn due_batches(&mut self) -> Vec<WriteBatch> {
        self.queue.due_batches(self.clock.now())
    }

    /// Pending writes as one batch, now, unless a batch for this board is
    /// still in flight.
    pub fn flush(&mut self) -> Option<WriteBatch> {
        self.queue.flush_now()
    }

    /// Every batch that can be sent right now, carry-overs included.
    pub fn drain_batches(&mut self) -> Vec<WriteBatch> {
        self.queue.drain_batches()
    }

    pub fn complete(&mut self, batch: WriteBatch, result: Result<(), PersistError>) {
        self.queue.complete(batch, result, self.clock.now());
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<std::time::Instant> {
        self.queue.next_deadline()
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Ids to render for `rect`. See [`viewport::visible_ids`].
    #[must_use]
    pub fn visible_ids(&self, rect: &Bounds) -> Vec<ObjectId> {
        viewport::visible_ids(&self.store, rect)
    }

    #[must_use]
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    #[must_use]
    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl Default for BoardSession {
    fn default() -> Self {
        Self::new(&SyncConfig::default(), Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for BoardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("board_id", &self.board_id)
            .field("objects", &self.store.len())
            .field("pending", &self.queue.pending_count())
            .field("persistence_ready", &self.persistence_ready)
            .finish_non_exhaustive()
    }
}
