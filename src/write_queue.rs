//! Outgoing write queue: coalesce, debounce, batch, retry.
//!
//! DESIGN
//! ======
//! Local edits land in a pending map of object id → accumulated patch. The
//! first edit after an idle period arms a debounce deadline; when it expires
//! the whole pending map is snapshotted into one [`WriteBatch`] and handed to
//! the caller to send. The queue itself does no I/O and reads no clock: every
//! time-dependent call takes `now`, and [`WriteQueue::next_deadline`] tells
//! the owner when to call [`WriteQueue::due_batches`] again.
//!
//! At most one batch per board is in flight. Edits made meanwhile stay
//! pending and go out in the next batch once the current one completes, so
//! a board's writes reach the backend in the order they were made.
//!
//! ERROR HANDLING
//! ==============
//! A failed batch is never dropped. Its patches are merged back underneath
//! any edits made while it was in flight (newer fields win) and a retry
//! deadline replaces the debounce. A failed batch for a board that is no
//! longer active is kept as a carry-over and resent on the retry interval,
//! still addressed to its own board. There is at most one carry-over per
//! board and never one for the active board.

#[cfg(test)]
#[path = "write_queue_test.rs"]
mod write_queue_test;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::model::{BoardId, ObjectId, ObjectPatch};
use crate::persistence::{PendingWrite, PersistError};

/// One snapshot of pending writes, addressed to a single board.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    /// Unique per queue, increasing.
    pub seq: u64,
    pub board_id: BoardId,
    pub writes: Vec<PendingWrite>,
    /// 1 on first send, incremented on each carry-over resend.
    pub attempt: u32,
}

impl WriteBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Observable queue state. An armed timer takes precedence over in-flight
/// batches when both apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Armed { due: Instant, retry: bool },
    Flushing { in_flight: usize },
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    /// Writes merged into an already-pending entry.
    pub coalesced: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub objects_persisted: u64,
    pub retries_scheduled: u64,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due: Instant,
    retry: bool,
}

#[derive(Debug)]
struct InFlight {
    board_id: BoardId,
    ids: Vec<ObjectId>,
}

#[derive(Debug)]
pub struct WriteQueue {
    debounce: Duration,
    retry: Duration,
    board_id: Option<BoardId>,
    pending: IndexMap<ObjectId, ObjectPatch>,
    /// Unsent batches for boards other than the active one.
    carry_over: Vec<WriteBatch>,
    in_flight: BTreeMap<u64, InFlight>,
    timer: Option<Timer>,
    next_seq: u64,
    stats: QueueStats,
}

impl WriteQueue {
    #[must_use]
    pub fn new(debounce: Duration, retry: Duration) -> Self {
        Self {
            debounce,
            retry,
            board_id: None,
            pending: IndexMap::new(),
            carry_over: Vec::new(),
            in_flight: BTreeMap::new(),
            timer: None,
            next_seq: 1,
            stats: QueueStats::default(),
        }
    }

    // =========================================================================
    // ENQUEUE + FLUSH
    // =========================================================================

    /// Merge `patch` into the pending entry for `id` and arm the debounce if
    /// nothing is armed. Returns `false` (and queues nothing) without an
    /// active board.
    pub fn queue_write(&mut self, id: &str, patch: ObjectPatch, now: Instant) -> bool {
        if self.board_id.is_none() {
            return false;
        }
        if let Some(existing) = self.pending.get_mut(id) {
            existing.merge(patch);
            self.stats.coalesced += 1;
        } else {
            self.pending.insert(id.to_owned(), patch);
        }
        self.stats.queued += 1;
        if self.timer.is_none() {
            self.timer = Some(Timer { due: now + self.debounce, retry: false });
        }
        true
    }

    /// Snapshot pending writes for the active board immediately.
    ///
    /// Cancels the debounce. A retry deadline owed to carry-over batches
    /// stays armed. Returns `None` while the board already has a batch in
    /// flight; the edits then go out after it completes.
    pub fn flush_now(&mut self) -> Option<WriteBatch> {
        if self.carry_over.is_empty() {
            self.timer = None;
        }
        self.snapshot()
    }

    /// Batches ready to send at `now`: carry-overs first, then a fresh
    /// snapshot of the active board. Empty until the armed deadline passes.
    pub fn due_batches(&mut self, now: Instant) -> Vec<WriteBatch> {
        match self.timer {
            Some(timer) if timer.due <= now => {}
            _ => return Vec::new(),
        }
        self.timer = None;
        self.release()
    }

    /// Everything sendable right now, ignoring the timer. Used for the final
    /// flush on shutdown.
    pub fn drain_batches(&mut self) -> Vec<WriteBatch> {
        self.timer = None;
        self.release()
    }

    /// Record the outcome of sending `batch`.
    pub fn complete(&mut self, batch: WriteBatch, result: Result<(), PersistError>, now: Instant) {
        if self.in_flight.remove(&batch.seq).is_none() {
            debug!(seq = batch.seq, "completion for unknown batch ignored");
            return;
        }

        match result {
            Ok(()) => {
                self.stats.objects_persisted += batch.writes.len() as u64;
                debug!(board_id = %batch.board_id, count = batch.writes.len(), seq = batch.seq, "write batch persisted");
                let waiting = !self.pending.is_empty() || !self.carry_over.is_empty();
                if waiting && self.timer.is_none() {
                    self.timer = Some(Timer { due: now + self.debounce, retry: false });
                }
            }
            Err(e) => {
                self.stats.batches_failed += 1;
                self.stats.retries_scheduled += 1;
                warn!(
                    error = %e,
                    code = e.error_code(),
                    board_id = %batch.board_id,
                    count = batch.writes.len(),
                    attempt = batch.attempt,
                    "write batch failed; scheduling retry"
                );
                self.requeue_failed(batch);
                self.timer = Some(Timer { due: now + self.retry, retry: true });
            }
        }
    }

    /// Switch the active board. Pending writes for the previous board come
    /// back as one batch to send right away, unless that board still has a
    /// batch in flight, in which case they wait as a carry-over.
    pub fn set_board(&mut self, board_id: Option<BoardId>) -> Option<WriteBatch> {
        if self.board_id == board_id {
            return None;
        }
        let batch = match self.board_id.take() {
            Some(previous) if !self.pending.is_empty() => self.hand_off(previous),
            _ => {
                self.pending.clear();
                None
            }
        };
        if self.carry_over.is_empty() {
            self.timer = None;
        }
        info!(to = ?board_id, flushed = batch.as_ref().map_or(0, WriteBatch::len), parked = self.carry_over.len(), "write queue switched board");
        self.board_id = board_id;

        // A carry-over for the board being returned to becomes pending again.
        if let Some(board) = self.board_id.clone()
            && let Some(pos) = self.carry_over.iter().position(|b| b.board_id == board)
        {
            let parked = self.carry_over.remove(pos);
            merge_under(parked.writes, &mut self.pending);
        }
        batch
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    #[must_use]
    pub fn board_id(&self) -> Option<&str> {
        self.board_id.as_deref()
    }

    /// Objects with unsent edits for the active board.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True if `id` has an unsent edit or is part of an in-flight batch for
    /// the active board.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        if self.pending.contains_key(id) {
            return true;
        }
        let Some(board) = self.board_id.as_deref() else {
            return false;
        };
        self.in_flight
            .values()
            .any(|f| f.board_id == board && f.ids.iter().any(|i| i == id))
    }

    #[must_use]
    pub fn pending_patch(&self, id: &str) -> Option<&ObjectPatch> {
        self.pending.get(id)
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        match self.timer {
            Some(Timer { due, retry }) => QueueState::Armed { due, retry },
            None if !self.in_flight.is_empty() => QueueState::Flushing { in_flight: self.in_flight.len() },
            None => QueueState::Idle,
        }
    }

    /// When the owner should next call [`WriteQueue::due_batches`].
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.due)
    }

    #[must_use]
    pub fn carry_over_count(&self) -> usize {
        self.carry_over.len()
    }

    /// Writes not yet persisted and not in flight, across all boards.
    #[must_use]
    pub fn unsent_count(&self) -> usize {
        self.pending.len() + self.carry_over.iter().map(WriteBatch::len).sum::<usize>()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn snapshot(&mut self) -> Option<WriteBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let Some(board_id) = self.board_id.clone() else {
            self.pending.clear();
            return None;
        };
        if self.board_in_flight(&board_id) {
            return None;
        }
        let batch = self.take_pending(board_id);
        self.track(&batch);
        Some(batch)
    }

    /// Carry-overs whose board is idle, then the active board's snapshot.
    fn release(&mut self) -> Vec<WriteBatch> {
        let mut out: Vec<WriteBatch> = Vec::with_capacity(self.carry_over.len() + 1);
        for mut batch in std::mem::take(&mut self.carry_over) {
            if self.board_in_flight(&batch.board_id) {
                self.carry_over.push(batch);
                continue;
            }
            batch.attempt += 1;
            self.track(&batch);
            out.push(batch);
        }
        if let Some(batch) = self.snapshot() {
            out.push(batch);
        }
        out
    }

    /// Pending writes of a board being switched away from.
    fn hand_off(&mut self, previous: BoardId) -> Option<WriteBatch> {
        let mut batch = self.take_pending(previous);
        if self.board_in_flight(&batch.board_id) {
            // Released after the in-flight batch completes; release bumps
            // the attempt to 1.
            batch.attempt = 0;
            self.carry_over.push(batch);
            return None;
        }
        self.track(&batch);
        Some(batch)
    }

    fn take_pending(&mut self, board_id: BoardId) -> WriteBatch {
        let writes = into_writes(std::mem::take(&mut self.pending));
        let batch = WriteBatch { seq: self.next_seq, board_id, writes, attempt: 1 };
        self.next_seq += 1;
        batch
    }

    fn track(&mut self, batch: &WriteBatch) {
        self.stats.batches_sent += 1;
        self.in_flight.insert(
            batch.seq,
            InFlight {
                board_id: batch.board_id.clone(),
                ids: batch.writes.iter().map(|w| w.object_id.clone()).collect(),
            },
        );
    }

    fn board_in_flight(&self, board_id: &str) -> bool {
        self.in_flight.values().any(|f| f.board_id == board_id)
    }

    /// Put a failed batch back beneath whatever was queued for its board
    /// since it was sent.
    fn requeue_failed(&mut self, batch: WriteBatch) {
        if self.board_id.as_deref() == Some(batch.board_id.as_str()) {
            merge_under(batch.writes, &mut self.pending);
            return;
        }
        match self.carry_over.iter_mut().find(|b| b.board_id == batch.board_id) {
            Some(parked) => {
                let mut newer: IndexMap<ObjectId, ObjectPatch> = std::mem::take(&mut parked.writes)
                    .into_iter()
                    .map(|w| (w.object_id, w.fields))
                    .collect();
                merge_under(batch.writes, &mut newer);
                parked.writes = into_writes(newer);
                parked.attempt = parked.attempt.max(batch.attempt);
            }
            None => self.carry_over.push(batch),
        }
    }
}

/// Merge `older` writes beneath the patches already in `newer`.
fn merge_under(older: Vec<PendingWrite>, newer: &mut IndexMap<ObjectId, ObjectPatch>) {
    for PendingWrite { object_id, fields } in older {
        match newer.get_mut(&object_id) {
            Some(patch) => {
                let mut merged = fields;
                merged.merge(std::mem::take(patch));
                *patch = merged;
            }
            None => {
                newer.insert(object_id, fields);
            }
        }
    }
}

fn into_writes(pending: IndexMap<ObjectId, ObjectPatch>) -> Vec<PendingWrite> {
    pending
        .into_iter()
        .map(|(object_id, fields)| PendingWrite { object_id, fields })
        .collect()
}
