//! Session worker: one task owns the [`BoardSession`]; everyone else talks to
//! it through a cloneable [`SessionHandle`].
//!
//! DESIGN
//! ======
//! The worker loop selects over four sources, in priority order:
//! 1. completions of batch sends it spawned earlier,
//! 2. snapshot events from the active board's subscription,
//! 3. the write queue's next deadline (debounce or retry),
//! 4. commands from handles.
//!
//! Batch sends run in a [`JoinSet`], so the loop never waits on the
//! persistence layer while edits are arriving.
//!
//! ERROR HANDLING
//! ==============
//! Send failures go back into the write queue for retry. A send task that
//! panics counts as a failed send. A failed subscribe leaves the board
//! local-only and is logged. Writes still unsent when the worker stops are
//! reported with `warn!`. Handle calls made after the worker has stopped
//! return [`SessionError::WorkerStopped`].

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::geometry::Bounds;
use crate::model::{BoardId, BoardObject, ObjectId, ObjectPatch};
use crate::persistence::{PersistError, PersistenceBoundary, SnapshotEvent, Subscription};
use crate::reconcile::ObjectMap;
use crate::session::BoardSession;
use crate::write_queue::{QueueStats, WriteBatch};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session worker stopped")]
    WorkerStopped,
}

/// Mailbox message for the session worker.
#[derive(Debug)]
pub enum SessionCommand {
    SetBoard { board_id: Option<BoardId>, reply: oneshot::Sender<()> },
    QueueObjectUpdate { id: ObjectId, patch: ObjectPatch, reply: oneshot::Sender<bool> },
    InsertLocal { object: BoardObject },
    SetDragging { ids: Vec<ObjectId> },
    ClearDragging,
    Get { id: ObjectId, reply: oneshot::Sender<Option<BoardObject>> },
    Objects { reply: oneshot::Sender<Arc<ObjectMap>> },
    VisibleIds { rect: Bounds, reply: oneshot::Sender<Vec<ObjectId>> },
    Stats { reply: oneshot::Sender<QueueStats> },
    Flush { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

type Joined = Result<(task::Id, Result<(), PersistError>), JoinError>;

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| SessionError::WorkerStopped)
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::WorkerStopped)
    }

    /// Switch boards and subscribe to the new one.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn set_board(&self, board_id: Option<BoardId>) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetBoard { board_id, reply })
            .await
    }

    /// Apply a local edit and queue it. Resolves to whether it was queued.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn queue_object_update(&self, id: impl Into<ObjectId>, patch: ObjectPatch) -> Result<bool, SessionError> {
        let id = id.into();
        self.request(|reply| SessionCommand::QueueObjectUpdate { id, patch, reply })
            .await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn insert_local(&self, object: BoardObject) -> Result<(), SessionError> {
        self.send(SessionCommand::InsertLocal { object }).await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn set_dragging(&self, ids: Vec<ObjectId>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetDragging { ids }).await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn clear_dragging(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ClearDragging).await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn get(&self, id: impl Into<ObjectId>) -> Result<Option<BoardObject>, SessionError> {
        let id = id.into();
        self.request(|reply| SessionCommand::Get { id, reply })
            .await
    }

    /// Shared handle to the current object map.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn objects(&self) -> Result<Arc<ObjectMap>, SessionError> {
        self.request(|reply| SessionCommand::Objects { reply })
            .await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn visible_ids(&self, rect: Bounds) -> Result<Vec<ObjectId>, SessionError> {
        self.request(|reply| SessionCommand::VisibleIds { rect, reply })
            .await
    }

    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn stats(&self) -> Result<QueueStats, SessionError> {
        self.request(|reply| SessionCommand::Stats { reply })
            .await
    }

    /// Send pending writes now instead of waiting for the debounce.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker has exited.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Flush { reply })
            .await
    }

    /// Flush, wait for in-flight sends, and stop the worker.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerStopped`] if the worker had already exited.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Move `session` into a new task and return a handle to it.
#[must_use]
pub fn spawn_session_worker(
    session: BoardSession,
    backend: Option<Arc<dyn PersistenceBoundary>>,
    config: &SyncConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.command_queue_capacity.max(1));
    info!(
        command_queue_capacity = config.command_queue_capacity,
        debounce_ms = u64::try_from(config.write_debounce.as_millis()).unwrap_or(u64::MAX),
        retry_ms = u64::try_from(config.write_retry.as_millis()).unwrap_or(u64::MAX),
        has_backend = backend.is_some(),
        "session worker starting"
    );
    tokio::spawn(run_worker(session, backend, rx));
    SessionHandle { tx }
}

struct Worker {
    session: BoardSession,
    backend: Option<Arc<dyn PersistenceBoundary>>,
    subscription: Option<Subscription>,
    sends: JoinSet<Result<(), PersistError>>,
    /// Batch behind each running send, so a panicked send can be requeued.
    sending: HashMap<task::Id, WriteBatch>,
}

async fn run_worker(
    session: BoardSession,
    backend: Option<Arc<dyn PersistenceBoundary>>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    let mut worker = Worker {
        session,
        backend,
        subscription: None,
        sends: JoinSet::new(),
        sending: HashMap::new(),
    };
    let mut stop_reply: Option<oneshot::Sender<()>> = None;

    loop {
        let deadline = worker.session.next_deadline();
        tokio::select! {
            biased;

            Some(joined) = worker.sends.join_next_with_id() => {
                worker.finish(joined);
            }
            event = next_event(&mut worker.subscription) => {
                match event {
                    Some(event) => {
                        worker.session.apply_snapshot(&event);
                    }
                    None => {
                        warn!(board_id = ?worker.session.board_id(), "snapshot subscription closed");
                        worker.subscription = None;
                    }
                }
            }
            () = sleep_until(deadline) => {
                let batches = worker.session.due_batches();
                worker.dispatch(batches);
            }
            maybe_cmd = commands.recv() => {
                let Some(cmd) = maybe_cmd else {
                    break;
                };
                if let Some(reply) = worker.handle(cmd).await {
                    stop_reply = Some(reply);
                    break;
                }
            }
        }
    }

    // PHASE: DRAIN
    // Send everything sendable, carry-overs included, and keep going as
    // sends complete. The first failure ends the drain.
    let batches = worker.session.drain_batches();
    worker.dispatch(batches);
    let mut failed = false;
    while let Some(joined) = worker.sends.join_next_with_id().await {
        failed |= !worker.finish(joined);
        if !failed {
            let batches = worker.session.drain_batches();
            worker.dispatch(batches);
        }
    }
    let stats = worker.session.stats();
    info!(
        batches_sent = stats.batches_sent,
        batches_failed = stats.batches_failed,
        objects_persisted = stats.objects_persisted,
        "session worker stopped"
    );
    let unsent = worker.session.queue().unsent_count();
    if unsent > 0 {
        warn!(unsent, board_id = ?worker.session.board_id(), "session worker stopped with unsent writes");
    }
    if let Some(reply) = stop_reply {
        if reply.send(()).is_err() {
            debug!("shutdown caller went away");
        }
    }
}

impl Worker {
    /// Handle one command. Returns the reply channel when the command asks
    /// the worker to stop.
    async fn handle(&mut self, cmd: SessionCommand) -> Option<oneshot::Sender<()>> {
        match cmd {
            SessionCommand::SetBoard { board_id, reply } => {
                self.switch_board(board_id).await;
                respond(reply, ());
            }
            SessionCommand::QueueObjectUpdate { id, patch, reply } => {
                respond(reply, self.session.queue_object_update(&id, patch));
            }
            SessionCommand::InsertLocal { object } => self.session.insert_local(object),
            SessionCommand::SetDragging { ids } => self.session.set_dragging(ids),
            SessionCommand::ClearDragging => self.session.clear_dragging(),
            SessionCommand::Get { id, reply } => {
                respond(reply, self.session.store().get(&id).cloned());
            }
            SessionCommand::Objects { reply } => {
                respond(reply, Arc::clone(self.session.store().objects()));
            }
            SessionCommand::VisibleIds { rect, reply } => {
                respond(reply, self.session.visible_ids(&rect));
            }
            SessionCommand::Stats { reply } => respond(reply, self.session.stats()),
            SessionCommand::Flush { reply } => {
                let batch = self.session.flush();
                self.dispatch(batch);
                respond(reply, ());
            }
            SessionCommand::Shutdown { reply } => return Some(reply),
        }
        None
    }

    async fn switch_board(&mut self, board_id: Option<BoardId>) {
        if self.session.board_id() == board_id.as_deref() {
            return;
        }
        let leftover = self.session.set_board(board_id.clone());
        self.dispatch(leftover);
        self.subscription = None;

        let (Some(board_id), Some(backend)) = (board_id, self.backend.as_ref()) else {
            return;
        };
        match backend.subscribe(&board_id).await {
            Ok(sub) => {
                info!(%board_id, "subscribed to board");
                self.subscription = Some(sub);
                self.session.mark_persistence_ready();
            }
            Err(e) => {
                warn!(%board_id, error = %e, code = e.error_code(), "subscribe failed; board stays local-only");
            }
        }
    }

    /// Start sending each batch on its own task.
    fn dispatch(&mut self, batches: impl IntoIterator<Item = WriteBatch>) {
        for batch in batches {
            let Some(backend) = self.backend.clone() else {
                warn!(board_id = %batch.board_id, count = batch.len(), "no persistence backend; batch kept for retry");
                self.session.complete(batch, Err(PersistError::Unavailable));
                continue;
            };
            debug!(board_id = %batch.board_id, count = batch.len(), attempt = batch.attempt, "flushing write batch");
            let board_id = batch.board_id.clone();
            let writes = batch.writes.clone();
            let handle = self
                .sends
                .spawn(async move { backend.apply(&board_id, &writes).await });
            self.sending.insert(handle.id(), batch);
        }
    }

    /// Hand a finished send back to the queue. Returns whether it succeeded.
    fn finish(&mut self, joined: Joined) -> bool {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                warn!(error = %e, "write batch send task died");
                (e.id(), Err(PersistError::Unavailable))
            }
        };
        let Some(batch) = self.sending.remove(&id) else {
            debug!(%id, "completion for untracked send ignored");
            return false;
        };
        let ok = result.is_ok();
        self.session.complete(batch, result);
        ok
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<SnapshotEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("caller dropped before reply");
    }
}
