//! Persistence boundary: where batched writes go and snapshots come from.
//!
//! DESIGN
//! ======
//! The session never talks to a database or a socket directly. It holds an
//! `Arc<dyn PersistenceBoundary>` and calls `apply` with one batch of sparse
//! patches per board, and `subscribe` once per board to receive a stream of
//! [`SnapshotEvent`]s. Dropping the [`Subscription`] unsubscribes.
//!
//! [`MemoryBackend`] is the in-process implementation used by tests and the
//! CLI.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{BoardId, ObjectId, ObjectPatch};
use crate::reconcile::RemoteChange;

pub use memory::MemoryBackend;

// =============================================================================
// TYPES
// =============================================================================

/// One object's accumulated patch, as sent to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub object_id: ObjectId,
    pub fields: ObjectPatch,
}

/// A delivery from a board subscription.
///
/// The initial delivery carries the full document set in `objects`; later
/// deliveries carry only `changes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    #[serde(default)]
    pub objects: Vec<serde_json::Value>,
    #[serde(default)]
    pub changes: Vec<RemoteChange>,
    #[serde(default)]
    pub is_initial: bool,
}

/// Live stream of snapshot events for one board.
#[derive(Debug)]
pub struct Subscription {
    pub board_id: BoardId,
    rx: mpsc::Receiver<SnapshotEvent>,
}

impl Subscription {
    #[must_use]
    pub fn new(board_id: BoardId, rx: mpsc::Receiver<SnapshotEvent>) -> Self {
        Self { board_id, rx }
    }

    /// Next event, or `None` once the backend closed the stream.
    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("persistence backend unavailable")]
    Unavailable,
    #[error("write to board {board_id} rejected: {reason}")]
    Rejected { board_id: BoardId, reason: String },
    #[error("subscription closed")]
    SubscriptionClosed,
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistError {
    /// Stable code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable => "E_UNAVAILABLE",
            Self::Rejected { .. } => "E_REJECTED",
            Self::SubscriptionClosed => "E_SUBSCRIPTION_CLOSED",
            Self::Encode(_) => "E_ENCODE",
        }
    }
}

// =============================================================================
// BOUNDARY
// =============================================================================

#[async_trait]
pub trait PersistenceBoundary: Send + Sync {
    /// Persist one batch of patches for `board_id`.
    async fn apply(&self, board_id: &str, writes: &[PendingWrite]) -> Result<(), PersistError>;

    /// Open a snapshot stream for `board_id`.
    async fn subscribe(&self, board_id: &str) -> Result<Subscription, PersistError>;
}
