//! Shared numeric constants for the sync core.

// ── Geometry ────────────────────────────────────────────────────

/// Minimum width/height, in world units, of a point-list object's bounds.
pub const MIN_POINT_EXTENT: f64 = 2.0;

// ── Spatial index ───────────────────────────────────────────────

/// Default grid cell edge length in world units.
pub const DEFAULT_CELL_SIZE: f64 = 256.0;

/// Entries covering more cells than this live in the overflow list instead.
pub const MAX_CELLS_PER_ENTRY: i64 = 1024;

// ── Write queue ─────────────────────────────────────────────────

/// Debounce between the first queued edit and the batch send.
pub const DEFAULT_WRITE_DEBOUNCE_MS: u64 = 500;

/// Delay before a failed batch is retried.
pub const DEFAULT_WRITE_RETRY_MS: u64 = 1000;

// ── Worker ──────────────────────────────────────────────────────

/// Bounded mailbox capacity for the session worker.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 1024;
