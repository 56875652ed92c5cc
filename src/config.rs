//! Sync tuning knobs, loaded from environment variables.
//!
//! Missing or unparseable values fall back to the defaults in
//! [`crate::consts`].

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

use crate::consts::{DEFAULT_CELL_SIZE, DEFAULT_COMMAND_QUEUE_CAPACITY, DEFAULT_WRITE_DEBOUNCE_MS, DEFAULT_WRITE_RETRY_MS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Wait between the first queued edit and the batch send.
    pub write_debounce: Duration,
    /// Wait before retrying a failed batch.
    pub write_retry: Duration,
    /// Spatial grid cell edge length in world units.
    pub cell_size: f64,
    /// Worker mailbox capacity.
    pub command_queue_capacity: usize,
}

impl SyncConfig {
    /// Build config from environment variables.
    ///
    /// - `BOARDSYNC_WRITE_DEBOUNCE_MS` (default 500)
    /// - `BOARDSYNC_WRITE_RETRY_MS` (default 1000)
    /// - `BOARDSYNC_SPATIAL_CELL_SIZE` (default 256)
    /// - `BOARDSYNC_COMMAND_QUEUE_CAPACITY` (default 1024)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            write_debounce: Duration::from_millis(env_parse("BOARDSYNC_WRITE_DEBOUNCE_MS", DEFAULT_WRITE_DEBOUNCE_MS)),
            write_retry: Duration::from_millis(env_parse("BOARDSYNC_WRITE_RETRY_MS", DEFAULT_WRITE_RETRY_MS)),
            cell_size: env_parse("BOARDSYNC_SPATIAL_CELL_SIZE", DEFAULT_CELL_SIZE),
            command_queue_capacity: env_parse("BOARDSYNC_COMMAND_QUEUE_CAPACITY", DEFAULT_COMMAND_QUEUE_CAPACITY)
                .max(1),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_debounce: Duration::from_millis(DEFAULT_WRITE_DEBOUNCE_MS),
            write_retry: Duration::from_millis(DEFAULT_WRITE_RETRY_MS),
            cell_size: DEFAULT_CELL_SIZE,
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
