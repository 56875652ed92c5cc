//! Injectable time source.
//!
//! The session reads monotonic time for write-queue deadlines and wall-clock
//! time for `updated_at` stamps. Production uses [`SystemClock`], which reads
//! tokio's clock so paused-time tests drive it too; unit tests use
//! [`ManualClock`] and advance it by hand.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::Timestamp;

pub trait Clock: Send + Sync {
    /// Monotonic now, for deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock now, for `updated_at` stamps.
    fn timestamp(&self) -> Timestamp;
}

/// Real time, via tokio's clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn timestamp(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Hand-driven clock. Both readings move together on [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_millis: i64,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new(origin_millis: i64) -> Self {
        Self { origin: Instant::now(), origin_millis, elapsed: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *elapsed += by;
    }

    fn elapsed(&self) -> Duration {
        *self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn timestamp(&self) -> Timestamp {
        let elapsed_ms = i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX);
        Timestamp::from_millis(self.origin_millis.saturating_add(elapsed_ms))
    }
}
