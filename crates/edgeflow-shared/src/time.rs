//! # Clock
//!
//! Monotonic clock used for admission deadlines. Deadlines travel on the wire
//! as absolute nanoseconds relative to a shared epoch; [`Clock`] anchors that
//! epoch. Built on `tokio::time::Instant` so paused-time tests stay
//! deterministic.

use tokio::time::Instant;

/// Monotonic clock anchored at a fixed epoch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the epoch.
    pub fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
