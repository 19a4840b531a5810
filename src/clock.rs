//! Wall-clock and replay-time bookkeeping.
//!
//! [`MonotonicClock`] measures real elapsed time between scheduler ticks. It is
//! backed by [`tokio::time::Instant`], which is monotonic (immune to system
//! clock adjustment) and honours tokio's paused test clock, so timing tests
//! run deterministically.
//!
//! [`VirtualClock`] is the simulated replay timeline, advanced by
//! `elapsed × speed` on each tick.

use std::time::Duration;
use tokio::time::Instant;

/// Measures elapsed wall time between successive laps.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    last: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self { last: Instant::now() }
    }

    /// Time since the previous lap (or since construction), restarting the lap.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        elapsed
    }

    /// Time since the previous lap without restarting it.
    pub fn peek(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last)
    }

    /// Restart the lap at the current instant, discarding elapsed time.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

/// Simulated replay time in log timestamp units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualClock {
    position: f64,
}

impl VirtualClock {
    /// Create a clock positioned at `position`.
    pub fn starting_at(position: f64) -> Self {
        Self { position }
    }

    /// Current replay position.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Advance by real `elapsed` time scaled by `speed`.
    pub fn advance(&mut self, elapsed: Duration, speed: f64) {
        self.position += elapsed.as_secs_f64() * speed;
    }

    /// Jump to an absolute replay position.
    pub fn set(&mut self, position: f64) {
        self.position = position;
    }
}
