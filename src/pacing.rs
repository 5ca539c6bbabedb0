//! Timing gates for device traffic
//!
//! The LPD8 silently drops configuration writes that arrive too close to the
//! previous one. [`WritePacer`] blocks the caller until the minimum interval
//! has elapsed; [`PollTimer`] decides when the next active-program query is
//! due. Both use the monotonic clock.

use std::thread;
use std::time::{Duration, Instant};

/// Minimum spacing the hardware needs between configuration writes
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(300);

/// Default interval between active-program queries
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Enforces a minimum interval between configuration writes
#[derive(Debug, Clone)]
pub struct WritePacer {
    interval: Duration,
    last_write: Option<Instant>,
}

impl WritePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
        }
    }

    /// Time left before the next write may be sent
    pub fn remaining(&self) -> Duration {
        match self.last_write {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Block until a write may be sent
    pub fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }

    /// Record that a write was just sent
    pub fn mark(&mut self) {
        self.last_write = Some(Instant::now());
    }
}

/// Fire-and-forget poll schedule
#[derive(Debug, Clone, Default)]
pub struct PollTimer {
    last_poll: Option<Instant>,
}

impl PollTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `interval` has passed since the last poll (always true before
    /// the first one)
    pub fn is_due(&self, interval: Duration) -> bool {
        self.last_poll.map_or(true, |last| last.elapsed() >= interval)
    }

    pub fn mark(&mut self) {
        self.last_poll = Some(Instant::now());
    }
}
