//! Stale bridge detection.
//!
//! The emulator side stamps every snapshot with a frame counter that only
//! moves forward. If the agent keeps seeing the same frame for longer than
//! a threshold, the emulator loop has stopped (paused, crashed, or the
//! script was unloaded).

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// One sighting of a frame counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub frame: u64,
    pub at: Instant,
}

impl Observation {
    pub fn new(frame: u64, at: Instant) -> Self {
        Self { frame, at }
    }
}

/// True when two sightings show the same frame at least `threshold` apart.
pub fn is_stale(first: Observation, second: Observation, threshold: Duration) -> bool {
    first.frame == second.frame && second.at.saturating_duration_since(first.at) >= threshold
}

/// Result of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing observed yet
    Waiting,
    /// The frame moved since the previous observation
    Advancing,
    /// Same frame as before, but not for long enough to worry
    Holding { frame: u64, elapsed: Duration },
    /// Same frame for at least the threshold
    Stalled { frame: u64, elapsed: Duration },
}

impl Freshness {
    pub fn is_stalled(&self) -> bool {
        matches!(self, Freshness::Stalled { .. })
    }
}

/// Tracks when the frame counter last moved
#[derive(Debug, Clone)]
pub struct StaleDetector {
    threshold: Duration,
    last_change: Option<Observation>,
    warned: bool,
}

impl StaleDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_change: None,
            warned: false,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record a sighting of `frame` at `at`.
    pub fn observe(&mut self, frame: u64, at: Instant) -> Freshness {
        let current = Observation::new(frame, at);
        let Some(since) = self.last_change else {
            self.last_change = Some(current);
            return Freshness::Waiting;
        };

        if since.frame != frame {
            if self.warned {
                info!(frame, "bridge advancing again");
                self.warned = false;
            }
            self.last_change = Some(current);
            return Freshness::Advancing;
        }

        let elapsed = at.saturating_duration_since(since.at);
        if is_stale(since, current, self.threshold) {
            if !self.warned {
                warn!(frame, stalled_ms = elapsed.as_millis() as u64, "bridge looks stale");
                self.warned = true;
            }
            Freshness::Stalled { frame, elapsed }
        } else {
            Freshness::Holding { frame, elapsed }
        }
    }

    pub fn observe_now(&mut self, frame: u64) -> Freshness {
        self.observe(frame, Instant::now())
    }

    /// Forget history, e.g. after a reset.
    pub fn reset(&mut self) {
        self.last_change = None;
        self.warned = false;
    }
}
