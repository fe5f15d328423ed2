//! Blocking-pause abstraction.
//!
//! Cleanup cycles and retry cooldowns block the calling worker. Production
//! code uses [`ThreadPause`]; tests substitute [`RecordingPause`], which
//! records each requested duration and returns immediately.

use std::sync::Mutex;
use std::time::Duration;

/// Source of blocking pauses.
pub trait Pause: Send + Sync {
    /// Block the current worker for `duration`.
    fn pause(&self, duration: Duration);
}

/// Production pause backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Test pause that records requests without sleeping.
#[derive(Debug, Default)]
pub struct RecordingPause {
    requested: Mutex<Vec<Duration>>,
}

impl RecordingPause {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far, in order.
    #[must_use]
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Sum of every requested duration.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.requested().into_iter().sum()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        if let Ok(mut guard) = self.requested.lock() {
            guard.push(duration);
        }
    }
}
