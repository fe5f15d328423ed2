//! Monotonic degradation ladder.
//!
//! ```text
//!   none ──step_down──> rung 0 ──step_down──> rung 1 ── ... ──> rung N-1
//!                                                                  │
//!                                                       step_down: None (terminal)
//! ```
//!
//! The active index only moves toward the cheapest rung. Returning to full
//! quality requires an explicit [`DegradationLadder::reset`].

use genloop_core::{GenResult, Resolution, validate_ladder};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// One fallback configuration and its position in the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationRung {
    pub index: usize,
    pub resolution: Resolution,
}

impl DegradationRung {
    /// Display name, e.g. `"rung1:768x1024"`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("rung{}:{}", self.index, self.resolution)
    }
}

/// Ordered fallback resolutions with an active-rung cursor.
///
/// Not internally synchronized; share across workers only behind a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationLadder {
    full: Resolution,
    rungs: Vec<Resolution>,
    active: Option<usize>,
}

impl DegradationLadder {
    /// Build a ladder below the full-quality resolution.
    ///
    /// # Errors
    ///
    /// Returns `GenError::InvalidConfig` if any rung is empty or not strictly
    /// cheaper than the one above it.
    pub fn new(full: Resolution, rungs: Vec<Resolution>) -> GenResult<Self> {
        validate_ladder(full, &rungs)?;
        Ok(Self {
            full,
            rungs,
            active: None,
        })
    }

    /// Active rung index; `None` means no degradation.
    #[must_use]
    pub const fn current_rung(&self) -> Option<usize> {
        self.active
    }

    /// Active rung index with `-1` as the "none" sentinel, for logs.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn level(&self) -> i64 {
        self.active.map_or(-1, |idx| idx as i64)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next_index().is_none()
    }

    /// Resolution the next attempt should use.
    #[must_use]
    pub fn current_resolution(&self) -> Resolution {
        self.active.map_or(self.full, |idx| self.rungs[idx])
    }

    #[must_use]
    pub const fn full_resolution(&self) -> Resolution {
        self.full
    }

    /// Advance one rung. Returns `None`, leaving the index unchanged, when
    /// the cheapest rung is already active.
    pub fn step_down(&mut self) -> Option<DegradationRung> {
        let Some(next) = self.next_index() else {
            error!(
                rung = self.level(),
                rungs = self.rungs.len(),
                "lowest fallback resolution reached; no further degradation possible"
            );
            return None;
        };
        self.active = Some(next);
        let rung = DegradationRung {
            index: next,
            resolution: self.rungs[next],
        };
        warn!(
            rung = next,
            resolution = %rung.resolution,
            "fallback resolution applied"
        );
        Some(rung)
    }

    /// Restore full quality.
    pub fn reset(&mut self) {
        self.active = None;
    }

    fn next_index(&self) -> Option<usize> {
        let next = self.active.map_or(0, |idx| idx + 1);
        (next < self.rungs.len()).then_some(next)
    }
}
