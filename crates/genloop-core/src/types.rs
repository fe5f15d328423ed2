//! Value types shared by the guard and sampler crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Output resolution handed to a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, used to order rungs from most to least expensive.
    #[must_use]
    pub const fn pixels(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable snapshot of constrained-resource usage.
///
/// `allocated` and `total` share a unit (bytes for device memory). A reading
/// with `total == 0` means the resource is unconstrained or could not be
/// queried, and reports 0% utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReading {
    pub allocated: u64,
    pub total: u64,
}

impl ResourceReading {
    #[must_use]
    pub const fn new(allocated: u64, total: u64) -> Self {
        Self { allocated, total }
    }

    /// Reading substituted when no device is present.
    #[must_use]
    pub const fn unconstrained() -> Self {
        Self {
            allocated: 0,
            total: 0,
        }
    }

    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.total == 0
    }

    /// `allocated / total`, or 0.0 when unconstrained.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.allocated as f64 / self.total as f64
    }

    #[must_use]
    pub fn utilization_pct(&self) -> f64 {
        self.utilization_fraction() * 100.0
    }

    /// Strictly-greater comparison against a percentage threshold.
    #[must_use]
    pub fn is_over_threshold(&self, threshold_pct: f64) -> bool {
        self.utilization_pct() > threshold_pct
    }
}
