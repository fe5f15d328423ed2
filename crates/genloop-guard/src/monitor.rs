//! Device-memory monitoring and forced cleanup.
//!
//! [`ResourceMonitor`] turns a [`DeviceMemory`] query into a
//! [`ResourceReading`] and owns the cleanup cycle: a fixed number of
//! cache-release passes, each followed by a short pause, then one longer
//! settle pause. Sampling fails soft: a missing or failing device yields an
//! unconstrained (0%) reading.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use genloop_core::tracing_config::span_names;
use genloop_core::{GenError, GenResult, MemoryConfig, ResourceReading};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::pause::Pause;

// ─── Device Seam ────────────────────────────────────────────────────────────

/// Memory introspection for the constrained device.
///
/// Host applications implement this over their accelerator runtime. The
/// monitor never interprets errors from `usage`; any failure means
/// "unconstrained".
pub trait DeviceMemory: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// `(allocated_bytes, total_bytes)` for the device.
    ///
    /// # Errors
    ///
    /// Returns `GenError::DeviceUnavailable` when no device can be queried.
    fn usage(&self) -> GenResult<(u64, u64)>;

    /// Release cached allocations. Called once per cleanup pass.
    fn release_cached(&self) {}
}

/// Placeholder for hosts without an accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevice;

impl DeviceMemory for NoDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn usage(&self) -> GenResult<(u64, u64)> {
        Err(GenError::DeviceUnavailable {
            reason: "no accelerator configured".into(),
        })
    }
}

/// System RAM as the constrained resource, for CPU-only generation hosts.
pub struct HostMemory {
    system: Mutex<System>,
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory").finish_non_exhaustive()
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemory {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl DeviceMemory for HostMemory {
    fn name(&self) -> &str {
        "host"
    }

    fn usage(&self) -> GenResult<(u64, u64)> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| GenError::DeviceUnavailable {
                reason: "host memory sampler poisoned".into(),
            })?;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(GenError::DeviceUnavailable {
                reason: "host reported zero total memory".into(),
            });
        }
        Ok((system.used_memory(), total))
    }
}

/// Device with a settable reading. Counts cache releases.
#[derive(Debug, Default)]
pub struct FixedDevice {
    allocated: AtomicU64,
    total: AtomicU64,
    releases: AtomicU64,
}

impl FixedDevice {
    #[must_use]
    pub const fn new(allocated: u64, total: u64) -> Self {
        Self {
            allocated: AtomicU64::new(allocated),
            total: AtomicU64::new(total),
            releases: AtomicU64::new(0),
        }
    }

    pub fn set(&self, allocated: u64, total: u64) {
        self.allocated.store(allocated, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    #[must_use]
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

impl DeviceMemory for FixedDevice {
    fn name(&self) -> &str {
        "fixed"
    }

    fn usage(&self) -> GenResult<(u64, u64)> {
        Ok((
            self.allocated.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        ))
    }

    fn release_cached(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Monitor ────────────────────────────────────────────────────────────────

/// Result of a pre-flight memory check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryCheck {
    pub reading: ResourceReading,
    pub over_threshold: bool,
    pub cleaned: bool,
}

/// Samples device memory and performs forced cleanups.
pub struct ResourceMonitor {
    config: MemoryConfig,
    device: Arc<dyn DeviceMemory>,
    pause: Arc<dyn Pause>,
    cleanups: AtomicU64,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("device", &self.device.name())
            .field("threshold_percent", &self.config.threshold_percent)
            .field("cleanups", &self.cleanup_count())
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    /// Build a monitor over `device`.
    ///
    /// # Errors
    ///
    /// Returns `GenError::InvalidConfig` if `config` fails validation.
    pub fn new(
        config: MemoryConfig,
        device: Arc<dyn DeviceMemory>,
        pause: Arc<dyn Pause>,
    ) -> GenResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            pause,
            cleanups: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub fn pause_handle(&self) -> &Arc<dyn Pause> {
        &self.pause
    }

    /// Current reading; unconstrained when disabled or the query fails.
    #[must_use]
    pub fn sample(&self) -> ResourceReading {
        if !self.config.enabled {
            return ResourceReading::unconstrained();
        }
        match self.device.usage() {
            Ok((allocated, total)) => ResourceReading::new(allocated, total),
            Err(error) => {
                debug!(device = self.device.name(), %error, "device memory query unavailable");
                ResourceReading::unconstrained()
            }
        }
    }

    #[must_use]
    pub fn is_over_threshold(&self, reading: &ResourceReading) -> bool {
        reading.is_over_threshold(self.config.threshold_percent)
    }

    /// Sample, log, and clean when forced or over threshold.
    pub fn check(&self, force_cleanup: bool) -> MemoryCheck {
        if !self.config.enabled {
            return MemoryCheck {
                reading: ResourceReading::unconstrained(),
                over_threshold: false,
                cleaned: false,
            };
        }

        let reading = self.sample();
        let over_threshold = self.is_over_threshold(&reading);
        #[allow(clippy::cast_precision_loss)]
        let gib = |bytes: u64| bytes as f64 / f64::from(1_u32 << 30);
        info!(
            device = self.device.name(),
            allocated_gib = gib(reading.allocated),
            total_gib = gib(reading.total),
            utilization_pct = reading.utilization_pct(),
            "device memory sampled"
        );

        if over_threshold {
            warn!(
                utilization_pct = reading.utilization_pct(),
                threshold_percent = self.config.threshold_percent,
                "device memory above threshold"
            );
        }

        let cleaned = force_cleanup || over_threshold;
        if cleaned {
            self.force_cleanup();
        }

        MemoryCheck {
            reading,
            over_threshold,
            cleaned,
        }
    }

    /// Release cached memory in several passes, then wait for the device to settle.
    ///
    /// Idempotent; calling it with nothing to free only costs time. Runs
    /// whether or not monitoring is enabled.
    pub fn force_cleanup(&self) {
        let span = tracing::debug_span!(span_names::CLEANUP, passes = self.config.cleanup_passes);
        let _enter = span.enter();

        for pass in 1..=self.config.cleanup_passes {
            self.device.release_cached();
            debug!(pass, passes = self.config.cleanup_passes, "cache release pass");
            self.pause.pause(self.config.cleanup_pause());
        }
        self.pause.pause(self.config.settle_pause());

        let total = self.cleanups.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(cleanups = total, "forced cleanup complete");
    }

    /// Completed `force_cleanup` calls.
    #[must_use]
    pub fn cleanup_count(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pause::RecordingPause;

    fn monitor_with(
        config: MemoryConfig,
        device: Arc<dyn DeviceMemory>,
    ) -> (ResourceMonitor, Arc<RecordingPause>) {
        let pause = Arc::new(RecordingPause::new());
        let monitor = ResourceMonitor::new(config, device, pause.clone()).expect("valid config");
        (monitor, pause)
    }

    #[test]
    fn missing_device_reads_unconstrained() {
        let (monitor, _) = monitor_with(MemoryConfig::default(), Arc::new(NoDevice));
        let reading = monitor.sample();
        assert!(reading.is_unconstrained());
        assert!(!monitor.is_over_threshold(&reading));
    }

    #[test]
    fn disabled_monitor_skips_checks_but_still_force_cleans() {
        let device = Arc::new(FixedDevice::new(95, 100));
        let config = MemoryConfig {
            enabled: false,
            ..MemoryConfig::default()
        };
        let (monitor, pause) = monitor_with(config, device.clone());
        let check = monitor.check(true);
        assert!(!check.cleaned);
        assert!(check.reading.is_unconstrained());
        assert_eq!(device.releases(), 0);
        assert!(pause.requested().is_empty());

        monitor.force_cleanup();
        assert_eq!(monitor.cleanup_count(), 1);
        assert_eq!(device.releases(), 3);
    }

    #[test]
    fn force_cleanup_runs_passes_then_settles() {
        let device = Arc::new(FixedDevice::new(10, 100));
        let (monitor, pause) = monitor_with(MemoryConfig::default(), device.clone());
        monitor.force_cleanup();

        assert_eq!(device.releases(), 3);
        assert_eq!(
            pause.requested(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(10),
            ]
        );
        assert_eq!(monitor.cleanup_count(), 1);
    }

    #[test]
    fn force_cleanup_is_repeatable() {
        let device = Arc::new(FixedDevice::new(0, 100));
        let (monitor, _) = monitor_with(MemoryConfig::default(), device.clone());
        monitor.force_cleanup();
        monitor.force_cleanup();
        assert_eq!(monitor.cleanup_count(), 2);
        assert_eq!(device.releases(), 6);
    }

    #[test]
    fn check_cleans_only_when_forced_or_over_threshold() {
        let device = Arc::new(FixedDevice::new(50, 100));
        let (monitor, _) = monitor_with(MemoryConfig::default(), device.clone());

        let calm = monitor.check(false);
        assert!(!calm.over_threshold);
        assert!(!calm.cleaned);

        let forced = monitor.check(true);
        assert!(forced.cleaned);

        device.set(80, 100);
        let hot = monitor.check(false);
        assert!(hot.over_threshold);
        assert!(hot.cleaned);
        assert_eq!(monitor.cleanup_count(), 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = MemoryConfig {
            threshold_percent: 0.0,
            ..MemoryConfig::default()
        };
        let result = ResourceMonitor::new(
            config,
            Arc::new(NoDevice),
            Arc::new(RecordingPause::new()),
        );
        assert!(matches!(result, Err(GenError::InvalidConfig { .. })));
    }

    #[test]
    fn host_memory_reports_a_plausible_reading() {
        let host = HostMemory::new();
        if let Ok((used, total)) = host.usage() {
            assert!(total > 0);
            assert!(used <= total);
        }
    }
}
