//! Resource-guarded retry controller.
//!
//! # State Machine
//!
//! ```text
//!   Idle ──(safe_mode: force cleanup)──> PreCheck ──> Executing
//!   Executing ──Ok──> Success (post-run cleanup, return value)
//!   Executing ──ResourceExhausted──> cleanup ─┬─(attempt < max)──> step down, cool down ──> PreCheck
//!                                             └─(attempt = max)──> GiveUp (RetryExhausted)
//!   Executing ──any other error──> propagate unchanged (no retry)
//! ```
//!
//! PreCheck cleans when the device is over threshold but never degrades; the
//! ladder only moves on a resource-exhausted attempt.
//!
//! Attempts of one run are strictly sequential. Independent runs share
//! nothing except what the caller shares; a controller is `&mut` for the
//! duration of a run, so its ladder is never mutated concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use genloop_core::tracing_config::span_names;
use genloop_core::{GenError, GenResult, GenloopConfig, Resolution};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::ladder::DegradationLadder;
use crate::monitor::{DeviceMemory, ResourceMonitor};
use crate::pause::Pause;

// ─── Telemetry ──────────────────────────────────────────────────────────────

/// Classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ResourceExhausted,
    OtherError,
}

/// Transient record of one attempt, for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub number: u32,
    pub outcome: AttemptOutcome,
    pub resolution: Resolution,
    pub elapsed: Duration,
}

/// Summary of one controller run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub operation: String,
    pub max_retries: u32,
    pub attempts: Vec<RetryAttempt>,
    pub elapsed: Duration,
    /// Resolution active when the run ended.
    pub final_resolution: Resolution,
}

impl RunReport {
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.attempts
            .last()
            .is_some_and(|attempt| attempt.outcome == AttemptOutcome::Success)
    }
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// Runs a unit of work under memory guard, degrading and retrying on exhaustion.
#[derive(Debug)]
pub struct RetryController {
    monitor: ResourceMonitor,
    ladder: DegradationLadder,
}

impl RetryController {
    #[must_use]
    pub const fn new(monitor: ResourceMonitor, ladder: DegradationLadder) -> Self {
        Self { monitor, ladder }
    }

    /// Assemble a controller from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `GenError::InvalidConfig` if the memory section or the
    /// fallback ladder is invalid.
    pub fn from_config(
        config: &GenloopConfig,
        device: Arc<dyn DeviceMemory>,
        pause: Arc<dyn Pause>,
    ) -> GenResult<Self> {
        let monitor = ResourceMonitor::new(config.memory.clone(), device, pause)?;
        let ladder = DegradationLadder::new(
            config.generation.resolution(),
            config.fallback_resolutions.clone(),
        )?;
        Ok(Self::new(monitor, ladder))
    }

    #[must_use]
    pub const fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    #[must_use]
    pub const fn ladder(&self) -> &DegradationLadder {
        &self.ladder
    }

    /// Resolution the next attempt will receive.
    #[must_use]
    pub fn current_resolution(&self) -> Resolution {
        self.ladder.current_resolution()
    }

    /// Explicitly restore full quality; never happens automatically.
    pub fn reset_degradation(&mut self) {
        info!(
            from_rung = self.ladder.level(),
            "degradation reset to full resolution"
        );
        self.ladder.reset();
    }

    /// Run `work` with the configured retry bound.
    ///
    /// # Errors
    ///
    /// Returns `GenError::RetryExhausted` once every attempt failed with
    /// resource exhaustion, or the first non-resource error unchanged.
    pub fn run<T, F>(&mut self, operation: &str, work: F) -> GenResult<T>
    where
        F: FnMut(Resolution) -> GenResult<T>,
    {
        self.run_with_report(operation, None, work).0
    }

    /// Run `work` with an explicit retry bound.
    ///
    /// # Errors
    ///
    /// Same as [`RetryController::run`].
    pub fn run_with_retries<T, F>(
        &mut self,
        operation: &str,
        max_retries: u32,
        work: F,
    ) -> GenResult<T>
    where
        F: FnMut(Resolution) -> GenResult<T>,
    {
        self.run_with_report(operation, Some(max_retries), work).0
    }

    /// Run `work` and return the outcome together with per-attempt telemetry.
    ///
    /// `work` receives the resolution for each attempt and may be invoked up
    /// to `max_retries` times; it must tolerate re-execution after a partial
    /// failure.
    pub fn run_with_report<T, F>(
        &mut self,
        operation: &str,
        max_retries: Option<u32>,
        mut work: F,
    ) -> (GenResult<T>, RunReport)
    where
        F: FnMut(Resolution) -> GenResult<T>,
    {
        let config = self.monitor.config().clone();
        let max_retries = max_retries.unwrap_or(config.max_retries).max(1);
        let started = Instant::now();
        let span = tracing::info_span!(span_names::RUN, operation, max_retries);
        let _enter = span.enter();

        let mut report = RunReport {
            operation: operation.to_owned(),
            max_retries,
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
            final_resolution: self.ladder.current_resolution(),
        };

        if config.safe_mode {
            debug!(operation, "pre-flight safety cleanup");
            self.monitor.force_cleanup();
        }

        let mut attempt: u32 = 1;
        loop {
            self.monitor.check(false);

            let resolution = self.ladder.current_resolution();
            let attempt_started = Instant::now();
            let result = {
                let attempt_span =
                    tracing::debug_span!(span_names::ATTEMPT, attempt, resolution = %resolution);
                let _attempt_enter = attempt_span.enter();
                work(resolution)
            };
            let attempt_elapsed = attempt_started.elapsed();

            match result {
                Ok(value) => {
                    report.attempts.push(RetryAttempt {
                        number: attempt,
                        outcome: AttemptOutcome::Success,
                        resolution,
                        elapsed: attempt_elapsed,
                    });
                    self.monitor.force_cleanup();
                    self.finish(&mut report, started);
                    info!(
                        operation,
                        attempts = attempt,
                        resolution = %resolution,
                        duration_ms = duration_ms(report.elapsed),
                        "operation succeeded"
                    );
                    return (Ok(value), report);
                }
                Err(err) if err.is_resource_exhausted() => {
                    report.attempts.push(RetryAttempt {
                        number: attempt,
                        outcome: AttemptOutcome::ResourceExhausted,
                        resolution,
                        elapsed: attempt_elapsed,
                    });
                    warn!(
                        operation,
                        attempt,
                        max_retries,
                        resolution = %resolution,
                        error = %err,
                        "resource exhausted"
                    );
                    self.monitor.force_cleanup();

                    if attempt >= max_retries {
                        self.finish(&mut report, started);
                        error!(
                            operation,
                            max_retries,
                            duration_ms = duration_ms(report.elapsed),
                            "retry bound reached; giving up"
                        );
                        return (
                            Err(GenError::RetryExhausted {
                                operation: operation.to_owned(),
                                max_retries,
                            }),
                            report,
                        );
                    }

                    if config.auto_adjustment_enabled {
                        self.ladder.step_down();
                    }
                    self.monitor.pause_handle().pause(config.recovery_delay());
                    attempt += 1;
                }
                Err(err) => {
                    report.attempts.push(RetryAttempt {
                        number: attempt,
                        outcome: AttemptOutcome::OtherError,
                        resolution,
                        elapsed: attempt_elapsed,
                    });
                    self.finish(&mut report, started);
                    warn!(operation, attempt, error = %err, "operation failed; not retrying");
                    return (Err(err), report);
                }
            }
        }
    }

    fn finish(&self, report: &mut RunReport, started: Instant) {
        report.elapsed = started.elapsed();
        report.final_resolution = self.ladder.current_resolution();
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use genloop_core::MemoryConfig;

    use super::*;
    use crate::monitor::FixedDevice;
    use crate::pause::RecordingPause;

    fn controller(
        memory: MemoryConfig,
        device: Arc<FixedDevice>,
    ) -> (RetryController, Arc<RecordingPause>) {
        let pause = Arc::new(RecordingPause::new());
        let monitor = ResourceMonitor::new(memory, device, pause.clone()).expect("monitor");
        let ladder = DegradationLadder::new(
            Resolution::new(1024, 1024),
            vec![Resolution::new(896, 896), Resolution::new(768, 768)],
        )
        .expect("ladder");
        (RetryController::new(monitor, ladder), pause)
    }

    fn quiet_memory() -> MemoryConfig {
        MemoryConfig {
            safe_mode: false,
            ..MemoryConfig::default()
        }
    }

    #[test]
    fn success_on_first_attempt_cleans_once() {
        let (mut ctl, _) = controller(quiet_memory(), Arc::new(FixedDevice::new(10, 100)));
        let value = ctl.run("render", |_| Ok(42)).expect("success");
        assert_eq!(value, 42);
        assert_eq!(ctl.monitor().cleanup_count(), 1);
        assert_eq!(ctl.ladder().current_rung(), None);
    }

    #[test]
    fn safe_mode_adds_a_pre_flight_cleanup() {
        let memory = MemoryConfig {
            safe_mode: true,
            ..MemoryConfig::default()
        };
        let (mut ctl, _) = controller(memory, Arc::new(FixedDevice::new(10, 100)));
        ctl.run("render", |_| Ok(())).expect("success");
        assert_eq!(ctl.monitor().cleanup_count(), 2);
    }

    #[test]
    fn recovers_at_a_lower_resolution() {
        let (mut ctl, pause) = controller(quiet_memory(), Arc::new(FixedDevice::new(10, 100)));
        let mut seen = Vec::new();
        let (result, report) = ctl.run_with_report("render", None, |res| {
            seen.push(res);
            if res.width > 896 {
                Err(GenError::resource_exhausted("render", "CUDA out of memory"))
            } else {
                Ok(res)
            }
        });
        assert_eq!(result.expect("recovered"), Resolution::new(896, 896));
        assert_eq!(
            seen,
            vec![Resolution::new(1024, 1024), Resolution::new(896, 896)]
        );
        assert_eq!(report.attempt_count(), 2);
        assert!(report.succeeded());
        assert_eq!(report.final_resolution, Resolution::new(896, 896));
        assert!(pause.requested().contains(&Duration::from_secs(10)));
    }

    #[test]
    fn degradation_persists_across_runs() {
        let (mut ctl, _) = controller(quiet_memory(), Arc::new(FixedDevice::new(10, 100)));
        let mut first = true;
        ctl.run("a", |_| {
            if first {
                first = false;
                Err(GenError::resource_exhausted("a", "oom"))
            } else {
                Ok(())
            }
        })
        .expect("recovered");
        let used = ctl.run("b", Ok).expect("second run");
        assert_eq!(used, Resolution::new(896, 896));

        ctl.reset_degradation();
        assert_eq!(ctl.current_resolution(), Resolution::new(1024, 1024));
    }

    #[test]
    fn auto_adjust_disabled_keeps_resolution() {
        let memory = MemoryConfig {
            auto_adjustment_enabled: false,
            ..quiet_memory()
        };
        let (mut ctl, _) = controller(memory, Arc::new(FixedDevice::new(10, 100)));
        let mut seen = Vec::new();
        let result: GenResult<()> = ctl.run_with_retries("render", 3, |res| {
            seen.push(res);
            Err(GenError::resource_exhausted("render", "oom"))
        });
        assert!(matches!(result, Err(GenError::RetryExhausted { .. })));
        assert!(seen.iter().all(|res| *res == Resolution::new(1024, 1024)));
    }

    #[test]
    fn over_threshold_pre_check_cleans_without_degrading() {
        let device = Arc::new(FixedDevice::new(90, 100));
        let (mut ctl, _) = controller(quiet_memory(), device);
        for _ in 0..4 {
            let used = ctl.run("render", Ok).expect("success");
            assert_eq!(used, Resolution::new(1024, 1024));
        }
        assert_eq!(ctl.ladder().current_rung(), None);
        // pre-check cleanup + post-success cleanup per run
        assert_eq!(ctl.monitor().cleanup_count(), 8);
    }

    #[test]
    fn report_serializes_outcomes_in_snake_case() {
        let attempt = RetryAttempt {
            number: 1,
            outcome: AttemptOutcome::ResourceExhausted,
            resolution: Resolution::new(64, 64),
            elapsed: Duration::from_millis(3),
        };
        let json = serde_json::to_string(&attempt).expect("serialize");
        assert!(json.contains("\"resource_exhausted\""));
    }
}
