//! Genre-split batch execution on top of [`RetryController`].
//!
//! A batch of `N` items is divided across genres by configured share. Each
//! genre runs its items in order through the controller and stops at the
//! first item that fails for good; later genres still run. Between genres the
//! device is cleaned and given a long cooldown.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use genloop_core::tracing_config::span_names;
use genloop_core::{BatchConfig, GenError, GenResult, Resolution};
use genloop_guard::RetryController;
use tracing::{error, info};

/// Items per genre for a batch of `batch_size`.
///
/// Each genre gets `max(1, floor(batch_size * share))`, where a genre missing
/// from `distribution` gets an equal `1 / genres.len()` share. The first genre
/// absorbs the rounding remainder so the plan sums to `batch_size` whenever
/// the shares sum to at most 1.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn plan_genre_counts(
    batch_size: usize,
    genres: &[String],
    distribution: &BTreeMap<String, f64>,
) -> Vec<(String, usize)> {
    if genres.is_empty() {
        return Vec::new();
    }
    let equal_share = 1.0 / genres.len() as f64;
    let raw: Vec<usize> = genres
        .iter()
        .map(|genre| {
            let share = distribution.get(genre).copied().unwrap_or(equal_share);
            (batch_size as f64 * share).floor().max(0.0) as usize
        })
        .collect();
    let remainder = batch_size.saturating_sub(raw.iter().sum());

    genres
        .iter()
        .zip(&raw)
        .enumerate()
        .map(|(idx, (genre, &count))| {
            let mut count = count.max(1);
            if idx == 0 {
                count += remainder;
            }
            (genre.clone(), count)
        })
        .collect()
}

/// Outcome of one genre.
#[derive(Debug)]
pub struct BatchSummary {
    pub genre: String,
    pub requested: usize,
    pub succeeded: usize,
    /// The error that stopped the genre early, if any.
    pub failure: Option<GenError>,
    pub elapsed: Duration,
}

impl BatchSummary {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none() && self.succeeded == self.requested
    }
}

/// Runs genre plans through a controller.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    #[must_use]
    pub const fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Plan `batch_size` items across `genres` using the configured shares.
    #[must_use]
    pub fn plan(&self, batch_size: usize, genres: &[String]) -> Vec<(String, usize)> {
        plan_genre_counts(batch_size, genres, &self.config.genre_distribution)
    }

    /// Run `count` items of `genre`. `item` receives the item index and the
    /// resolution granted for the attempt, and may be called more than once
    /// per index when the controller retries.
    pub fn run_genre<F>(
        &self,
        controller: &mut RetryController,
        genre: &str,
        count: usize,
        mut item: F,
    ) -> BatchSummary
    where
        F: FnMut(usize, Resolution) -> GenResult<()>,
    {
        let span = tracing::info_span!(span_names::BATCH, genre, count);
        let _enter = span.enter();
        let started = Instant::now();

        let mut summary = BatchSummary {
            genre: genre.to_owned(),
            requested: count,
            succeeded: 0,
            failure: None,
            elapsed: Duration::ZERO,
        };
        for index in 0..count {
            let operation = format!("{genre}#{}", index + 1);
            match controller.run(&operation, |resolution| item(index, resolution)) {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    error!(genre, item = index + 1, count, error = %err, "genre stopped");
                    summary.failure = Some(err);
                    break;
                }
            }
        }
        summary.elapsed = started.elapsed();
        info!(
            genre,
            succeeded = summary.succeeded,
            requested = count,
            elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            "genre finished"
        );
        summary
    }

    /// Run every genre of `plan` in order. Between genres, when memory
    /// management is enabled, the device is force-cleaned and then left idle
    /// for `inter_genre_pause_ms`.
    pub fn run_plan<F>(
        &self,
        controller: &mut RetryController,
        plan: &[(String, usize)],
        mut item: F,
    ) -> Vec<BatchSummary>
    where
        F: FnMut(&str, usize, Resolution) -> GenResult<()>,
    {
        let mut summaries = Vec::with_capacity(plan.len());
        for (idx, (genre, count)) in plan.iter().enumerate() {
            info!(genre, count, "genre planned");
            summaries.push(self.run_genre(controller, genre, *count, |index, resolution| {
                item(genre.as_str(), index, resolution)
            }));

            let more_follow = idx + 1 < plan.len();
            if more_follow && controller.monitor().config().enabled {
                info!(
                    pause_ms = self.config.inter_genre_pause_ms,
                    "inter-genre memory cleanup"
                );
                controller.monitor().force_cleanup();
                controller
                    .monitor()
                    .pause_handle()
                    .pause(self.config.inter_genre_pause());
            }
        }
        summaries
    }
}
