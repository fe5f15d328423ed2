//! Weighted random selection that avoids recent repeats.
//!
//! For each category the sampler keeps a bounded window of recently returned
//! keys and a lifetime count per key. A draw:
//!
//! 1. excludes candidates whose key is in the recent window,
//! 2. clears the window entirely if that excluded everything,
//! 3. returns the only eligible candidate directly, or
//! 4. weights each eligible candidate by `max(1, min + 5 - count)` and draws
//!    one from a cryptographically strong generator,
//!
//! then records the choice and writes the history through to disk.

use std::collections::BTreeMap;

use genloop_core::tracing_config::span_names;
use genloop_core::{GenError, GenResult, SamplerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};

use crate::canonical::canonical_key;
use crate::history::{CategoryHistory, HistoryStore, SamplerState};
use crate::store::now_unix_ms;

/// Head start given to the least-used candidate over one used `FAVOR` more times.
const FAVOR: u64 = 5;

/// Selection weight for a candidate used `count` times when the least-used
/// eligible candidate has `min_count` uses.
///
/// Strictly decreasing in `count` until it reaches the floor of 1.
#[must_use]
pub const fn selection_weight(min_count: u64, count: u64) -> u64 {
    let raw = min_count.saturating_add(FAVOR).saturating_sub(count);
    if raw == 0 { 1 } else { raw }
}

/// History-weighted no-repeat sampler.
///
/// Owns its history; two samplers never share state unless they share a
/// history file.
#[derive(Debug)]
pub struct WeightedNoRepeatSampler<R = StdRng> {
    state: SamplerState,
    store: Option<HistoryStore>,
    rng: R,
}

impl WeightedNoRepeatSampler<StdRng> {
    /// In-memory sampler seeded from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Sampler configured from `[sampler]`, restoring prior history from
    /// `history_file` when one is set.
    #[must_use]
    pub fn from_config(config: &SamplerConfig) -> Self {
        let sampler = Self::new();
        match &config.history_file {
            Some(path) => sampler.persist_to(HistoryStore::new(path), |category| {
                config.window_for(category)
            }),
            None => sampler,
        }
    }
}

impl Default for WeightedNoRepeatSampler<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> WeightedNoRepeatSampler<R> {
    /// In-memory sampler drawing from `rng`.
    pub fn with_rng(rng: R) -> Self {
        Self {
            state: SamplerState::default(),
            store: None,
            rng,
        }
    }

    /// Attach durable storage: prior history is loaded and merged into the
    /// current state, and every later selection is written through.
    #[must_use]
    pub fn persist_to(mut self, store: HistoryStore, window_for: impl Fn(&str) -> usize) -> Self {
        let loaded = store.load();
        if !loaded.is_empty() {
            debug!(
                path = %store.path().display(),
                categories = loaded.counters.len().max(loaded.histories.len()),
                "restored selection history"
            );
        }
        self.state.merge(loaded, window_for);
        self.store = Some(store);
        self
    }

    /// Pick one of `candidates` for `category`, avoiding the last `window`
    /// picks.
    ///
    /// # Errors
    ///
    /// Returns `GenError::EmptyInput` if `candidates` is empty and
    /// `GenError::Serialization` if a candidate has no canonical key.
    pub fn select<'a, T: Serialize>(
        &mut self,
        candidates: &'a [T],
        category: &str,
        window: usize,
    ) -> GenResult<&'a T> {
        let _span = tracing::debug_span!(span_names::SELECT, category, window).entered();

        if candidates.is_empty() {
            return Err(GenError::EmptyInput {
                category: category.to_owned(),
            });
        }
        let keys = candidates
            .iter()
            .map(canonical_key)
            .collect::<GenResult<Vec<_>>>()?;

        let history = self.state.category_mut(category, window);
        if history.window() != window {
            history.set_window(window);
        }

        let mut eligible: Vec<usize> = (0..candidates.len())
            .filter(|&idx| !history.is_recent(&keys[idx]))
            .collect();
        if eligible.is_empty() {
            debug!(category, "every candidate is recent; clearing window");
            history.clear_recent();
            eligible = (0..candidates.len()).collect();
        }

        let chosen = if eligible.len() == 1 {
            eligible[0]
        } else {
            weighted_pick(&mut self.rng, history, &eligible, &keys)
        };

        history.record(&keys[chosen]);
        debug!(
            category,
            key = %keys[chosen],
            count = history.count(&keys[chosen]),
            eligible = eligible.len(),
            "selected"
        );
        self.persist();
        Ok(&candidates[chosen])
    }

    /// Selection counts for `category`, if it has ever been sampled.
    #[must_use]
    pub fn usage_stats(&self, category: &str) -> Option<&BTreeMap<String, u64>> {
        self.state.category(category).map(CategoryHistory::frequency)
    }

    /// Selection counts for every category.
    #[must_use]
    pub fn all_usage_stats(&self) -> BTreeMap<&str, &BTreeMap<String, u64>> {
        self.state
            .categories()
            .map(|(name, history)| (name, history.frequency()))
            .collect()
    }

    /// Recently selected keys for `category`, oldest first.
    #[must_use]
    pub fn recent(&self, category: &str) -> Vec<&str> {
        self.state
            .category(category)
            .map(|history| history.recent().iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Write the current history to the attached store, if any.
    ///
    /// # Errors
    ///
    /// Propagates the store's serialization or I/O error.
    pub fn flush(&self) -> GenResult<()> {
        match &self.store {
            Some(store) => store.save(&self.state.snapshot(now_unix_ms())),
            None => Ok(()),
        }
    }

    fn persist(&self) {
        if let Err(error) = self.flush() {
            warn!(%error, "failed to persist selection history; continuing");
        }
    }
}

fn weighted_pick<R: Rng>(
    rng: &mut R,
    history: &CategoryHistory,
    eligible: &[usize],
    keys: &[String],
) -> usize {
    let counts: Vec<u64> = eligible.iter().map(|&idx| history.count(&keys[idx])).collect();
    let min_count = counts.iter().copied().min().unwrap_or(0);
    let weights: Vec<u64> = counts
        .iter()
        .map(|&count| selection_weight(min_count, count))
        .collect();
    let total: u64 = weights.iter().sum();

    let mut ticket = rng.random_range(0..total);
    for (&idx, &weight) in eligible.iter().zip(&weights) {
        if ticket < weight {
            return idx;
        }
        ticket -= weight;
    }
    eligible[eligible.len() - 1]
}
