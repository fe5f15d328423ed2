//! Per-category selection history and its persisted form.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::store::JsonStore;

/// Durable sampler history.
pub type HistoryStore = JsonStore<HistoryState>;

/// Persisted history document.
///
/// ```json
/// { "histories": {"background": ["beach", "cafe"]},
///   "counters":  {"background": {"beach": 4, "cafe": 2}},
///   "saved_at":  1760000000000 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryState {
    /// Recent window per category, oldest first.
    pub histories: BTreeMap<String, Vec<String>>,
    /// Cumulative selection counts per category.
    pub counters: BTreeMap<String, BTreeMap<String, u64>>,
    /// Milliseconds since the Unix epoch at the time of the save.
    pub saved_at: Option<u64>,
}

impl HistoryState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty() && self.counters.is_empty()
    }
}

/// Live state for one category: a bounded recent window plus lifetime counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryHistory {
    window: usize,
    recent: VecDeque<String>,
    frequency: BTreeMap<String, u64>,
}

impl CategoryHistory {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window,
            recent: VecDeque::new(),
            frequency: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Change the window, evicting the oldest entries if it shrank.
    pub fn set_window(&mut self, window: usize) {
        self.window = window;
        self.trim();
    }

    #[must_use]
    pub fn recent(&self) -> &VecDeque<String> {
        &self.recent
    }

    #[must_use]
    pub fn is_recent(&self, key: &str) -> bool {
        self.recent.iter().any(|entry| entry == key)
    }

    #[must_use]
    pub fn count(&self, key: &str) -> u64 {
        self.frequency.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub const fn frequency(&self) -> &BTreeMap<String, u64> {
        &self.frequency
    }

    pub fn clear_recent(&mut self) {
        self.recent.clear();
    }

    /// Record a selection: append to the window and bump its count.
    pub fn record(&mut self, key: &str) {
        self.push_recent(key.to_owned());
        *self.frequency.entry(key.to_owned()).or_insert(0) += 1;
    }

    /// Fold in state loaded from disk: window entries are appended up to
    /// capacity, counts are summed.
    pub fn merge(&mut self, recent: Vec<String>, counts: BTreeMap<String, u64>) {
        for key in recent {
            self.push_recent(key);
        }
        for (key, count) in counts {
            let slot = self.frequency.entry(key).or_insert(0);
            *slot = slot.saturating_add(count);
        }
    }

    fn push_recent(&mut self, key: String) {
        if self.window == 0 {
            return;
        }
        self.recent.push_back(key);
        self.trim();
    }

    fn trim(&mut self) {
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }
}

/// All categories owned by one sampler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerState {
    categories: BTreeMap<String, CategoryHistory>,
}

impl SamplerState {
    /// Category state, created empty with `window` on first use.
    pub fn category_mut(&mut self, category: &str, window: usize) -> &mut CategoryHistory {
        self.categories
            .entry(category.to_owned())
            .or_insert_with(|| CategoryHistory::new(window))
    }

    #[must_use]
    pub fn category(&self, category: &str) -> Option<&CategoryHistory> {
        self.categories.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &CategoryHistory)> {
        self.categories
            .iter()
            .map(|(name, history)| (name.as_str(), history))
    }

    /// Merge a loaded document, sizing new categories with `window_for`.
    pub fn merge(&mut self, loaded: HistoryState, window_for: impl Fn(&str) -> usize) {
        let HistoryState {
            mut histories,
            counters,
            ..
        } = loaded;

        for (category, counts) in counters {
            let recent = histories.remove(&category).unwrap_or_default();
            let window = window_for(&category);
            self.category_mut(&category, window).merge(recent, counts);
        }
        for (category, recent) in histories {
            let window = window_for(&category);
            self.category_mut(&category, window)
                .merge(recent, BTreeMap::new());
        }
    }

    /// Persistable snapshot stamped with `saved_at`.
    #[must_use]
    pub fn snapshot(&self, saved_at: u64) -> HistoryState {
        HistoryState {
            histories: self
                .categories
                .iter()
                .map(|(name, history)| (name.clone(), history.recent.iter().cloned().collect()))
                .collect(),
            counters: self
                .categories
                .iter()
                .map(|(name, history)| (name.clone(), history.frequency.clone()))
                .collect(),
            saved_at: Some(saved_at),
        }
    }
}
