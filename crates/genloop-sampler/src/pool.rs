//! Shuffled cycling pool of input items with persisted usage counts.
//!
//! Items are handed out in a random order; once every item has been handed
//! out the pool reshuffles and starts a new cycle, so no item repeats until
//! all others have been used. Usage counts survive restarts, the cycle
//! position does not.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use genloop_core::{GenError, GenResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{JsonStore, now_unix_ms};

const MOST_USED_LIMIT: usize = 5;

/// Persisted pool usage document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolUsage {
    pub usage_counter: BTreeMap<String, u64>,
    pub total_items: usize,
    pub saved_at: Option<u64>,
}

/// Point-in-time usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
    pub total_draws: u64,
    /// Items handed out in the current cycle, out of `total`.
    pub cycle_position: usize,
    /// Up to five `(item, count)` pairs, most used first.
    pub most_used: Vec<(String, u64)>,
}

impl PoolStats {
    /// `"{cycle_position}/{total}"`.
    #[must_use]
    pub fn cycle_progress(&self) -> String {
        format!("{}/{}", self.cycle_position, self.total)
    }
}

#[derive(Debug)]
pub struct ItemPool<R = StdRng> {
    items: Vec<String>,
    cursor: usize,
    usage: BTreeMap<String, u64>,
    store: Option<JsonStore<PoolUsage>>,
    rng: R,
}

impl ItemPool<StdRng> {
    /// Pool over `items`, seeded from the operating system.
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = String>) -> Self {
        Self::with_rng(items, StdRng::from_os_rng())
    }

    /// Pool over every file under `root` whose extension matches one of
    /// `extensions`, ignoring case. Hidden entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `GenError::Io` if `root` cannot be read.
    pub fn from_directory(root: &Path, extensions: &[String]) -> GenResult<Self> {
        let items = scan_directory(root, extensions)?;
        info!(root = %root.display(), items = items.len(), "scanned item pool");
        Ok(Self::new(items))
    }
}

impl<R: Rng> ItemPool<R> {
    /// Pool over `items` drawing from `rng`. Duplicates are collapsed.
    pub fn with_rng(items: impl IntoIterator<Item = String>, mut rng: R) -> Self {
        let mut items: Vec<String> = items
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        items.shuffle(&mut rng);
        Self {
            items,
            cursor: 0,
            usage: BTreeMap::new(),
            store: None,
            rng,
        }
    }

    /// Restore usage counts from `store` and write every later draw through.
    #[must_use]
    pub fn persist_to(mut self, store: JsonStore<PoolUsage>) -> Self {
        let loaded = store.load();
        let restored: u64 = loaded.usage_counter.values().sum();
        if restored > 0 {
            debug!(path = %store.path().display(), restored, "restored pool usage");
        }
        for (item, count) in loaded.usage_counter {
            let slot = self.usage.entry(item).or_insert(0);
            *slot = slot.saturating_add(count);
        }
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Next item in the current cycle, reshuffling when the cycle completes.
    ///
    /// # Errors
    ///
    /// Returns `GenError::EmptyInput` if the pool holds no items.
    pub fn next_item(&mut self) -> GenResult<&str> {
        if self.items.is_empty() {
            return Err(GenError::EmptyInput {
                category: "item pool".into(),
            });
        }
        if self.cursor >= self.items.len() {
            self.items.shuffle(&mut self.rng);
            self.cursor = 0;
            info!(items = self.items.len(), "item pool exhausted; starting new cycle");
        }

        let idx = self.cursor;
        self.cursor += 1;
        *self.usage.entry(self.items[idx].clone()).or_insert(0) += 1;
        self.persist();
        Ok(self.items[idx].as_str())
    }

    #[must_use]
    pub fn usage(&self, item: &str) -> u64 {
        self.usage.get(item).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let used = self
            .items
            .iter()
            .filter(|item| self.usage(item) > 0)
            .count();
        let mut most_used: Vec<(String, u64)> = self
            .usage
            .iter()
            .map(|(item, count)| (item.clone(), *count))
            .collect();
        most_used.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_used.truncate(MOST_USED_LIMIT);

        PoolStats {
            total: self.items.len(),
            used,
            unused: self.items.len() - used,
            total_draws: self.usage.values().sum(),
            cycle_position: self.cursor,
            most_used,
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let doc = PoolUsage {
            usage_counter: self.usage.clone(),
            total_items: self.items.len(),
            saved_at: Some(now_unix_ms()),
        };
        if let Err(error) = store.save(&doc) {
            warn!(%error, "failed to persist pool usage; continuing");
        }
    }
}

fn scan_directory(root: &Path, extensions: &[String]) -> GenResult<Vec<String>> {
    let wanted: BTreeSet<String> = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if dir == root => return Err(error.into()),
            Err(error) => {
                warn!(dir = %dir.display(), %error, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| wanted.contains(&ext.to_ascii_lowercase()));
            if matches {
                found.push(path.to_string_lossy().into_owned());
            }
        }
    }
    Ok(found)
}
