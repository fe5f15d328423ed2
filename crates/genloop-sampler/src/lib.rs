//! History-weighted, no-repeat sampling for prompt and input variety.
//!
//! [`WeightedNoRepeatSampler`] picks from a candidate list while excluding a
//! per-category window of recent picks and favoring rarely used candidates.
//! [`ItemPool`] cycles through a fixed set of inputs in shuffled order. Both
//! write their bookkeeping through a [`JsonStore`] after every draw.

pub mod canonical;
pub mod history;
pub mod pool;
pub mod sampler;
pub mod store;

pub use canonical::{canonical_key, value_key};
pub use history::{CategoryHistory, HistoryState, HistoryStore, SamplerState};
pub use pool::{ItemPool, PoolStats, PoolUsage};
pub use sampler::{WeightedNoRepeatSampler, selection_weight};
pub use store::{JsonStore, now_unix_ms};
