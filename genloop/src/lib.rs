//! # genloop
//!
//! Building blocks for long-running generation batches on a memory-constrained
//! accelerator:
//!
//! - a **resource-guarded retry controller** that watches device memory,
//!   cleans up and steps down to cheaper resolutions on exhaustion, and gives
//!   up after a fixed number of attempts;
//! - a **history-weighted sampler** that picks prompt fragments without
//!   immediate repeats and favors rarely used candidates, with history that
//!   survives restarts.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use genloop::prelude::*;
//!
//! # fn main() -> GenResult<()> {
//! let config = GenloopConfig::default();
//! let mut controller =
//!     RetryController::from_config(&config, Arc::new(HostMemory::new()), Arc::new(ThreadPause))?;
//! let mut sampler = WeightedNoRepeatSampler::from_config(&config.sampler);
//!
//! let poses = ["standing", "sitting", "leaning on a railing"];
//! let prompt = controller.run("portrait#1", |resolution| {
//!     let pose = sampler.select(&poses, "pose", 3)?;
//!     Ok(format!("{pose}, {resolution}"))
//! })?;
//! println!("{prompt}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Layout
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`genloop-core`](core) | Errors, typed config, shared types, tracing conventions |
//! | [`genloop-guard`](guard) | Resource monitor, degradation ladder, retry controller |
//! | [`genloop-sampler`](sampler) | No-repeat weighted sampler, item pool, durable history |

pub mod batch;
pub mod tracing_setup;

pub use genloop_core as core;
pub use genloop_guard as guard;
pub use genloop_sampler as sampler;

pub use genloop_core::{
    ConfigLoadResult, GenError, GenResult, GenloopConfig, Resolution, ResourceReading,
    load_from_sources, load_from_str,
};
pub use genloop_guard::{
    AttemptOutcome, DegradationLadder, DeviceMemory, FixedDevice, HostMemory, NoDevice, Pause,
    RecordingPause, ResourceMonitor, RetryController, RunReport, ThreadPause,
};
pub use genloop_sampler::{
    HistoryStore, ItemPool, JsonStore, PoolStats, WeightedNoRepeatSampler, canonical_key,
};

pub use batch::{BatchRunner, BatchSummary, plan_genre_counts};
pub use tracing_setup::{Verbosity, init_subscriber, try_init_subscriber};

/// Common imports.
///
/// ```rust
/// use genloop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BatchRunner, DeviceMemory, GenError, GenResult, GenloopConfig, HostMemory, ItemPool,
        NoDevice, Pause, Resolution, RetryController, ThreadPause, WeightedNoRepeatSampler,
    };
}
