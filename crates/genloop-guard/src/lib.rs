//! Resource-guarded execution for GPU-memory-sensitive work.
//!
//! A [`RetryController`] runs a unit of work, watches device memory through a
//! [`ResourceMonitor`], and on resource exhaustion cleans up, steps a
//! [`DegradationLadder`] down to a cheaper resolution, cools down, and
//! retries until a fixed attempt bound is reached.

pub mod ladder;
pub mod monitor;
pub mod pause;
pub mod retry;

pub use ladder::{DegradationLadder, DegradationRung};
pub use monitor::{DeviceMemory, FixedDevice, HostMemory, MemoryCheck, NoDevice, ResourceMonitor};
pub use pause::{Pause, RecordingPause, ThreadPause};
pub use retry::{AttemptOutcome, RetryAttempt, RetryController, RunReport};
