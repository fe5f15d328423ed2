//! Core error types, configuration, and shared value types for genloop.
//!
//! Every other crate in the workspace depends on this one. It carries no
//! behavior beyond configuration loading and validation.

pub mod config;
pub mod error;
pub mod tracing_config;
pub mod types;

pub use config::{
    BatchConfig, ConfigLoadResult, ConfigSource, ConfigWarning, GenerationConfig, GenloopConfig,
    MemoryConfig, PoolConfig, SamplerConfig, default_fallback_resolutions, load_from_sources,
    load_from_str, validate_ladder,
};
pub use error::{GenError, GenResult};
pub use types::{Resolution, ResourceReading};
