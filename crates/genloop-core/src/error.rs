use std::path::PathBuf;

/// Unified error type covering every failure mode of the genloop pipeline.
///
/// Every variant includes an actionable message. The `RetryController` only
/// recovers `ResourceExhausted`; all other variants propagate to the caller
/// unchanged. `HistoryCorrupted` is constructed for logging and is never
/// returned from a history load.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    // === Sampling errors ===
    /// The sampler was asked to choose from an empty candidate list.
    #[error("No candidates to select from in category \"{category}\". Supply at least one item.")]
    EmptyInput {
        /// Category (or pool name) that was empty.
        category: String,
    },

    // === Resource errors ===
    /// The unit of work ran out of accelerator memory.
    #[error(
        "Resource exhausted during {operation}: {detail}. Recoverable by cleanup and degradation."
    )]
    ResourceExhausted {
        /// Operation that was running.
        operation: String,
        /// Backend-reported detail.
        detail: String,
    },

    /// Every allowed attempt failed with resource exhaustion.
    #[error(
        "{operation} gave up after {max_retries} resource-exhausted attempts. Lower the fallback resolutions or free device memory."
    )]
    RetryExhausted {
        /// Operation that was abandoned.
        operation: String,
        /// Configured attempt bound.
        max_retries: u32,
    },

    /// The device memory query is not available on this host.
    #[error("Device memory query unavailable: {reason}")]
    DeviceUnavailable {
        /// Why the query failed.
        reason: String,
    },

    // === Collaborator errors ===
    /// A non-resource failure reported by the unit of work.
    #[error("{operation} failed: {source}")]
    Backend {
        /// Operation that failed.
        operation: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // === Persistence errors ===
    /// Persisted history could not be parsed and was discarded.
    #[error("History file {path} is corrupted ({detail}); starting with empty history.")]
    HistoryCorrupted {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        detail: String,
    },

    /// A document could not be serialized.
    #[error("Serialization failed: {detail}")]
    Serialization {
        /// Serializer message.
        detail: String,
    },

    /// Wraps `std::io::Error` for file operations.
    #[error("I/O error: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    // === Configuration errors ===
    /// A configuration value is invalid.
    #[error("Invalid config: {field} = \"{value}\": {reason}")]
    InvalidConfig {
        /// Which config field.
        field: String,
        /// The invalid value.
        value: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl GenError {
    /// Build a resource-exhaustion error for `operation`.
    #[must_use]
    pub fn resource_exhausted(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// Wrap an arbitrary collaborator error as a non-retryable backend failure.
    #[must_use]
    pub fn backend(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Whether this failure should drive the cleanup/degrade/retry loop.
    #[must_use]
    pub const fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Convenience alias used throughout the genloop crates.
pub type GenResult<T> = Result<T, GenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GenError>();
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: GenError = io_err.into();
        assert!(matches!(err, GenError::Io(_)));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn only_resource_exhaustion_is_retryable() {
        assert!(GenError::resource_exhausted("render", "out of memory").is_resource_exhausted());
        assert!(!GenError::backend("render", "http 500").is_resource_exhausted());
        assert!(
            !GenError::RetryExhausted {
                operation: "render".into(),
                max_retries: 5,
            }
            .is_resource_exhausted()
        );
        assert!(
            !GenError::EmptyInput {
                category: "background".into(),
            }
            .is_resource_exhausted()
        );
    }

    #[test]
    fn retry_exhausted_names_operation_and_bound() {
        let err = GenError::RetryExhausted {
            operation: "portrait#3".into(),
            max_retries: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("portrait#3"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn backend_preserves_source() {
        let inner = std::io::Error::other("connection reset");
        let err = GenError::backend("txt2img", inner);
        assert!(err.to_string().contains("txt2img"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn history_corrupted_display_names_path() {
        let err = GenError::HistoryCorrupted {
            path: PathBuf::from("/tmp/history.json"),
            detail: "expected value at line 1".into(),
        };
        assert!(err.to_string().contains("/tmp/history.json"));
        assert!(err.to_string().contains("empty history"));
    }

    #[test]
    fn gen_result_alias_works() {
        let ok: GenResult<u32> = Ok(7);
        assert!(ok.is_ok());
        let err: GenResult<u32> = Err(GenError::DeviceUnavailable {
            reason: "no accelerator".into(),
        });
        assert!(err.is_err());
    }
}
