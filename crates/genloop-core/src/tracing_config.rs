//! Tracing conventions shared by every genloop crate.
//!
//! Consumers can filter genloop output with:
//! ```text
//! RUST_LOG=genloop=debug
//! ```

use tracing::Level;

/// Target prefix used by all genloop spans and events.
pub const TARGET_PREFIX: &str = "genloop";

/// Standard span names.
pub mod span_names {
    /// One `RetryController::run` invocation.
    pub const RUN: &str = "genloop::run";
    /// A single attempt inside a run.
    pub const ATTEMPT: &str = "genloop::attempt";
    /// A forced cleanup cycle.
    pub const CLEANUP: &str = "genloop::cleanup";
    /// One sampler selection.
    pub const SELECT: &str = "genloop::select";
    /// A genre batch.
    pub const BATCH: &str = "genloop::batch";
}

/// Parse a log level string (case-insensitive).
#[must_use]
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Level from `GENLOOP_LOG_LEVEL`, or `default` when unset or unrecognized.
#[must_use]
pub fn level_from_env(default: Level) -> Level {
    std::env::var("GENLOOP_LOG_LEVEL")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_span_names_start_with_target_prefix() {
        let all_spans = [
            span_names::RUN,
            span_names::ATTEMPT,
            span_names::CLEANUP,
            span_names::SELECT,
            span_names::BATCH,
        ];
        for span in all_spans {
            assert!(
                span.starts_with(&format!("{TARGET_PREFIX}::")),
                "span {span:?} must start with \"{TARGET_PREFIX}::\"",
            );
        }
    }

    #[test]
    fn parse_level_case_insensitive() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("Debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
    }

    #[test]
    fn parse_level_returns_none_for_invalid() {
        assert_eq!(parse_level("verbose"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level(" info"), None);
    }
}
