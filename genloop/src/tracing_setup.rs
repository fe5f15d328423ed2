//! Tracing subscriber initialization for binaries built on genloop.
//!
//! Writes structured logs to stderr through a single `tracing-subscriber`
//! stack.
//!
//! # Priority (highest to lowest)
//!
//! 1. `GENLOOP_LOG` env var (per-target directives, e.g. `genloop=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. `GENLOOP_LOG_LEVEL` env var (a single level)
//! 4. [`Verbosity`] default

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

use genloop_core::tracing_config;

/// Output verbosity chosen by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only errors.
    Quiet,
    /// Retry and degradation events are warnings, so this still shows them.
    #[default]
    Normal,
    /// Debug output for genloop targets.
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_subscriber(verbosity: Verbosity, no_color: bool) {
    if let Err(err) = try_init_subscriber(verbosity, no_color) {
        panic!("tracing subscriber already initialized: {err}");
    }
}

/// Install the global subscriber, reporting double-init instead of panicking.
///
/// # Errors
///
/// Returns `TryInitError` if a global subscriber is already set.
pub fn try_init_subscriber(verbosity: Verbosity, no_color: bool) -> Result<(), TryInitError> {
    let filter = build_env_filter(verbosity);

    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let use_ansi = !no_color && stderr_is_tty;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    if verbosity == Verbosity::Verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.with_timer(fmt::time::uptime()))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.without_time().compact())
            .try_init()
    }
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var("GENLOOP_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = tracing_config::level_from_env(verbosity.default_level());
    fallback_filter(verbosity, level)
}

fn fallback_directive(verbosity: Verbosity, level: Level) -> String {
    if verbosity == Verbosity::Verbose {
        format!(
            "{level},{prefix}=debug",
            prefix = tracing_config::TARGET_PREFIX,
        )
    } else {
        level.to_string()
    }
}

fn fallback_filter(verbosity: Verbosity, level: Level) -> EnvFilter {
    EnvFilter::try_new(fallback_directive(verbosity, level))
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
    }

    #[test]
    fn default_levels() {
        assert_eq!(Verbosity::Quiet.default_level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.default_level(), Level::WARN);
        assert_eq!(Verbosity::Verbose.default_level(), Level::DEBUG);
    }

    #[test]
    fn verbose_directive_raises_genloop_targets() {
        assert_eq!(
            fallback_directive(Verbosity::Verbose, Level::DEBUG),
            "DEBUG,genloop=debug"
        );
        assert_eq!(fallback_directive(Verbosity::Normal, Level::WARN), "WARN");
    }

    #[test]
    fn fallback_filter_is_always_buildable() {
        let filter = fallback_filter(Verbosity::Quiet, Level::ERROR);
        assert!(filter.to_string().to_lowercase().contains("error"));
    }
}
