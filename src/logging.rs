//! Tracing setup for the sidecar.
//!
//! stdout carries the IPC stream, so every log line goes to stderr.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    fn default_filter(&self) -> String {
        format!("campusd={}", self.level())
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity` when set.
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true),
    );

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(Verbosity::Quiet.level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.level(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.level(), Level::TRACE);
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn default_filter_targets_this_crate() {
        assert_eq!(Verbosity::Normal.default_filter(), "campusd=INFO");
        assert_eq!(Verbosity::Quiet.default_filter(), "campusd=ERROR");
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Verbose);
    }
}
