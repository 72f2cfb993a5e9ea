//! Logging configuration for the grid.
//!
//! Everything in the crate logs through `tracing`; this module only installs a
//! subscriber for binaries and tests that want output.
//!
//! ```rust,no_run
//! use kvgrid::telemetry::{LogFormat, init_logging};
//!
//! init_logging(LogFormat::from_env()).expect("Failed to init logging");
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: log filter directives (default: `info`)
//!
//! # Levels used by the crate
//!
//! - `error`: contract violations (entries not pre-loaded, unsupported decode)
//! - `warn`: sub-operation failures and abandoned operations
//! - `debug`: dispatch paths, cancellation, node invocations
//! - `trace`: per-entry application and commits

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output (default).
    #[default]
    Pretty,
    /// One JSON object per event, for log aggregators.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        })
    }
}

impl LogFormat {
    /// Read from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Build the filter from `RUST_LOG`, falling back to `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a global subscriber with the given format.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = env_filter(DEFAULT_FILTER);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

/// Install a test writer subscriber, ignoring the error if one already exists.
///
/// Output is captured by the test harness and shown only for failing tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_json_selects_structured_output() {
        let parsed: Vec<LogFormat> = ["json", " JSON ", "pretty", "xml", ""]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(
            parsed,
            vec![
                LogFormat::Json,
                LogFormat::Json,
                LogFormat::Pretty,
                LogFormat::Pretty,
                LogFormat::Pretty
            ]
        );
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_env_filter_falls_back_to_default() {
        let filter = env_filter(DEFAULT_FILTER);
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.to_string(), DEFAULT_FILTER);
        }
    }

    #[test]
    fn test_init_test_logging_is_repeatable() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("test logging initialized");
    }
}
