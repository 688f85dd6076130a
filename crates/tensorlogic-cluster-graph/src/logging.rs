//! Subscriber setup for the crate's `tracing` events.
//!
//! Graph construction and message passing emit `tracing` events (sizes at
//! `info`, per-round divergences and passed messages at `debug`, refused
//! absorptions and non-convergence at `warn`). Applications that do not
//! install their own subscriber can use [`init_logging`].
//!
//! Only available with the `structured-logging` feature:
//!
//! ```toml
//! [dependencies]
//! tensorlogic-cluster-graph = { version = "0.1", features = ["structured-logging"] }
//! ```
//!
//! ```no_run
//! use tensorlogic_cluster_graph::logging::{init_logging, LogFormat, LogLevel};
//!
//! init_logging(LogFormat::Json, LogLevel::Debug).expect("logger already installed");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{PgmError, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// One line per event, no colours.
    Compact,
    /// JSON lines for log aggregation.
    Json,
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Install a global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set. Fails if a
/// global subscriber is already installed.
pub fn init_logging(format: LogFormat, level: LogLevel) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    install(format, filter)
}

/// Install a global subscriber with an explicit filter directive,
/// e.g. `"tensorlogic_cluster_graph=debug"`.
pub fn init_logging_with_filter(format: LogFormat, directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| PgmError::Config(format!("Invalid log filter '{}': {}", directive, e)))?;
    install(format, filter)
}

fn install(format: LogFormat, filter: EnvFilter) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_ansi(false).compact())
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| PgmError::Config(format!("Failed to initialize tracing: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let result = init_logging_with_filter(LogFormat::Compact, "tensorlogic=[");
        assert!(matches!(result, Err(PgmError::Config(_))));
    }
}
