//! Tracing subscriber setup for the command-line front ends.
//!
//! The library itself only emits `tracing` events; binaries call
//! [`init_logging`] once at startup to decide where those events go.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Verbosity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-sample integrator detail.
    Trace,
    /// Per-iteration estimator detail.
    Debug,
    /// Convergence summaries.
    #[default]
    Info,
    /// Convergence failures.
    Warn,
    /// Errors only.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Event formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human readable.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Default `tracing-subscriber` layout.
    Full,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Threshold used when neither `filter` nor `RUST_LOG` is set.
    #[serde(default)]
    pub level: LogLevel,
    /// Output layout.
    #[serde(default)]
    pub format: LogFormat,
    /// Explicit directive string, e.g. `"beamenv_calc::estimator=debug"`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Include file and line of each event.
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            filter: None,
            source_location: false,
        }
    }
}

impl LogConfig {
    /// Verbose configuration that shows every estimator iteration.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            source_location: true,
            ..Default::default()
        }
    }

    /// Errors only.
    pub fn quiet() -> Self {
        Self { level: LogLevel::Error, ..Default::default() }
    }

    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(custom) => {
                EnvFilter::try_new(custom).unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
            }
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.to_string())),
        }
    }
}

/// Installs the global subscriber.
///
/// Later calls are ignored, so tests and binaries can both call it.
pub fn init_logging(config: &LogConfig) {
    let filter = config.env_filter();
    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
        LogFormat::Full => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
    };
    // Already installed.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.level, LogLevel::Debug);
        assert!(dev.source_location);
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
    }

    #[test]
    fn test_config_from_json() {
        let config: LogConfig = serde_json::from_str(r#"{"level": "trace", "format": "full"}"#).unwrap();
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Full);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LogConfig::quiet());
        init_logging(&LogConfig::quiet());
    }
}
