//! Logging setup
//!
//! TigerStyle: Explicit telemetry configuration, installed once per process.

use crate::error::{Error, Result};

/// Default log filter when `RUST_LOG` is unset
pub const LOG_LEVEL_DEFAULT: &str = "info";

/// Where formatted log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stdout,
    /// Keeps stdout free for protocol traffic
    Stderr,
}

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded in the startup event
    pub service_name: String,
    /// Log level filter, overridden by `RUST_LOG`
    pub log_level: String,
    pub target: LogTarget,
    /// Whether to include ANSI colors
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "utcp".to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            target: LogTarget::Stdout,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Write logs to stderr without colors
    pub fn with_stderr(mut self) -> Self {
        self.target = LogTarget::Stderr;
        self.ansi = false;
        self
    }

    /// Read `RUST_LOG`, falling back to the default level
    pub fn from_env() -> Self {
        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());
        Self {
            log_level,
            ..Default::default()
        }
    }
}

/// Install the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(config.ansi);

    let installed = match config.target {
        LogTarget::Stdout => builder.try_init(),
        LogTarget::Stderr => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "utcp");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.target, LogTarget::Stdout);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("utcp-bridge")
            .with_log_level("debug")
            .with_stderr();

        assert_eq!(config.service_name, "utcp-bridge");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(!config.ansi);
    }
}
