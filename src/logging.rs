//! Structured logging
//!
//! The library only emits `tracing` events. Hosts that want them printed call
//! [`init_logging`] once at startup; `RUST_LOG` overrides the configured level.
//!
//! Field names used across the crate: `state`, `score`, `event`, `sound`,
//! `level`, `context`, `trigger`.

use crate::error::{Result, SoomiError};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (trace, debug, info, warn, error, or a full EnvFilter string)
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Install the global subscriber
///
/// Returns `SoomiError::LoggingError` on a second call or when the file can't be opened.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(SoomiError::LoggingError(
            "logging already initialized".to_string(),
        ));
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SoomiError::LoggingError(format!("invalid log level: {e}")))?;

    let file = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Some(Arc::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            ))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match (config.format, file) {
        (LogFormat::Pretty, None) => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init(),
        (LogFormat::Pretty, Some(file)) => registry
            .with(fmt::layer().with_writer(file).with_ansi(false))
            .try_init(),
        (LogFormat::Json, None) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Json, Some(file)) => registry
            .with(fmt::layer().json().with_writer(file))
            .try_init(),
    };
    installed.map_err(|e| SoomiError::LoggingError(e.to_string()))?;

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.file.is_none());
    }
}
