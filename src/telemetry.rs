// Lockbox: Logging lifecycle
//
// The subscriber is installed exactly once by the binary (or host process)
// through `init_logging`, which hands back a `LogGuard`. Dropping the guard,
// or calling `shutdown`, flushes the non-blocking writer. Components never
// look up a global logger: each storage adapter receives a `tracing::Span`
// at construction and emits its events inside it.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for a daily-rolling `lockbox.log`. Stderr when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "lockbox=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Keeps the log writer alive. Flushes on drop.
#[must_use = "dropping the guard flushes and stops the log writer"]
pub struct LogGuard {
    _worker: WorkerGuard,
}

impl LogGuard {
    /// Flush pending records and stop the writer thread.
    pub fn shutdown(self) {
        tracing::debug!("Logging shut down");
        drop(self);
    }
}

/// Install the process-wide subscriber. Call once, at startup.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard, TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, worker) = match &config.directory {
        Some(dir) => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "lockbox.log"))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    Ok(LogGuard { _worker: worker })
}

/// Default span handed to a storage adapter of the given kind.
pub fn component_span(backend: &'static str) -> Span {
    tracing::info_span!("lockbox.storage", backend)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let cfg: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.level, "lockbox=info");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.directory.is_none());
    }

    #[test]
    fn test_json_format_parses() {
        let cfg: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig {
            directory: Some(dir.path().to_path_buf()),
            ..LogConfig::default()
        };
        // Another test may already own the global subscriber; either way a
        // second call in this process must fail cleanly.
        let first = init_logging(&cfg);
        let second = init_logging(&cfg);
        assert!(matches!(second, Err(TelemetryError::AlreadyInitialized)));
        if let Ok(guard) = first {
            guard.shutdown();
        }
    }
}
