// Lockbox: Configuration error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format for {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },
}
