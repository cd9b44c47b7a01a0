// Lockbox: Top-level error types
//
// Aggregates errors from the enclave, store, config and telemetry modules
// into a single error enum for the application boundary.

use thiserror::Error;

/// Top-level error type for all Lockbox operations.
#[derive(Debug, Error)]
pub enum LockboxError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::enclave::CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Logging error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LockboxError>;
