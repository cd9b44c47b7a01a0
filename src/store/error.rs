// Lockbox: Store error types
//
// `Display` output is what crosses the public operation surface, so it never
// includes backend error text. The backend cause is kept as `source` for
// internal logs only. No variant ever carries a plaintext or ciphertext.

use thiserror::Error;

use super::models::Operation;
use crate::tenant::TenantId;

/// Raw backend failure. Only ever rendered into internal logs.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("sealing failed: {0}")]
    Crypto(#[from] crate::enclave::CryptoError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input, rejected before any storage access.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend unreachable or failing. Retryable by the caller; never retried here.
    #[error("storage backend unavailable during {operation}")]
    Connection {
        operation: Operation,
        provider: Option<String>,
        tenant: Option<TenantId>,
        #[source]
        source: BackendError,
    },

    /// Stored ciphertext failed authentication. Fatal, never retried.
    #[error("stored secret failed integrity check during {operation}")]
    Integrity {
        operation: Operation,
        provider: String,
        tenant: TenantId,
    },

    #[error("invalid storage configuration: {0}")]
    Configuration(String),

    #[error("{0} is not supported by client-managed storage; credentials travel with each request")]
    Unsupported(Operation),
}

impl StoreError {
    pub(crate) fn connection(
        operation: Operation,
        provider: Option<&str>,
        tenant: Option<&TenantId>,
        source: impl Into<BackendError>,
    ) -> Self {
        Self::Connection {
            operation,
            provider: provider.map(str::to_string),
            tenant: tenant.cloned(),
            source: source.into(),
        }
    }

    /// Only connection failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Backend cause text, for internal logs only.
    pub(crate) fn cause_text(&self) -> String {
        std::error::Error::source(self)
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Short machine-readable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Connection { .. } => "connection",
            Self::Integrity { .. } => "integrity",
            Self::Configuration(_) => "configuration",
            Self::Unsupported(_) => "unsupported",
        }
    }
}
