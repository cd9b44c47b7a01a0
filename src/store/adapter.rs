// Lockbox: StorageAdapter contract
//
// One async capability surface shared by every backend. Callers hold an
// adapter (usually through `Storage` or `Arc<dyn StorageAdapter>`) and never
// see encryption or schema details.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

use super::models::Identity;
use super::StoreError;

/// Which backend an adapter is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Relational,
    File,
    ClientManaged,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::File => "file",
            Self::ClientManaged => "client_managed",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Backend-specific health figures. Absent fields don't apply to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenants: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_records: Option<u64>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub backend: StorageKind,
    pub details: HealthDetails,
}

impl HealthReport {
    pub fn healthy(backend: StorageKind, details: HealthDetails) -> Self {
        Self {
            status: HealthStatus::Healthy,
            backend,
            details,
        }
    }

    /// `message` must already be redacted; it is shown to callers.
    pub fn unhealthy(backend: StorageKind, latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            backend,
            details: HealthDetails {
                latency_ms,
                message: Some(message.into()),
                ..HealthDetails::default()
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Secret storage capability, uniform across backends.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Create schema or file if absent. Idempotent.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Insert or overwrite the caller's credential for `provider`.
    async fn store_secret(
        &self,
        identity: &Identity,
        provider: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing is stored.
    async fn get_secret(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<Option<Zeroizing<String>>, StoreError>;

    /// `Ok(false)` when nothing was stored.
    async fn delete_secret(&self, identity: &Identity, provider: &str) -> Result<bool, StoreError>;

    /// Providers the caller's own tenant has credentials for.
    async fn list_providers(&self, identity: &Identity) -> Result<BTreeSet<String>, StoreError>;

    /// Binary healthy/unhealthy report. Never fails; problems become `Unhealthy`.
    async fn health_check(&self) -> HealthReport;
}
