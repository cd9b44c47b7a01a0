// Lockbox: Store Module
//
// Tenant-isolated secret storage. Every backend implements `StorageAdapter`;
// the relational and file backends seal values with AES-256-GCM before they
// touch disk, and the relational backend audit-logs every access attempt.

mod adapter;
mod audit;
mod db;
mod error;
mod factory;
mod file;
mod models;
mod null;
mod probe;
mod relational;

use std::path::{Path, PathBuf};

pub use adapter::{HealthDetails, HealthReport, HealthStatus, StorageAdapter, StorageKind};
pub use audit::AuditChainReport;
pub use error::{BackendError, StoreError};
pub use factory::{create_storage, create_storage_in, validate_config, Storage};
pub use file::FileStorageAdapter;
pub use models::{
    AuditRecord, ClientMeta, Identity, Operation, MAX_IDENTITY_LEN, MAX_PROVIDER_LEN,
    MAX_SECRET_LEN,
};
pub use null::NullAdapter;
pub use probe::{test_storage, SelfTestOutcome, SelfTestStage};
pub use relational::RelationalSecretStore;

/// Anchor a relative path to the current working directory.
pub(crate) fn resolve_path(path: &Path) -> Result<PathBuf, StoreError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| {
            StoreError::Configuration(format!(
                "cannot resolve relative path {}: {}",
                path.display(),
                e
            ))
        })
}
