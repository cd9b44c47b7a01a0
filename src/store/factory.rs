// Lockbox: Storage factory
//
// Turns a `LockboxConfig` into a ready-to-use adapter:
//   1. `validate_config()` runs first and is side-effect free
//   2. the matching adapter is built (key derivation happens here)
//   3. `initialize()` runs before the adapter is handed out
//
// A failure at any step returns an error and drops whatever was built, so a
// caller never holds a half-initialized adapter.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;
use zeroize::Zeroizing;

use super::adapter::{HealthReport, StorageAdapter, StorageKind};
use super::file::FileStorageAdapter;
use super::models::Identity;
use super::null::NullAdapter;
use super::relational::RelationalSecretStore;
use super::StoreError;
use crate::config::{DeploymentEnvironment, LockboxConfig, StorageAdapterConfig, DEV_MASTER_KEY};
use crate::enclave::{KdfParams, MasterSecret};
use crate::telemetry::component_span;

/// Argon2id memory floor outside development (OWASP minimum, KiB).
const MIN_PRODUCTION_M_COST_KIB: u32 = 19_456;

/// Fragments that mark a master key as a placeholder.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "changeme",
    "change-me",
    "change_me",
    "example",
    "default",
    "placeholder",
];

/// A constructed, initialized adapter.
pub enum Storage {
    Relational(RelationalSecretStore),
    File(FileStorageAdapter),
    ClientManaged(NullAdapter),
}

impl Storage {
    /// The relational store, for its audit operations.
    pub fn as_relational(&self) -> Option<&RelationalSecretStore> {
        match self {
            Self::Relational(store) => Some(store),
            _ => None,
        }
    }

    pub fn into_shared(self) -> Arc<dyn StorageAdapter> {
        match self {
            Self::Relational(store) => Arc::new(store),
            Self::File(adapter) => Arc::new(adapter),
            Self::ClientManaged(adapter) => Arc::new(adapter),
        }
    }

    fn inner(&self) -> &dyn StorageAdapter {
        match self {
            Self::Relational(store) => store,
            Self::File(adapter) => adapter,
            Self::ClientManaged(adapter) => adapter,
        }
    }
}

#[async_trait]
impl StorageAdapter for Storage {
    fn kind(&self) -> StorageKind {
        self.inner().kind()
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.inner().initialize().await
    }

    async fn store_secret(
        &self,
        identity: &Identity,
        provider: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.inner().store_secret(identity, provider, value).await
    }

    async fn get_secret(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<Option<Zeroizing<String>>, StoreError> {
        self.inner().get_secret(identity, provider).await
    }

    async fn delete_secret(&self, identity: &Identity, provider: &str) -> Result<bool, StoreError> {
        self.inner().delete_secret(identity, provider).await
    }

    async fn list_providers(&self, identity: &Identity) -> Result<BTreeSet<String>, StoreError> {
        self.inner().list_providers(identity).await
    }

    async fn health_check(&self) -> HealthReport {
        self.inner().health_check().await
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn looks_like_placeholder(secret: &MasterSecret) -> bool {
    let lowered = secret.expose().to_ascii_lowercase();
    secret.expose() == DEV_MASTER_KEY || PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}

fn check_master_key(
    backend: &str,
    key: Option<&MasterSecret>,
    environment: DeploymentEnvironment,
    errors: &mut Vec<String>,
) {
    let Some(key) = key else {
        errors.push(format!(
            "{} storage requires a master key (master_key or LOCKBOX_MASTER_KEY)",
            backend
        ));
        return;
    };

    if let Err(e) = key.check_strength() {
        errors.push(format!("{} storage: {}", backend, e));
    }
    if !environment.is_development() && looks_like_placeholder(key) {
        errors.push(format!(
            "{} storage uses a default or placeholder master key in {}",
            backend, environment
        ));
    }
}

fn check_kdf(
    backend: &str,
    kdf: &KdfParams,
    environment: DeploymentEnvironment,
    errors: &mut Vec<String>,
) {
    if kdf.t_cost == 0 || kdf.p_cost == 0 || kdf.m_cost_kib < 8 * kdf.p_cost {
        errors.push(format!(
            "{} storage: invalid KDF parameters (m_cost_kib must be >= 8 * p_cost, t_cost and p_cost > 0)",
            backend
        ));
    } else if !environment.is_development() && kdf.m_cost_kib < MIN_PRODUCTION_M_COST_KIB {
        errors.push(format!(
            "{} storage: KDF memory cost below {} KiB is not allowed in {}",
            backend, MIN_PRODUCTION_M_COST_KIB, environment
        ));
    }
}

/// Pre-flight check. Touches nothing; returns one message per problem.
pub fn validate_config(config: &LockboxConfig) -> Vec<String> {
    let environment = config.environment;
    let mut errors = Vec::new();

    match &config.storage {
        StorageAdapterConfig::Relational(rel) => {
            if rel.database.as_deref().map_or(true, |p| p.as_os_str().is_empty()) {
                errors.push("relational storage requires `database`".to_string());
            }
            if rel.busy_timeout_ms == 0 {
                errors.push("relational storage: busy_timeout_ms must be > 0".to_string());
            }
            check_master_key("relational", rel.master_key.as_ref(), environment, &mut errors);
            check_kdf("relational", &rel.kdf, environment, &mut errors);
        }
        StorageAdapterConfig::File(file) => {
            if file.path.as_deref().map_or(true, |p| p.as_os_str().is_empty()) {
                errors.push("file storage requires `path`".to_string());
            }
            check_master_key("file", file.master_key.as_ref(), environment, &mut errors);
            check_kdf("file", &file.kdf, environment, &mut errors);
        }
        StorageAdapterConfig::ClientManaged => {}
    }

    errors
}

// ─── Construction ────────────────────────────────────────────────────────────

/// Build and initialize the configured adapter with the default span.
pub async fn create_storage(config: &LockboxConfig) -> Result<Storage, StoreError> {
    let span = component_span(config.storage.kind());
    create_storage_in(config, span).await
}

/// Build and initialize the configured adapter inside `span`.
pub async fn create_storage_in(config: &LockboxConfig, span: Span) -> Result<Storage, StoreError> {
    let errors = validate_config(config);
    if !errors.is_empty() {
        let err = StoreError::Configuration(errors.join("; "));
        span.in_scope(|| tracing::error!(error = %err, "Storage configuration rejected"));
        return Err(err);
    }

    let storage_config = config.storage.clone();
    let build_span = span.clone();
    // Argon2id is CPU-bound; keep it off the async workers.
    let storage = tokio::task::spawn_blocking(move || match &storage_config {
        StorageAdapterConfig::Relational(rel) => {
            RelationalSecretStore::new(rel, build_span).map(Storage::Relational)
        }
        StorageAdapterConfig::File(file) => {
            FileStorageAdapter::new(file, build_span).map(Storage::File)
        }
        StorageAdapterConfig::ClientManaged => {
            Ok(Storage::ClientManaged(NullAdapter::new(build_span)))
        }
    })
    .await
    .map_err(|e| StoreError::Configuration(format!("adapter construction aborted: {}", e)))??;

    storage.initialize().await?;

    span.in_scope(|| {
        tracing::info!(
            backend = %storage.kind(),
            environment = %config.environment,
            "Storage ready"
        );
    });
    Ok(storage)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, RelationalConfig};
    use crate::telemetry::LogConfig;
    use std::path::PathBuf;

    const STRONG_KEY: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn relational(database: Option<PathBuf>, key: Option<&str>) -> LockboxConfig {
        LockboxConfig {
            environment: DeploymentEnvironment::Development,
            storage: StorageAdapterConfig::Relational(RelationalConfig {
                database,
                master_key: key.map(MasterSecret::new),
                kdf: KdfParams::fast(),
                busy_timeout_ms: 5_000,
            }),
            logging: LogConfig::default(),
        }
    }

    fn file(path: Option<PathBuf>, key: Option<&str>) -> LockboxConfig {
        LockboxConfig {
            environment: DeploymentEnvironment::Development,
            storage: StorageAdapterConfig::File(FileConfig {
                path,
                master_key: key.map(MasterSecret::new),
                kdf: KdfParams::fast(),
            }),
            logging: LogConfig::default(),
        }
    }

    #[test]
    fn test_validate_flags_missing_fields() {
        let errors = validate_config(&relational(None, None));
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("database")));
        assert!(errors.iter().any(|e| e.contains("master key")));

        let errors = validate_config(&file(None, Some(STRONG_KEY)));
        assert_eq!(errors, vec!["file storage requires `path`".to_string()]);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let cfg = relational(Some(PathBuf::from("/tmp/x.db")), Some(STRONG_KEY));
        assert!(validate_config(&cfg).is_empty());
        let client = LockboxConfig {
            storage: StorageAdapterConfig::ClientManaged,
            ..cfg
        };
        assert!(validate_config(&client).is_empty());
    }

    #[test]
    fn test_dev_key_refused_outside_development() {
        let mut cfg = relational(Some(PathBuf::from("/tmp/x.db")), Some(DEV_MASTER_KEY));
        cfg.environment = DeploymentEnvironment::Development;
        assert!(validate_config(&cfg).is_empty());

        cfg.environment = DeploymentEnvironment::Production;
        if let StorageAdapterConfig::Relational(rel) = &mut cfg.storage {
            rel.kdf = KdfParams::default();
        }
        let errors = validate_config(&cfg);
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("placeholder"));
        assert!(!errors[0].contains(DEV_MASTER_KEY));
    }

    #[test]
    fn test_placeholder_and_weak_keys() {
        let mut cfg = file(
            Some(PathBuf::from("/tmp/s.json")),
            Some("please-changeme-before-going-live-0123456789"),
        );
        cfg.environment = DeploymentEnvironment::Staging;
        if let StorageAdapterConfig::File(f) = &mut cfg.storage {
            f.kdf = KdfParams::default();
        }
        assert_eq!(validate_config(&cfg).len(), 1);

        let weak = file(Some(PathBuf::from("/tmp/s.json")), Some("short"));
        assert!(validate_config(&weak)[0].contains("too short"));
    }

    #[test]
    fn test_kdf_parameters_checked() {
        let mut cfg = relational(Some(PathBuf::from("/tmp/x.db")), Some(STRONG_KEY));
        if let StorageAdapterConfig::Relational(rel) = &mut cfg.storage {
            rel.kdf.t_cost = 0;
        }
        assert!(validate_config(&cfg)[0].contains("KDF"));

        // fast test parameters are fine in development, not in production
        let mut cfg = relational(Some(PathBuf::from("/tmp/x.db")), Some(STRONG_KEY));
        assert!(validate_config(&cfg).is_empty());
        cfg.environment = DeploymentEnvironment::Production;
        assert!(validate_config(&cfg)[0].contains("memory cost"));
    }

    #[tokio::test]
    async fn test_create_relational_storage_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = relational(Some(dir.path().join("db").join("lockbox.db")), Some(STRONG_KEY));
        let storage = create_storage(&cfg).await.unwrap();
        assert_eq!(storage.kind(), StorageKind::Relational);
        assert!(storage.as_relational().is_some());

        let alice = Identity::from("alice@x.com");
        storage.store_secret(&alice, "anthropic", "sk-ant-AAAA").await.unwrap();
        assert_eq!(
            storage.get_secret(&alice, "anthropic").await.unwrap().unwrap().as_str(),
            "sk-ant-AAAA"
        );
        assert!(storage.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn test_create_file_storage_shares_as_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = file(Some(dir.path().join("secrets.json")), Some(STRONG_KEY));
        let shared = create_storage(&cfg).await.unwrap().into_shared();
        assert_eq!(shared.kind(), StorageKind::File);
        assert!(dir.path().join("secrets.json").exists());
    }

    #[tokio::test]
    async fn test_create_client_managed() {
        let cfg = LockboxConfig {
            storage: StorageAdapterConfig::ClientManaged,
            ..relational(None, None)
        };
        let storage = create_storage(&cfg).await.unwrap();
        assert_eq!(storage.kind(), StorageKind::ClientManaged);
        assert!(matches!(
            storage.get_secret(&"alice@x.com".into(), "openai").await,
            Err(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let err = create_storage(&relational(None, Some("short")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert!(err.to_string().contains("database"));
        assert!(err.to_string().contains("too short"));
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, "garbage").unwrap();
        let result = create_storage(&file(Some(path), Some(STRONG_KEY))).await;
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }
}
