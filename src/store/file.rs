// Lockbox: File storage adapter
//
// One JSON document on disk:
//
//   { "version": 1, "entries": { "<tenantId>:<provider>": "<iv>:<tag>:<ct>" } }
//
// Every entry is a sealed envelope; no plaintext is ever written. Mutations
// read the document, change one entry, and write the whole document back
// through `<file>.tmp` + fsync + rename, so a crash leaves either the old or
// the new document and never a torn one.
//
// Single-process only. Mutations inside this process go through one async
// write gate; a second process writing the same file is not coordinated.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::Span;
use zeroize::{Zeroize, Zeroizing};

use super::adapter::{HealthDetails, HealthReport, StorageAdapter, StorageKind};
use super::error::BackendError;
use super::models::{validate_provider, validate_value, Identity, Operation};
use super::{resolve_path, StoreError};
use crate::config::FileConfig;
use crate::enclave::{self, DataKey};
use crate::tenant::TenantId;

/// Only layout version this adapter reads or writes.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

fn entry_key(tenant: &TenantId, provider: &str) -> String {
    format!("{}:{}", tenant.as_str(), provider)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read the document. A missing file reads as empty.
fn read_document(path: &Path) -> Result<Document, BackendError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::default()),
        Err(e) => return Err(e.into()),
    };
    let document: Document = serde_json::from_slice(&raw)?;
    if document.version != DOCUMENT_VERSION {
        return Err(BackendError::Other(format!(
            "unsupported document version {}",
            document.version
        )));
    }
    Ok(document)
}

/// Atomic write: temp file, fsync, rename.
fn write_document(path: &Path, document: &Document) -> Result<(), BackendError> {
    let json = serde_json::to_vec_pretty(document)?;
    let tmp = tmp_path(path);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Secret store over a single JSON document.
pub struct FileStorageAdapter {
    path: PathBuf,
    key: DataKey,
    write_gate: Mutex<()>,
    span: Span,
}

impl FileStorageAdapter {
    pub fn new(config: &FileConfig, span: Span) -> Result<Self, StoreError> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| StoreError::Configuration("file storage requires `path`".into()))?;
        let secret = config.master_key.as_ref().ok_or_else(|| {
            StoreError::Configuration("file storage requires a master key".into())
        })?;
        let key = enclave::derive_key(secret, &config.kdf)
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        Self::with_key(path, key, span)
    }

    /// Relative paths resolve against the working directory, once, here.
    pub fn with_key(path: &Path, key: DataKey, span: Span) -> Result<Self, StoreError> {
        let path = resolve_path(path)?;
        span.in_scope(|| tracing::debug!(path = %path.display(), "File store configured"));
        Ok(Self {
            path,
            key,
            write_gate: Mutex::new(()),
            span,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate(
        &self,
        operation: Operation,
        identity: &Identity,
        provider: Option<&str>,
    ) -> Result<TenantId, StoreError> {
        let checked = identity
            .resolve()
            .and_then(|tenant| provider.map_or(Ok(()), validate_provider).map(|()| tenant));
        if let Err(err) = &checked {
            self.span.in_scope(|| {
                tracing::warn!(operation = %operation, error = %err, "Rejected invalid request");
            });
        }
        checked
    }

    async fn load(&self) -> Result<Document, BackendError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_document(&path)).await?
    }

    /// Read, apply `change`, write back. Runs under the write gate.
    async fn mutate<T, F>(&self, change: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Document) -> Result<(T, bool), BackendError> + Send + 'static,
    {
        let _gate = self.write_gate.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut document = read_document(&path)?;
            let (out, dirty) = change(&mut document)?;
            if dirty {
                write_document(&path, &document)?;
            }
            Ok(out)
        })
        .await?
    }

    fn fail(
        &self,
        operation: Operation,
        provider: Option<&str>,
        tenant: &TenantId,
        source: BackendError,
    ) -> StoreError {
        let err = StoreError::connection(operation, provider, Some(tenant), source);
        self.span.in_scope(|| {
            tracing::error!(
                operation = %operation,
                tenant = tenant.short(),
                kind = err.kind(),
                error = %err,
                cause = %err.cause_text(),
                "File store operation failed"
            );
        });
        err
    }
}

#[async_trait]
impl StorageAdapter for FileStorageAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Configuration(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e.kind()
                ))
            })?;
        }

        let path = self.path.clone();
        let created = self
            .mutate(move |_document| {
                let fresh = !path.exists();
                Ok((fresh, fresh))
            })
            .await
            .map_err(|e| match e {
                BackendError::Json(_) | BackendError::Other(_) => StoreError::Configuration(
                    format!("{} is not a valid secrets document: {}", self.path.display(), e),
                ),
                other => StoreError::connection(Operation::Initialize, None, None, other),
            })?;

        self.span.in_scope(|| {
            tracing::info!(path = %self.path.display(), created, "File store initialized");
        });
        Ok(())
    }

    async fn store_secret(
        &self,
        identity: &Identity,
        provider: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let tenant = self.validate(Operation::Store, identity, Some(provider))?;
        validate_value(value)?;

        let blob = enclave::encrypt(value.as_bytes(), &self.key)
            .map_err(|e| self.fail(Operation::Store, Some(provider), &tenant, e.into()))?;
        let key = entry_key(&tenant, provider);

        self.mutate(move |document| {
            document.entries.insert(key, blob);
            Ok(((), true))
        })
        .await
        .map_err(|e| self.fail(Operation::Store, Some(provider), &tenant, e))?;

        self.span.in_scope(|| {
            tracing::debug!(operation = %Operation::Store, tenant = tenant.short(), provider, "Operation completed");
        });
        Ok(())
    }

    async fn get_secret(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<Option<Zeroizing<String>>, StoreError> {
        let tenant = self.validate(Operation::Get, identity, Some(provider))?;
        let document = self
            .load()
            .await
            .map_err(|e| self.fail(Operation::Get, Some(provider), &tenant, e))?;

        let Some(blob) = document.entries.get(&entry_key(&tenant, provider)) else {
            self.span.in_scope(|| {
                tracing::debug!(operation = %Operation::Get, tenant = tenant.short(), provider, "No secret stored");
            });
            return Ok(None);
        };

        let integrity = || {
            self.span.in_scope(|| {
                tracing::error!(
                    operation = %Operation::Get,
                    tenant = tenant.short(),
                    provider,
                    "Stored ciphertext failed authentication"
                );
            });
            StoreError::Integrity {
                operation: Operation::Get,
                provider: provider.to_string(),
                tenant: tenant.clone(),
            }
        };

        let mut plain = enclave::decrypt(blob, &self.key).map_err(|_| integrity())?;
        match String::from_utf8(std::mem::take(&mut *plain)) {
            Ok(text) => Ok(Some(Zeroizing::new(text))),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(integrity())
            }
        }
    }

    async fn delete_secret(&self, identity: &Identity, provider: &str) -> Result<bool, StoreError> {
        let tenant = self.validate(Operation::Delete, identity, Some(provider))?;
        let key = entry_key(&tenant, provider);

        let removed = self
            .mutate(move |document| {
                let removed = document.entries.remove(&key).is_some();
                Ok((removed, removed))
            })
            .await
            .map_err(|e| self.fail(Operation::Delete, Some(provider), &tenant, e))?;

        self.span.in_scope(|| {
            tracing::debug!(operation = %Operation::Delete, tenant = tenant.short(), provider, removed, "Operation completed");
        });
        Ok(removed)
    }

    async fn list_providers(&self, identity: &Identity) -> Result<BTreeSet<String>, StoreError> {
        let tenant = self.validate(Operation::List, identity, None)?;
        let document = self
            .load()
            .await
            .map_err(|e| self.fail(Operation::List, None, &tenant, e))?;

        let prefix = format!("{}:", tenant.as_str());
        Ok(document
            .entries
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let loaded = self.load().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match loaded {
            Ok(document) => {
                let mut tenants = BTreeSet::new();
                let mut providers = BTreeSet::new();
                for key in document.entries.keys() {
                    if let Some((tenant, provider)) = key.split_once(':') {
                        tenants.insert(tenant);
                        providers.insert(provider);
                    }
                }
                HealthReport::healthy(
                    StorageKind::File,
                    HealthDetails {
                        secrets: Some(document.entries.len() as u64),
                        tenants: Some(tenants.len() as u64),
                        providers: Some(providers.len() as u64),
                        latency_ms,
                        ..HealthDetails::default()
                    },
                )
            }
            Err(e) => {
                self.span.in_scope(|| {
                    tracing::error!(cause = %e, latency_ms, "File health check failed");
                });
                HealthReport::unhealthy(StorageKind::File, latency_ms, "secrets document unreadable")
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::{EnvelopeParts, KdfParams, MasterSecret};
    use crate::store::models::samples;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_adapter() -> (TempDir, FileStorageAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileStorageAdapter::with_key(
            &dir.path().join("vault").join("secrets.json"),
            DataKey::from_bytes([3u8; 32]),
            Span::none(),
        )
        .unwrap();
        adapter.initialize().await.unwrap();
        (dir, adapter)
    }

    fn on_disk(adapter: &FileStorageAdapter) -> serde_json::Value {
        serde_json::from_slice(&fs::read(adapter.path()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_empty_document() {
        let (_dir, adapter) = test_adapter().await;
        let doc = on_disk(&adapter);
        assert_eq!(doc["version"], 1);
        assert!(doc["entries"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_get_delete() {
        let (_dir, adapter) = test_adapter().await;
        let alice = Identity::from("alice@x.com");
        adapter.store_secret(&alice, "anthropic", "sk-ant-AAAA").await.unwrap();

        let value = adapter.get_secret(&alice, "anthropic").await.unwrap().unwrap();
        assert_eq!(value.as_str(), "sk-ant-AAAA");
        assert!(adapter
            .get_secret(&"bob@x.com".into(), "anthropic")
            .await
            .unwrap()
            .is_none());

        assert!(adapter.delete_secret(&alice, "anthropic").await.unwrap());
        assert!(!adapter.delete_secret(&alice, "anthropic").await.unwrap());
    }

    #[tokio::test]
    async fn test_document_layout_and_no_plaintext() {
        let (_dir, adapter) = test_adapter().await;
        let alice = Identity::from("alice@x.com");
        adapter.store_secret(&alice, "openai", "sk-openai-MARKER").await.unwrap();

        let doc = on_disk(&adapter);
        let key = format!("{}:openai", alice.tenant_id());
        let blob = doc["entries"][&key].as_str().unwrap();
        assert_eq!(blob.split(':').count(), 3);

        let raw = fs::read_to_string(adapter.path()).unwrap();
        assert!(!raw.contains("sk-openai-MARKER"));
        assert!(!tmp_path(adapter.path()).exists());
    }

    #[tokio::test]
    async fn test_random_values_roundtrip_and_stay_sealed() {
        let (_dir, adapter) = test_adapter().await;

        for case in samples::cases(24) {
            let identity = Identity::new(case.identity.as_str());
            adapter
                .store_secret(&identity, &case.provider, &case.value)
                .await
                .unwrap();

            let read = adapter.get_secret(&identity, &case.provider).await.unwrap();
            assert_eq!(read.as_deref().map(String::as_str), Some(case.value.as_str()));

            let doc = on_disk(&adapter);
            let key = entry_key(&identity.tenant_id(), &case.provider);
            let blob = doc["entries"][&key].as_str().unwrap();
            assert!(!blob.contains(&case.value), "{} byte value leaked", case.value.len());
        }
    }

    #[tokio::test]
    async fn test_initialize_preserves_existing_entries() {
        let (_dir, adapter) = test_adapter().await;
        let alice = Identity::from("alice@x.com");
        adapter.store_secret(&alice, "anthropic", "a1").await.unwrap();
        adapter.initialize().await.unwrap();
        assert!(adapter.get_secret(&alice, "anthropic").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_document_fails_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, b"{not json").unwrap();
        let adapter =
            FileStorageAdapter::with_key(&path, DataKey::from_bytes([3u8; 32]), Span::none())
                .unwrap();

        let err = adapter.initialize().await.unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert!(!adapter.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, br#"{"version": 2, "entries": {}}"#).unwrap();
        let adapter =
            FileStorageAdapter::with_key(&path, DataKey::from_bytes([3u8; 32]), Span::none())
                .unwrap();
        assert!(matches!(
            adapter.initialize().await,
            Err(StoreError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_tag_is_integrity_error() {
        let (_dir, adapter) = test_adapter().await;
        let alice = Identity::from("alice@x.com");
        adapter.store_secret(&alice, "anthropic", "sk-ant-AAAA").await.unwrap();

        let mut doc = on_disk(&adapter);
        let key = format!("{}:anthropic", alice.tenant_id());
        let mut parts = EnvelopeParts::parse(doc["entries"][&key].as_str().unwrap()).unwrap();
        parts.tag[15] ^= 0x80;
        doc["entries"][&key] = serde_json::Value::String(parts.encode());
        fs::write(adapter.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = adapter.get_secret(&alice, "anthropic").await.unwrap_err();
        assert!(matches!(err, StoreError::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_list_is_tenant_scoped() {
        let (_dir, adapter) = test_adapter().await;
        adapter.store_secret(&"alice@x.com".into(), "anthropic", "a1").await.unwrap();
        adapter.store_secret(&"alice@x.com".into(), "openai", "a2").await.unwrap();
        adapter.store_secret(&"bob@x.com".into(), "mistral", "b1").await.unwrap();

        let alice = adapter.list_providers(&"alice@x.com".into()).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.contains("anthropic") && alice.contains("openai"));

        let report = adapter.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.details.secrets, Some(3));
        assert_eq!(report.details.tenants, Some(2));
        assert_eq!(report.details.providers, Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_in_process_lose_nothing() {
        let (_dir, adapter) = test_adapter().await;
        let adapter = Arc::new(adapter);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    let identity = Identity::new(format!("user{}@x.com", i));
                    adapter.store_secret(&identity, "openai", &format!("sk-{}", i)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            let identity = Identity::new(format!("user{}@x.com", i));
            let value = adapter.get_secret(&identity, "openai").await.unwrap().unwrap();
            assert_eq!(value.as_str(), format!("sk-{}", i));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_document_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, adapter) = test_adapter().await;
        adapter.store_secret(&"alice@x.com".into(), "openai", "a1").await.unwrap();
        let mode = fs::metadata(adapter.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_relative_path_resolved_at_construction() {
        let config = FileConfig {
            path: Some(PathBuf::from("data/secrets.json")),
            master_key: Some(MasterSecret::new("an-operator-secret-that-is-long-enough-0123")),
            kdf: KdfParams::fast(),
        };
        let adapter = FileStorageAdapter::new(&config, Span::none()).unwrap();
        assert!(adapter.path().is_absolute());
        assert!(adapter.path().ends_with("data/secrets.json"));
    }
}
