// Lockbox: Relational secret store
//
// SQLite-backed implementation of `StorageAdapter`. Each call:
//   1. validates input and resolves the tenant
//   2. opens a fresh connection on the blocking pool
//   3. runs exactly one tenant-scoped statement
//   4. appends one audit row for the attempt, success or failure
//
// An audit write that fails is logged at error level and otherwise ignored;
// it never changes what the caller gets back. Every statement that touches
// `secrets` is keyed on a single `tenantId` bind parameter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::Span;
use zeroize::{Zeroize, Zeroizing};

use super::adapter::{HealthDetails, HealthReport, StorageAdapter, StorageKind};
use super::audit::{self, AuditChainReport, AuditEntry};
use super::db::Database;
use super::models::{
    secret_key, validate_provider, validate_value, AuditRecord, ClientMeta, Identity, Operation,
    SecretRow,
};
use super::{resolve_path, StoreError};
use crate::config::RelationalConfig;
use crate::enclave::{self, DataKey};
use crate::tenant::TenantId;

const UPSERT_SQL: &str = "
    INSERT INTO secrets (tenantId, secretKey, encryptedValue, provider, identity, createdAt, updatedAt)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
    ON CONFLICT (tenantId, secretKey) DO UPDATE SET
        encryptedValue = excluded.encryptedValue,
        identity       = excluded.identity,
        updatedAt      = excluded.updatedAt";

/// Who is doing what, captured once per call.
struct Access {
    operation: Operation,
    tenant: TenantId,
    identity: String,
    provider: Option<String>,
    client_meta: Option<ClientMeta>,
}

impl Access {
    fn connection_error(&self, source: impl Into<super::error::BackendError>) -> StoreError {
        StoreError::connection(
            self.operation,
            self.provider.as_deref(),
            Some(&self.tenant),
            source,
        )
    }

    fn integrity_error(&self) -> StoreError {
        StoreError::Integrity {
            operation: self.operation,
            provider: self.provider.clone().unwrap_or_default(),
            tenant: self.tenant.clone(),
        }
    }
}

/// Outcome of the primary statement plus what the audit row should say.
struct Attempt<T> {
    result: Result<T, StoreError>,
    failure: Option<String>,
}

impl<T> Attempt<T> {
    fn from_result(result: Result<T, StoreError>) -> Self {
        let failure = result.as_ref().err().map(ToString::to_string);
        Self { result, failure }
    }

    /// A successful call that found nothing. Audited as a failed attempt.
    fn not_found(value: T) -> Self {
        Self {
            result: Ok(value),
            failure: Some("not found".to_string()),
        }
    }
}

/// Secret store over an embedded SQLite database.
pub struct RelationalSecretStore {
    path: PathBuf,
    busy_timeout: Duration,
    key: DataKey,
    span: Span,
}

impl RelationalSecretStore {
    /// Build from configuration. Derives the data key, so this is CPU-heavy.
    pub fn new(config: &RelationalConfig, span: Span) -> Result<Self, StoreError> {
        let database = config.database.as_deref().ok_or_else(|| {
            StoreError::Configuration("relational storage requires `database`".into())
        })?;
        let secret = config.master_key.as_ref().ok_or_else(|| {
            StoreError::Configuration("relational storage requires a master key".into())
        })?;
        let key = enclave::derive_key(secret, &config.kdf)
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        Self::with_key(
            database,
            key,
            Duration::from_millis(config.busy_timeout_ms),
            span,
        )
    }

    /// Build around an already-derived key.
    pub fn with_key(
        database: &Path,
        key: DataKey,
        busy_timeout: Duration,
        span: Span,
    ) -> Result<Self, StoreError> {
        let path = resolve_path(database)?;
        span.in_scope(|| tracing::debug!(path = %path.display(), "Relational store configured"));
        Ok(Self {
            path,
            busy_timeout,
            key,
            span,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate the caller and capture the access context.
    fn access(
        &self,
        operation: Operation,
        identity: &Identity,
        provider: Option<&str>,
    ) -> Result<Access, StoreError> {
        let checked = identity
            .resolve()
            .and_then(|tenant| provider.map_or(Ok(()), validate_provider).map(|()| tenant));

        match checked {
            Ok(tenant) => Ok(Access {
                operation,
                tenant,
                identity: identity.as_str().trim().to_string(),
                provider: provider.map(str::to_string),
                client_meta: identity.client_meta().cloned(),
            }),
            Err(err) => {
                self.span.in_scope(|| {
                    tracing::warn!(operation = %operation, error = %err, "Rejected invalid request");
                });
                Err(err)
            }
        }
    }

    /// Run one audited operation on the blocking pool.
    async fn execute<T, F>(&self, access: Access, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &DataKey, &Access) -> Attempt<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let key = self.key.clone();
        let span = self.span.clone();
        let operation = access.operation;
        let tenant = access.tenant.clone();
        let provider = access.provider.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();

            let (attempt, db) = match Database::open(&path, busy_timeout) {
                Ok(db) => (op(db.conn(), &key, &access), Some(db)),
                Err(e) => (Attempt::from_result(Err(access.connection_error(e))), None),
            };

            log_outcome(&access, &attempt);
            record_audit(db, &path, busy_timeout, &access, attempt.failure.as_deref());
            attempt.result
        })
        .await;

        joined.unwrap_or_else(|e| {
            Err(StoreError::connection(
                operation,
                provider.as_deref(),
                Some(&tenant),
                e,
            ))
        })
    }

    /// Run an unaudited read or maintenance step on the blocking pool.
    async fn run_blocking<T, F>(
        &self,
        operation: Operation,
        tenant: Option<&TenantId>,
        f: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let span = self.span.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut db = Database::open(&path, busy_timeout)?;
            f(&mut db)
        })
        .await;

        let result = match joined {
            Ok(inner) => inner.map_err(|e| StoreError::connection(operation, None, tenant, e)),
            Err(e) => Err(StoreError::connection(operation, None, tenant, e)),
        };
        if let Err(err) = &result {
            self.span.in_scope(|| {
                tracing::error!(
                    operation = %operation,
                    kind = err.kind(),
                    error = %err,
                    cause = %err.cause_text(),
                    "Relational store operation failed"
                );
            });
        }
        result
    }

    /// The caller's own audit trail, newest first.
    pub async fn audit_trail(
        &self,
        identity: &Identity,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let access = self.access(Operation::AuditTrail, identity, None)?;
        let tenant = access.tenant.clone();
        self.run_blocking(Operation::AuditTrail, Some(&access.tenant), move |db| {
            audit::trail(db.conn(), &tenant, limit)
        })
        .await
    }

    /// Walk the whole audit chain. Reports only counts and a row ID.
    pub async fn verify_audit_chain(&self) -> Result<AuditChainReport, StoreError> {
        let report = self
            .run_blocking(Operation::VerifyAudit, None, |db| audit::verify_chain(db.conn()))
            .await?;

        self.span.in_scope(|| match report.first_broken_id {
            None => tracing::info!(records = report.records_checked, "Audit chain intact"),
            Some(id) => tracing::error!(
                records = report.records_checked,
                broken_at = id,
                "Audit chain broken"
            ),
        });
        Ok(report)
    }
}

#[async_trait]
impl StorageAdapter for RelationalSecretStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Relational
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Configuration(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e.kind()
                ))
            })?;
        }

        self.run_blocking(Operation::Initialize, None, |db| db.run_migrations())
            .await?;

        self.span.in_scope(|| {
            tracing::info!(path = %self.path.display(), "Relational store initialized");
        });
        Ok(())
    }

    async fn store_secret(
        &self,
        identity: &Identity,
        provider: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let access = self.access(Operation::Store, identity, Some(provider))?;
        if let Err(err) = validate_value(value) {
            self.span.in_scope(|| {
                tracing::warn!(operation = %Operation::Store, error = %err, "Rejected invalid request");
            });
            return Err(err);
        }

        let value = Zeroizing::new(value.to_string());
        let provider = provider.to_string();
        self.execute(access, move |conn, key, access| {
            Attempt::from_result(upsert(conn, key, access, &provider, &value))
        })
        .await
    }

    async fn get_secret(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<Option<Zeroizing<String>>, StoreError> {
        let access = self.access(Operation::Get, identity, Some(provider))?;
        let provider = provider.to_string();
        self.execute(access, move |conn, key, access| {
            match fetch_row(conn, &access.tenant, &provider) {
                Err(e) => Attempt::from_result(Err(access.connection_error(e))),
                Ok(None) => Attempt::not_found(None),
                Ok(Some(row)) => Attempt::from_result(open_row(&row, key, access).map(Some)),
            }
        })
        .await
    }

    async fn delete_secret(&self, identity: &Identity, provider: &str) -> Result<bool, StoreError> {
        let access = self.access(Operation::Delete, identity, Some(provider))?;
        let provider = provider.to_string();
        self.execute(access, move |conn, _key, access| {
            let removed = conn.execute(
                "DELETE FROM secrets WHERE tenantId = ?1 AND secretKey = ?2",
                params![access.tenant.as_str(), secret_key(&provider)],
            );
            match removed {
                Ok(0) => Attempt::not_found(false),
                Ok(_) => Attempt::from_result(Ok(true)),
                Err(e) => Attempt::from_result(Err(access.connection_error(e))),
            }
        })
        .await
    }

    async fn list_providers(&self, identity: &Identity) -> Result<BTreeSet<String>, StoreError> {
        let access = self.access(Operation::List, identity, None)?;
        self.execute(access, |conn, _key, access| {
            Attempt::from_result(
                providers_for(conn, &access.tenant).map_err(|e| access.connection_error(e)),
            )
        })
        .await
    }

    async fn health_check(&self) -> HealthReport {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let started = Instant::now();

        let joined = tokio::task::spawn_blocking(move || {
            let db = Database::open_existing(&path, busy_timeout)?;
            collect_health(db.conn())
        })
        .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let failure = match joined {
            Ok(Ok(mut details)) => {
                details.latency_ms = latency_ms;
                return HealthReport::healthy(StorageKind::Relational, details);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        self.span.in_scope(|| {
            tracing::error!(cause = %failure, latency_ms, "Relational health check failed");
        });
        HealthReport::unhealthy(StorageKind::Relational, latency_ms, "database unreachable")
    }
}

// ─── Statements ──────────────────────────────────────────────────────────────

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn upsert(
    conn: &Connection,
    key: &DataKey,
    access: &Access,
    provider: &str,
    value: &str,
) -> Result<(), StoreError> {
    let blob = enclave::encrypt(value.as_bytes(), key).map_err(|e| access.connection_error(e))?;
    conn.execute(
        UPSERT_SQL,
        params![
            access.tenant.as_str(),
            secret_key(provider),
            blob,
            provider,
            access.identity,
            timestamp_now(),
        ],
    )
    .map_err(|e| access.connection_error(e))?;
    Ok(())
}

fn fetch_row(
    conn: &Connection,
    tenant: &TenantId,
    provider: &str,
) -> rusqlite::Result<Option<SecretRow>> {
    conn.query_row(
        "SELECT tenantId, secretKey, encryptedValue, provider, createdAt, updatedAt
         FROM secrets WHERE tenantId = ?1 AND secretKey = ?2",
        params![tenant.as_str(), secret_key(provider)],
        |row| {
            let created_at: String = row.get(4)?;
            let updated_at: String = row.get(5)?;
            Ok(SecretRow {
                tenant_id: TenantId::from_stored(row.get(0)?),
                secret_key: row.get(1)?,
                encrypted_value: row.get(2)?,
                provider: row.get(3)?,
                created_at: parse_timestamp(4, &created_at)?,
                updated_at: parse_timestamp(5, &updated_at)?,
            })
        },
    )
    .optional()
}

/// Decrypt a row. Any authentication or encoding failure is an integrity error.
fn open_row(row: &SecretRow, key: &DataKey, access: &Access) -> Result<Zeroizing<String>, StoreError> {
    let mut plain =
        enclave::decrypt(&row.encrypted_value, key).map_err(|_| access.integrity_error())?;
    match String::from_utf8(std::mem::take(&mut *plain)) {
        Ok(text) => Ok(Zeroizing::new(text)),
        Err(e) => {
            e.into_bytes().zeroize();
            Err(access.integrity_error())
        }
    }
}

fn providers_for(conn: &Connection, tenant: &TenantId) -> rusqlite::Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT provider FROM secrets WHERE tenantId = ?1")?;
    let rows = stmt.query_map(params![tenant.as_str()], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn collect_health(conn: &Connection) -> rusqlite::Result<HealthDetails> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    let (secrets, tenants, providers) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT tenantId), COUNT(DISTINCT provider) FROM secrets",
        [],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
    )?;
    let audit_records: i64 =
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;

    let count = |n: i64| Some(u64::try_from(n).unwrap_or_default());
    Ok(HealthDetails {
        secrets: count(secrets),
        tenants: count(tenants),
        providers: count(providers),
        audit_records: count(audit_records),
        ..HealthDetails::default()
    })
}

// ─── Audit + logging ─────────────────────────────────────────────────────────

fn log_outcome<T>(access: &Access, attempt: &Attempt<T>) {
    let tenant = access.tenant.short();
    let provider = access.provider.as_deref().unwrap_or("*");
    match &attempt.result {
        Ok(_) if attempt.failure.is_none() => tracing::debug!(
            operation = %access.operation, tenant, provider, "Operation completed"
        ),
        Ok(_) => tracing::debug!(
            operation = %access.operation, tenant, provider, "No secret stored"
        ),
        Err(err @ StoreError::Integrity { .. }) => tracing::error!(
            operation = %access.operation, tenant, provider, error = %err,
            "Stored ciphertext failed authentication"
        ),
        Err(err) => tracing::error!(
            operation = %access.operation, tenant, provider, kind = err.kind(), error = %err,
            cause = %err.cause_text(), "Operation failed"
        ),
    }
}

/// Append the audit row. Failure is logged and swallowed.
fn record_audit(
    db: Option<Database>,
    path: &Path,
    busy_timeout: Duration,
    access: &Access,
    failure: Option<&str>,
) {
    let entry = AuditEntry {
        tenant_id: &access.tenant,
        identity: &access.identity,
        operation: access.operation,
        provider: access.provider.as_deref(),
        success: failure.is_none(),
        error_message: failure,
        client_meta: access.client_meta.as_ref(),
    };

    let written = match db {
        Some(mut db) => audit::append(db.conn_mut(), &entry),
        None => Database::open(path, busy_timeout)
            .and_then(|mut db| audit::append(db.conn_mut(), &entry)),
    };

    if let Err(e) = written {
        tracing::error!(
            operation = %access.operation,
            tenant = access.tenant.short(),
            error = %e,
            "Audit write failed; operation result unchanged"
        );
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
