// Lockbox: Audit trail
//
// Every access attempt against the relational store appends one row to
// `audit_log`. Rows form a hash chain: `entryHash` covers the previous row's
// hash plus every field of the row, so any edit or removal is detectable by
// `verify_chain`. Appends run inside `BEGIN IMMEDIATE`, which makes SQLite
// hand out the chain tip to one writer at a time.
//
// This module only ever INSERTs and SELECTs. There is no update or delete
// path, and the schema's triggers reject both.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::models::{AuditRecord, ClientMeta, Operation};
use crate::tenant::TenantId;

/// `prevHash` of the very first row.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A row about to be appended.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub tenant_id: &'a TenantId,
    pub identity: &'a str,
    pub operation: Operation,
    pub provider: Option<&'a str>,
    pub success: bool,
    pub error_message: Option<&'a str>,
    pub client_meta: Option<&'a ClientMeta>,
}

/// Result of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditChainReport {
    pub records_checked: u64,
    /// ID of the first row whose hash or link doesn't match, if any.
    pub first_broken_id: Option<i64>,
}

impl AuditChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken_id.is_none()
    }
}

/// Length-prefixed field so adjacent fields can't be shifted into each other.
fn hash_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_be_bytes());
            hasher.update(v.as_bytes());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_hash(
    prev_hash: &str,
    tenant_id: &str,
    identity: &str,
    operation: &str,
    provider: Option<&str>,
    success: bool,
    error_message: Option<&str>,
    client_meta: Option<&str>,
    timestamp: &str,
) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, Some(prev_hash));
    hash_field(&mut hasher, Some(tenant_id));
    hash_field(&mut hasher, Some(identity));
    hash_field(&mut hasher, Some(operation));
    hash_field(&mut hasher, provider);
    hash_field(&mut hasher, Some(if success { "1" } else { "0" }));
    hash_field(&mut hasher, error_message);
    hash_field(&mut hasher, client_meta);
    hash_field(&mut hasher, Some(timestamp));
    hex::encode(hasher.finalize())
}

/// Append one entry to the chain. Returns the new row ID.
pub fn append(conn: &mut Connection, entry: &AuditEntry<'_>) -> rusqlite::Result<i64> {
    let client_meta = entry
        .client_meta
        .and_then(|meta| serde_json::to_string(meta).ok());
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let prev_hash = tx
        .query_row(
            "SELECT entryHash FROM audit_log ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let entry_hash = compute_hash(
        &prev_hash,
        entry.tenant_id.as_str(),
        entry.identity,
        entry.operation.as_str(),
        entry.provider,
        entry.success,
        entry.error_message,
        client_meta.as_deref(),
        &timestamp,
    );

    tx.execute(
        "INSERT INTO audit_log (tenantId, identity, operation, provider, success,
                                errorMessage, clientMeta, timestamp, prevHash, entryHash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.tenant_id.as_str(),
            entry.identity,
            entry.operation.as_str(),
            entry.provider,
            entry.success,
            entry.error_message,
            client_meta,
            timestamp,
            prev_hash,
            entry_hash,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::debug!(
        audit_id = id,
        tenant = entry.tenant_id.short(),
        operation = %entry.operation,
        success = entry.success,
        "Audit log entry recorded"
    );
    Ok(id)
}

/// Raw column values, in table order.
struct RawRow {
    id: i64,
    tenant_id: String,
    identity: String,
    operation: String,
    provider: Option<String>,
    success: bool,
    error_message: Option<String>,
    client_meta: Option<String>,
    timestamp: String,
    prev_hash: String,
    entry_hash: String,
}

const SELECT_COLUMNS: &str = "id, tenantId, identity, operation, provider, success,
     errorMessage, clientMeta, timestamp, prevHash, entryHash";

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        identity: row.get(2)?,
        operation: row.get(3)?,
        provider: row.get(4)?,
        success: row.get(5)?,
        error_message: row.get(6)?,
        client_meta: row.get(7)?,
        timestamp: row.get(8)?,
        prev_hash: row.get(9)?,
        entry_hash: row.get(10)?,
    })
}

impl RawRow {
    fn recompute_hash(&self) -> String {
        compute_hash(
            &self.prev_hash,
            &self.tenant_id,
            &self.identity,
            &self.operation,
            self.provider.as_deref(),
            self.success,
            self.error_message.as_deref(),
            self.client_meta.as_deref(),
            &self.timestamp,
        )
    }

    fn into_record(self) -> rusqlite::Result<AuditRecord> {
        let operation = serde_json::from_value(serde_json::Value::String(self.operation))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
            })?;
        let client_meta = self
            .client_meta
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        Ok(AuditRecord {
            id: self.id,
            tenant_id: TenantId::from_stored(self.tenant_id),
            identity: self.identity,
            operation,
            provider: self.provider,
            success: self.success,
            error_message: self.error_message,
            client_meta,
            timestamp,
            prev_hash: self.prev_hash,
            entry_hash: self.entry_hash,
        })
    }
}

/// Newest-first audit records for one tenant.
pub fn trail(conn: &Connection, tenant: &TenantId, limit: u32) -> rusqlite::Result<Vec<AuditRecord>> {
    let sql = format!(
        "SELECT {} FROM audit_log WHERE tenantId = ?1 ORDER BY id DESC LIMIT ?2",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tenant.as_str(), limit], read_raw)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

/// Walk the chain from the first row and report the first inconsistency.
pub fn verify_chain(conn: &Connection) -> rusqlite::Result<AuditChainReport> {
    let sql = format!("SELECT {} FROM audit_log ORDER BY id ASC", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], read_raw)?;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut checked = 0u64;
    for row in rows {
        let row = row?;
        checked += 1;
        if row.prev_hash != expected_prev || row.recompute_hash() != row.entry_hash {
            return Ok(AuditChainReport {
                records_checked: checked,
                first_broken_id: Some(row.id),
            });
        }
        expected_prev = row.entry_hash;
    }

    Ok(AuditChainReport {
        records_checked: checked,
        first_broken_id: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
