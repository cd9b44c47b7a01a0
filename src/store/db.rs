// Lockbox: SQLite connection management
//
// Every relational operation opens its own short-lived connection, so there
// is no shared handle and no application-side lock. WAL journaling plus a
// busy timeout let SQLite serialize writers natively. Column names follow
// the published `secrets` / `audit_log` layout exactly.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

/// Wrapper around one SQLite connection.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self { conn })
    }

    /// Open a database that must already exist. Never creates the file and
    /// leaves its journal mode untouched.
    pub fn open_existing(path: &Path, busy_timeout: Duration) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database with the schema applied (testing only).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Create tables, indexes and append-only triggers. Idempotent.
    pub fn run_migrations(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS secrets (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tenantId        TEXT NOT NULL,
                secretKey       TEXT NOT NULL,
                encryptedValue  TEXT NOT NULL,
                provider        TEXT NOT NULL,
                identity        TEXT NOT NULL,
                createdAt       TEXT NOT NULL,
                updatedAt       TEXT NOT NULL,
                UNIQUE (tenantId, secretKey)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tenantId        TEXT NOT NULL,
                identity        TEXT NOT NULL,
                operation       TEXT NOT NULL,
                provider        TEXT,
                success         INTEGER NOT NULL,
                errorMessage    TEXT,
                clientMeta      TEXT,
                timestamp       TEXT NOT NULL,
                prevHash        TEXT NOT NULL,
                entryHash       TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_secrets_tenant
                ON secrets(tenantId);

            CREATE INDEX IF NOT EXISTS idx_audit_tenant
                ON audit_log(tenantId, id);

            CREATE TRIGGER IF NOT EXISTS audit_log_no_update
                BEFORE UPDATE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
                BEFORE DELETE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;
            ",
        )?;

        tracing::debug!("Database migrations completed successfully");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn table_exists(db: &Database, name: &str) -> bool {
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                params![name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    fn insert_audit_row(db: &Database) {
        db.conn()
            .execute(
                "INSERT INTO audit_log (tenantId, identity, operation, provider, success,
                 errorMessage, clientMeta, timestamp, prevHash, entryHash)
                 VALUES ('t', 'a@x.com', 'get', 'openai', 1, NULL, NULL,
                         '2024-01-01T00:00:00Z', '00', '11')",
                [],
            )
            .unwrap();
    }

    #[test]
    fn test_open_existing_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(Database::open_existing(&path, Duration::from_millis(50)).is_err());
        assert!(!path.exists());

        Database::open(&path, Duration::from_millis(50)).unwrap();
        assert!(Database::open_existing(&path, Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_schema_migration_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        assert!(table_exists(&db, "secrets"), "secrets table should exist");
        assert!(table_exists(&db, "audit_log"), "audit_log table should exist");
    }

    #[test]
    fn test_schema_migration_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.run_migrations().is_ok(), "Migrations should be idempotent");
    }

    #[test]
    fn test_secrets_unique_per_tenant_and_key() {
        let db = Database::open_in_memory().unwrap();
        let insert = "INSERT INTO secrets (tenantId, secretKey, encryptedValue, provider,
                      identity, createdAt, updatedAt)
                      VALUES (?1, 'openai_api_key', 'a:b:c', 'openai', 'x', 'now', 'now')";

        db.conn().execute(insert, params!["tenant-a"]).unwrap();
        db.conn().execute(insert, params!["tenant-b"]).unwrap();
        assert!(
            db.conn().execute(insert, params!["tenant-a"]).is_err(),
            "duplicate (tenantId, secretKey) must be rejected"
        );
    }

    #[test]
    fn test_audit_log_rejects_update() {
        let db = Database::open_in_memory().unwrap();
        insert_audit_row(&db);
        let result = db
            .conn()
            .execute("UPDATE audit_log SET success = 0", []);
        assert!(result.is_err(), "audit rows must be immutable");
    }

    #[test]
    fn test_audit_log_rejects_delete() {
        let db = Database::open_in_memory().unwrap();
        insert_audit_row(&db);
        assert!(db.conn().execute("DELETE FROM audit_log", []).is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM audit_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("lockbox.db"), Duration::from_secs(1)).unwrap();
        db.run_migrations().unwrap();
        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
