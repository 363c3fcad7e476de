//! Audit log and source attestation.
//!
//! Every persistence operation is appended to an immutable operation log;
//! SQLite triggers reject UPDATE and DELETE on the table, so history can
//! only grow. Attestation records bind each signal to the provenance of
//! the source data that produced it (one row per signal, duplicates
//! ignored).
//!
//! The audit path is best-effort: a failed audit write logs at error
//! level but never aborts the business operation, except in development
//! where it propagates.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::error;

use crate::config::Environment;

/// Provenance classification recorded with every audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSourceType {
    Real,
    Mock,
    Hybrid,
}

impl AuditSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSourceType::Real => "REAL",
            AuditSourceType::Mock => "MOCK",
            AuditSourceType::Hybrid => "HYBRID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "INSERT",
            AuditOperation::Update => "UPDATE",
            AuditOperation::Upsert => "UPSERT",
            AuditOperation::Delete => "DELETE",
        }
    }
}

/// One row of the activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub operation_type: String,
    pub schema_name: String,
    pub table_name: String,
    pub target_id: String,
    pub source_type: String,
    pub performed_by: String,
    pub reason: String,
    pub logged_at: String,
}

pub struct AuditLogger {
    conn: Arc<Mutex<Connection>>,
    env: Environment,
}

impl AuditLogger {
    pub fn open(path: impl AsRef<Path>, env: Environment) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            env,
        })
    }

    pub fn open_in_memory(env: Environment) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            env,
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_type TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                target_id TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                attestation_id TEXT,
                source_type TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                reason TEXT NOT NULL,
                metadata TEXT,
                logged_at TEXT NOT NULL
            );

            -- The log is append-only by construction.
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

            CREATE TABLE IF NOT EXISTS source_attestations (
                signal_id TEXT PRIMARY KEY,
                source_name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                verification_method TEXT NOT NULL,
                response_sample_hash TEXT NOT NULL,
                attested_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_target
                ON audit_log(target_id);
            CREATE INDEX IF NOT EXISTS idx_audit_log_logged_at
                ON audit_log(logged_at);
            "#,
        )
    }

    /// Append an operation record. Best-effort outside development.
    #[allow(clippy::too_many_arguments)]
    pub fn log_operation(
        &self,
        operation: AuditOperation,
        schema_name: &str,
        table_name: &str,
        target_id: &str,
        old_value: Option<&serde_json::Value>,
        new_value: Option<&serde_json::Value>,
        attestation_id: Option<&str>,
        source_type: AuditSourceType,
        performed_by: &str,
        reason: &str,
        metadata: Option<&serde_json::Value>,
    ) -> anyhow::Result<()> {
        let result = self.conn.lock().execute(
            "INSERT INTO audit_log (
                operation_type, schema_name, table_name, target_id,
                old_value, new_value, attestation_id, source_type,
                performed_by, reason, metadata, logged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                operation.as_str(),
                schema_name,
                table_name,
                target_id,
                old_value.map(|v| v.to_string()),
                new_value.map(|v| v.to_string()),
                attestation_id,
                source_type.as_str(),
                performed_by,
                reason,
                metadata.map(|v| v.to_string()),
                Utc::now().to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = %err, target_id, "audit log write failed");
                if self.env == Environment::Development {
                    Err(err.into())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Write a signal attestation once; duplicates by signal_id are
    /// ignored. `response_sample` is hashed, never stored raw.
    pub fn attest_signal(
        &self,
        signal_id: &str,
        source_name: &str,
        source_type: AuditSourceType,
        response_sample: &[u8],
    ) -> anyhow::Result<bool> {
        let hash = hex::encode(Sha256::digest(response_sample));
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO source_attestations (
                signal_id, source_name, source_type,
                verification_method, response_sample_hash, attested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                signal_id,
                source_name,
                source_type.as_str(),
                "sha256_response_sample",
                hash,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn attestation_for(&self, signal_id: &str) -> Option<(String, String)> {
        self.conn
            .lock()
            .query_row(
                "SELECT source_type, response_sample_hash
                 FROM source_attestations WHERE signal_id = ?1",
                params![signal_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()
    }

    /// Most recent audit rows, newest first.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, operation_type, schema_name, table_name, target_id,
                    source_type, performed_by, reason, logged_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AuditRecord {
                id: row.get(0)?,
                operation_type: row.get(1)?,
                schema_name: row.get(2)?,
                table_name: row.get(3)?,
                target_id: row.get(4)?,
                source_type: row.get(5)?,
                performed_by: row.get(6)?,
                reason: row.get(7)?,
                logged_at: row.get(8)?,
            })
        })?;
        Ok(rows.flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> AuditLogger {
        AuditLogger::open_in_memory(Environment::Development).unwrap()
    }

    #[test]
    fn operations_append_and_list() {
        let audit = logger();
        audit
            .log_operation(
                AuditOperation::Insert,
                "public",
                "signals",
                "OMEN-1",
                None,
                Some(&serde_json::json!({"signal_id": "OMEN-1"})),
                None,
                AuditSourceType::Real,
                "pipeline",
                "signal emitted",
                None,
            )
            .unwrap();
        audit
            .log_operation(
                AuditOperation::Insert,
                "public",
                "signals",
                "OMEN-2",
                None,
                None,
                None,
                AuditSourceType::Mock,
                "pipeline",
                "signal emitted",
                None,
            )
            .unwrap();

        let recent = audit.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target_id, "OMEN-2"); // newest first
        assert_eq!(recent[1].source_type, "REAL");
    }

    #[test]
    fn audit_log_rejects_update_and_delete() {
        let audit = logger();
        audit
            .log_operation(
                AuditOperation::Insert,
                "public",
                "signals",
                "OMEN-1",
                None,
                None,
                None,
                AuditSourceType::Real,
                "pipeline",
                "x",
                None,
            )
            .unwrap();

        let conn = audit.conn.lock();
        let update = conn.execute("UPDATE audit_log SET reason = 'tampered'", []);
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM audit_log", []);
        assert!(delete.is_err());
    }

    #[test]
    fn attestation_is_once_per_signal() {
        let audit = logger();
        let first = audit
            .attest_signal("OMEN-1", "polymarket", AuditSourceType::Real, b"{\"p\":0.7}")
            .unwrap();
        assert!(first);
        let second = audit
            .attest_signal("OMEN-1", "polymarket", AuditSourceType::Real, b"other")
            .unwrap();
        assert!(!second, "duplicate attestation must be ignored");

        let (source_type, hash) = audit.attestation_for("OMEN-1").unwrap();
        assert_eq!(source_type, "REAL");
        // The original sample's hash survives the ignored duplicate.
        assert_eq!(hash, hex::encode(Sha256::digest(b"{\"p\":0.7}")));
    }
}
