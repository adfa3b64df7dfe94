//! Read-only access to the audit log.
//!
//! # Invariants
//! - Entries are returned in insertion (`id`) order.
//! - Nothing here writes to `audit_log`; only change capture does.

use crate::model::audit::{AuditEntry, Operation, AUDIT_LOG_TABLE};
use crate::repo::{ensure_connection_ready, RepoResult};
use crate::schema::ColumnValue;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

const AUDIT_COLUMNS: [&str; 5] = ["id", "table_name", "operation", "timestamp", "row_data"];

/// Filter and pagination options for audit listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditLogQuery {
    pub table_name: Option<String>,
    pub operation: Option<Operation>,
    /// No limit when `None`.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// SQLite-backed audit log reader.
pub struct AuditLogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> AuditLogRepository<'conn> {
    /// Constructs a reader over a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, AUDIT_LOG_TABLE, AUDIT_COLUMNS)?;
        Ok(Self { conn })
    }

    pub fn count(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {AUDIT_LOG_TABLE};"),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Counts entries for one table and operation.
    pub fn count_for(&self, table_name: &str, operation: Operation) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {AUDIT_LOG_TABLE} WHERE table_name = ?1 AND operation = ?2;"
            ),
            params![table_name, operation.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn list(&self, query: &AuditLogQuery) -> RepoResult<Vec<AuditEntry>> {
        let mut sql = format!(
            "SELECT {} FROM {AUDIT_LOG_TABLE} WHERE 1 = 1",
            AUDIT_COLUMNS.join(", ")
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(table_name) = query.table_name.as_ref() {
            sql.push_str(" AND table_name = ?");
            bind_values.push(Value::Text(table_name.clone()));
        }
        if let Some(operation) = query.operation {
            sql.push_str(" AND operation = ?");
            bind_values.push(Value::Text(operation.as_str().to_string()));
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(AuditEntry::from_row(row)?);
        }
        Ok(entries)
    }

    /// Returns entries whose snapshot has `key_column = key`, oldest first.
    ///
    /// `key` is bound with its storage type, so integer keys match the
    /// integers `json_extract` yields.
    pub fn history_for_key(
        &self,
        table_name: &str,
        key_column: &str,
        key: &ColumnValue,
    ) -> RepoResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {AUDIT_LOG_TABLE}
             WHERE table_name = ?1
               AND json_extract(row_data, '$.' || ?2) = ?3
             ORDER BY id ASC;",
            AUDIT_COLUMNS.join(", ")
        ))?;
        let mut rows = stmt.query(params![table_name, key_column, key])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(AuditEntry::from_row(row)?);
        }
        Ok(entries)
    }
}
