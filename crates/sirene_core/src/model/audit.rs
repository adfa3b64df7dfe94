//! Audit entry model.
//!
//! # Responsibility
//! - Describe one committed mutation of a tracked table.
//!
//! # Invariants
//! - `row_data` holds the full column snapshot: post-state for
//!   `INSERT`/`UPDATE`, pre-deletion state for `DELETE`.
//! - Entries are append-only; storage rejects UPDATE/DELETE on the table.
//! - The entry references its row by table name and embedded key only,
//!   so it outlives the row it describes.

use crate::coerce::format_datetime;
use crate::schema::{ColumnValue, DecodeError, Record};
use chrono::NaiveDateTime;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter};

/// Storage table for audit entries. Never audited itself.
pub const AUDIT_LOG_TABLE: &str = "audit_log";

/// Kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a stored tag; matching is case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Surrogate id, assigned by storage on insert.
    pub id: Option<i64>,
    pub table_name: String,
    pub operation: Operation,
    pub timestamp: NaiveDateTime,
    /// JSON object keyed by column name.
    pub row_data: JsonValue,
}

impl AuditEntry {
    /// Builds a not-yet-persisted entry.
    pub fn new(
        table_name: impl Into<String>,
        operation: Operation,
        timestamp: NaiveDateTime,
        row_data: JsonValue,
    ) -> Self {
        Self {
            id: None,
            table_name: table_name.into(),
            operation,
            timestamp,
            row_data,
        }
    }

    /// Decodes one stored `audit_log` row.
    pub fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        let operation_text: String = row.get("operation")?;
        let operation =
            Operation::parse(&operation_text).ok_or_else(|| DecodeError::InvalidValue {
                column: "operation",
                value: operation_text.clone(),
            })?;

        let timestamp_text: String = row.get("timestamp")?;
        let timestamp = NaiveDateTime::parse_from_str(&timestamp_text, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| DecodeError::InvalidValue {
                column: "timestamp",
                value: timestamp_text.clone(),
            })?;

        let row_data_text: String = row.get("row_data")?;
        let row_data = serde_json::from_str(&row_data_text).map_err(|_| {
            DecodeError::InvalidValue {
                column: "row_data",
                value: row_data_text.clone(),
            }
        })?;

        Ok(Self {
            id: row.get("id")?,
            table_name: row.get("table_name")?,
            operation,
            timestamp,
            row_data,
        })
    }

    /// Returns the ISO-8601 rendering of the entry timestamp.
    pub fn timestamp_iso(&self) -> String {
        format_datetime(&self.timestamp)
    }
}

impl Record for AuditEntry {
    fn table_name(&self) -> &'static str {
        AUDIT_LOG_TABLE
    }

    fn key(&self) -> (&'static str, ColumnValue) {
        ("id", self.id.map_or(ColumnValue::Null, ColumnValue::Integer))
    }

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            self.key(),
            ("table_name", ColumnValue::Text(self.table_name.clone())),
            (
                "operation",
                ColumnValue::Text(self.operation.as_str().to_string()),
            ),
            ("timestamp", ColumnValue::DateTime(self.timestamp)),
            ("row_data", ColumnValue::Json(self.row_data.clone())),
        ]
    }
}
