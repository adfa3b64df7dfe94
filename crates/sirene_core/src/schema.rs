//! Column-level schema reflection shared by every mapped table.
//!
//! # Responsibility
//! - Define the closed set of column value types a mapped row may hold.
//! - Expose a uniform `Record` capability: table name, key, ordered columns.
//! - Build generic INSERT/UPDATE/DELETE statements from that capability.
//!
//! # Invariants
//! - Dates are stored and serialized as `YYYY-MM-DD`, datetimes as
//!   `YYYY-MM-DDTHH:MM:SS[.fff]`, flags as `0/1` in SQLite.
//! - Converting a `ColumnValue` to SQL or JSON never fails.

use crate::coerce::{self, format_date, format_datetime};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{Row, ToSql};
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// Storage type of a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Date,
    DateTime,
    Bool,
    Json,
}

/// One typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bool(bool),
    Json(JsonValue),
}

impl ColumnValue {
    /// JSON rendering used by audit snapshots.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Text(value) => JsonValue::String(value.clone()),
            Self::Integer(value) => JsonValue::from(*value),
            Self::Date(value) => JsonValue::String(format_date(value)),
            Self::DateTime(value) => JsonValue::String(format_datetime(value)),
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Json(value) => value.clone(),
        }
    }

    /// SQLite rendering used by generic statements.
    pub fn to_sql_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Text(value) => Value::Text(value.clone()),
            Self::Integer(value) => Value::Integer(*value),
            Self::Date(value) => Value::Text(format_date(value)),
            Self::DateTime(value) => Value::Text(format_datetime(value)),
            Self::Bool(value) => Value::Integer(i64::from(*value)),
            Self::Json(value) => Value::Text(value.to_string()),
        }
    }
}

impl ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(self.to_sql_value()))
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Text(value) => write!(f, "{value}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Static description of one declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name in storage and in serialized snapshots.
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Header of the matching column in the bulk source file.
    pub source_header: &'static str,
    /// Maximum length in characters, for text columns that declare one.
    pub max_len: Option<usize>,
}

/// Uniform reflection capability for rows of any mapped table.
///
/// The change-capture engine and the session only ever see rows through
/// this trait, so new tables need no registration beyond implementing it.
pub trait Record: Debug {
    /// Storage table the row belongs to.
    fn table_name(&self) -> &'static str;

    /// Primary-key column and its current value.
    fn key(&self) -> (&'static str, ColumnValue);

    /// Every column with its current in-memory value, in declaration order.
    fn columns(&self) -> Vec<(&'static str, ColumnValue)>;

    fn column_names(&self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _)| name).collect()
    }

    /// JSON object snapshot of the full column set.
    fn to_json_object(&self) -> Map<String, JsonValue> {
        self.columns()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}

/// Error decoding a stored row into its typed model.
#[derive(Debug)]
pub enum DecodeError {
    Sqlite(rusqlite::Error),
    InvalidValue {
        column: &'static str,
        value: String,
    },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidValue { column, value } => {
                write!(f, "invalid stored value `{value}` in column `{column}`")
            }
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DecodeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Conversions a Rust field type needs to take part in a declared column set.
pub trait ColumnField: Sized {
    const KIND: ColumnKind;

    /// Coerces a raw source cell. `None` means the cell is absent.
    fn from_raw(raw: Option<&str>) -> Self;

    fn to_column_value(&self) -> ColumnValue;

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError>;
}

impl ColumnField for String {
    const KIND: ColumnKind = ColumnKind::Text;

    fn from_raw(raw: Option<&str>) -> Self {
        raw.unwrap_or_default().to_string()
    }

    fn to_column_value(&self) -> ColumnValue {
        ColumnValue::Text(self.clone())
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        Ok(row.get(column)?)
    }
}

impl ColumnField for Option<String> {
    const KIND: ColumnKind = ColumnKind::Text;

    fn from_raw(raw: Option<&str>) -> Self {
        raw.map(str::to_string)
    }

    fn to_column_value(&self) -> ColumnValue {
        self.clone().map_or(ColumnValue::Null, ColumnValue::Text)
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        Ok(row.get(column)?)
    }
}

impl ColumnField for Option<i64> {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn from_raw(raw: Option<&str>) -> Self {
        raw.and_then(coerce::parse_int)
    }

    fn to_column_value(&self) -> ColumnValue {
        self.map_or(ColumnValue::Null, ColumnValue::Integer)
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        Ok(row.get(column)?)
    }
}

impl ColumnField for Option<NaiveDate> {
    const KIND: ColumnKind = ColumnKind::Date;

    fn from_raw(raw: Option<&str>) -> Self {
        raw.and_then(coerce::parse_date)
    }

    fn to_column_value(&self) -> ColumnValue {
        self.map_or(ColumnValue::Null, ColumnValue::Date)
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        match row.get::<_, Option<String>>(column)? {
            None => Ok(None),
            Some(text) => match coerce::parse_date(&text) {
                Some(date) => Ok(Some(date)),
                None => Err(DecodeError::InvalidValue { column, value: text }),
            },
        }
    }
}

impl ColumnField for Option<NaiveDateTime> {
    const KIND: ColumnKind = ColumnKind::DateTime;

    fn from_raw(raw: Option<&str>) -> Self {
        raw.and_then(coerce::parse_datetime)
    }

    fn to_column_value(&self) -> ColumnValue {
        self.map_or(ColumnValue::Null, ColumnValue::DateTime)
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        match row.get::<_, Option<String>>(column)? {
            None => Ok(None),
            Some(text) => match NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f") {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(DecodeError::InvalidValue { column, value: text }),
            },
        }
    }
}

impl ColumnField for Option<bool> {
    const KIND: ColumnKind = ColumnKind::Bool;

    fn from_raw(raw: Option<&str>) -> Self {
        coerce::parse_bool(raw)
    }

    fn to_column_value(&self) -> ColumnValue {
        self.map_or(ColumnValue::Null, ColumnValue::Bool)
    }

    fn from_sql(row: &Row<'_>, column: &'static str) -> Result<Self, DecodeError> {
        match row.get::<_, Option<i64>>(column)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(other) => Err(DecodeError::InvalidValue {
                column,
                value: other.to_string(),
            }),
        }
    }
}

pub(crate) fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders});",
        columns.join(", ")
    )
}

/// Builds `UPDATE ... WHERE key = ?` binding `columns` first and the key last.
pub(crate) fn update_sql(table: &str, columns: &[&str], key: &str) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {assignments} WHERE {key} = ?{};",
        columns.len() + 1
    )
}

pub(crate) fn delete_sql(table: &str, key: &str) -> String {
    format!("DELETE FROM {table} WHERE {key} = ?1;")
}

#[cfg(test)]
mod tests {
    use super::{delete_sql, insert_sql, update_sql, ColumnValue};
    use chrono::NaiveDate;
    use rusqlite::types::Value;
    use serde_json::json;

    #[test]
    fn statement_builders_number_placeholders_in_order() {
        assert_eq!(
            insert_sql("t", &["a", "b"]),
            "INSERT INTO t (a, b) VALUES (?1, ?2);"
        );
        assert_eq!(
            update_sql("t", &["a", "b"], "id"),
            "UPDATE t SET a = ?1, b = ?2 WHERE id = ?3;"
        );
        assert_eq!(delete_sql("t", "id"), "DELETE FROM t WHERE id = ?1;");
    }

    #[test]
    fn dates_serialize_as_plain_iso_dates() {
        let date = NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid date");
        assert_eq!(ColumnValue::Date(date).to_json(), json!("2022-01-01"));
        assert_eq!(
            ColumnValue::Date(date).to_sql_value(),
            Value::Text("2022-01-01".to_string())
        );

        let datetime = date.and_hms_opt(9, 5, 0).expect("valid time");
        assert_eq!(
            ColumnValue::DateTime(datetime).to_json(),
            json!("2022-01-01T09:05:00")
        );
    }

    #[test]
    fn scalars_pass_through_unchanged() {
        assert_eq!(ColumnValue::Integer(10).to_json(), json!(10));
        assert_eq!(ColumnValue::Bool(true).to_json(), json!(true));
        assert_eq!(ColumnValue::Bool(true).to_sql_value(), Value::Integer(1));
        assert_eq!(ColumnValue::Null.to_json(), json!(null));
        assert_eq!(
            ColumnValue::Json(json!({"a": 1})).to_sql_value(),
            Value::Text("{\"a\":1}".to_string())
        );
    }
}
