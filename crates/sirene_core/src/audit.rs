//! Change-capture engine writing audit entries at commit time.
//!
//! # Responsibility
//! - Turn every pending insert, update and delete of a tracked table into
//!   exactly one `AuditEntry` staged in the same transaction.
//! - Discover table name and columns through `Record`, with no per-table
//!   registration.
//!
//! # Invariants
//! - Excluded tables (always including `audit_log`) are never audited.
//! - Entries are emitted inserts first, then updates, then deletes.
//! - All entries of one commit share one timestamp.

use crate::model::audit::{AuditEntry, Operation, AUDIT_LOG_TABLE};
use crate::schema::Record;
use crate::session::{PendingChanges, PreCommitHook};
use chrono::{NaiveDateTime, Utc};
use log::debug;
use serde_json::Value as JsonValue;
use std::fmt::{Debug, Formatter};

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Pre-commit hook producing one audit entry per mutated row.
pub struct ChangeCapture {
    excluded_tables: Vec<&'static str>,
    clock: Clock,
}

impl Default for ChangeCapture {
    fn default() -> Self {
        Self {
            excluded_tables: vec![AUDIT_LOG_TABLE],
            clock: Box::new(|| Utc::now().naive_utc()),
        }
    }
}

impl Debug for ChangeCapture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCapture")
            .field("excluded_tables", &self.excluded_tables)
            .finish_non_exhaustive()
    }
}

impl ChangeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table whose mutations must not be audited.
    pub fn exclude_table(mut self, table: &'static str) -> Self {
        if !self.excluded_tables.contains(&table) {
            self.excluded_tables.push(table);
        }
        self
    }

    /// Replaces the timestamp source (UTC wall clock by default).
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn is_tracked(&self, table: &str) -> bool {
        !self
            .excluded_tables
            .iter()
            .any(|excluded| *excluded == table)
    }

    /// Builds the audit entries for one set of pending changes.
    pub fn capture(&self, changes: &PendingChanges<'_>) -> Vec<AuditEntry> {
        if changes.is_empty() {
            return Vec::new();
        }

        let timestamp = (self.clock)();
        let sets = [
            (Operation::Insert, changes.inserted),
            (Operation::Update, changes.updated),
            (Operation::Delete, changes.deleted),
        ];

        let mut entries = Vec::new();
        for (operation, records) in sets {
            for record in records {
                if !self.is_tracked(record.table_name()) {
                    continue;
                }
                entries.push(AuditEntry::new(
                    record.table_name(),
                    operation,
                    timestamp,
                    JsonValue::Object(record.to_json_object()),
                ));
            }
        }

        debug!(
            "event=audit_capture module=audit status=ok inserted={} updated={} deleted={} entries={}",
            changes.inserted.len(),
            changes.updated.len(),
            changes.deleted.len(),
            entries.len()
        );
        entries
    }
}

impl PreCommitHook for ChangeCapture {
    fn before_commit(&self, changes: &PendingChanges<'_>) -> Vec<Box<dyn Record>> {
        self.capture(changes)
            .into_iter()
            .map(|entry| Box::new(entry) as Box<dyn Record>)
            .collect()
    }
}
