//! Transactional session with a unit of work and pre-commit hooks.
//!
//! # Responsibility
//! - Stage inserts, updates and deletes of any `Record` until commit.
//! - On commit, hand the three pending sets to every registered hook and
//!   write the hook output inside the same transaction as the mutations.
//!
//! # Invariants
//! - Hooks are wired at construction; there is no global registration.
//! - A commit either persists every staged row plus every hook row, or
//!   nothing. The unit of work is empty after `commit` in both cases.
//! - Write order is inserts, updates, deletes, then hook rows.

use crate::db::DbError;
use crate::schema::{delete_sql, insert_sql, update_sql, Record};
use log::{debug, warn};
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

pub type SessionResult<T> = Result<T, SessionError>;

/// Error raised while committing a session.
#[derive(Debug)]
pub enum SessionError {
    Db(DbError),
    /// An update or delete matched no stored row.
    StaleRecord { table: &'static str, key: String },
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::StaleRecord { table, key } => {
                write!(f, "no row in `{table}` with key `{key}`")
            }
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::StaleRecord { .. } => None,
        }
    }
}

impl From<DbError> for SessionError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SessionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Pending rows of one transaction, as handed to pre-commit hooks.
#[derive(Debug, Clone, Copy)]
pub struct PendingChanges<'a> {
    pub inserted: &'a [Box<dyn Record>],
    pub updated: &'a [Box<dyn Record>],
    /// Rows as staged by the caller. The stored row is not re-read, so
    /// callers stage the full stored state, not only the key.
    pub deleted: &'a [Box<dyn Record>],
}

impl PendingChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Observer invoked synchronously right before a session writes its changes.
pub trait PreCommitHook: Send + Sync {
    /// Returns extra rows to insert in the same transaction.
    ///
    /// Rows returned here are written as-is and are never fed back to hooks.
    fn before_commit(&self, changes: &PendingChanges<'_>) -> Vec<Box<dyn Record>>;
}

/// Counts of rows written by one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub hook_records: usize,
}

#[derive(Debug, Default)]
struct UnitOfWork {
    inserted: Vec<Box<dyn Record>>,
    updated: Vec<Box<dyn Record>>,
    deleted: Vec<Box<dyn Record>>,
}

impl UnitOfWork {
    fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn changes(&self) -> PendingChanges<'_> {
        PendingChanges {
            inserted: &self.inserted,
            updated: &self.updated,
            deleted: &self.deleted,
        }
    }
}

/// Builds sessions that share the same hook set.
#[derive(Clone, Default)]
pub struct SessionFactory {
    hooks: Vec<Arc<dyn PreCommitHook>>,
}

impl SessionFactory {
    /// Creates a factory without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more hook for every session built afterwards.
    pub fn with_hook(mut self, hook: impl PreCommitHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Opens a session over `conn` with this factory's hooks.
    pub fn open<'conn>(&self, conn: &'conn mut Connection) -> Session<'conn> {
        Session::with_hooks(conn, self.hooks.clone())
    }
}

/// Single-writer transactional session over one connection.
pub struct Session<'conn> {
    conn: &'conn mut Connection,
    hooks: Vec<Arc<dyn PreCommitHook>>,
    pending: UnitOfWork,
}

impl<'conn> Session<'conn> {
    /// Creates a session without hooks.
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self::with_hooks(conn, Vec::new())
    }

    pub fn with_hooks(conn: &'conn mut Connection, hooks: Vec<Arc<dyn PreCommitHook>>) -> Self {
        Self {
            conn,
            hooks,
            pending: UnitOfWork::default(),
        }
    }

    /// Read access for queries; staged rows are not visible here.
    pub fn connection(&self) -> &Connection {
        &*self.conn
    }

    pub fn stage_insert(&mut self, record: impl Record + 'static) {
        self.pending.inserted.push(Box::new(record));
    }

    /// Stages a full-row replacement matched by primary key.
    pub fn stage_update(&mut self, record: impl Record + 'static) {
        self.pending.updated.push(Box::new(record));
    }

    /// Stages a delete matched by primary key.
    ///
    /// `record` becomes the audit snapshot as-is: load the stored row and
    /// stage that, not a key-only value.
    pub fn stage_delete(&mut self, record: impl Record + 'static) {
        self.pending.deleted.push(Box::new(record));
    }

    /// Number of staged rows not yet committed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discards every staged row and returns how many were dropped.
    pub fn rollback(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending = UnitOfWork::default();
        if discarded > 0 {
            debug!("event=session_rollback module=session status=ok discarded={discarded}");
        }
        discarded
    }

    /// Writes every staged row plus hook rows in one transaction.
    ///
    /// # Errors
    /// - `SessionError::Db` for constraint or connectivity failures.
    /// - `SessionError::StaleRecord` when an update/delete matches no row.
    ///
    /// On error the transaction is rolled back and staged rows are dropped.
    pub fn commit(&mut self) -> SessionResult<CommitSummary> {
        let work = std::mem::take(&mut self.pending);
        if work.is_empty() {
            return Ok(CommitSummary::default());
        }

        let started_at = Instant::now();
        match write_unit_of_work(self.conn, &self.hooks, &work) {
            Ok(summary) => {
                debug!(
                    "event=session_commit module=session status=ok inserted={} updated={} deleted={} hook_records={} duration_ms={}",
                    summary.inserted,
                    summary.updated,
                    summary.deleted,
                    summary.hook_records,
                    started_at.elapsed().as_millis()
                );
                Ok(summary)
            }
            Err(err) => {
                warn!(
                    "event=session_commit module=session status=error staged={} duration_ms={} error={}",
                    work.len(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

fn write_unit_of_work(
    conn: &mut Connection,
    hooks: &[Arc<dyn PreCommitHook>],
    work: &UnitOfWork,
) -> SessionResult<CommitSummary> {
    let tx = conn.transaction()?;

    let changes = work.changes();
    let hook_rows: Vec<Box<dyn Record>> = hooks
        .iter()
        .flat_map(|hook| hook.before_commit(&changes))
        .collect();

    for record in &work.inserted {
        insert_record(&tx, record.as_ref())?;
    }
    for record in &work.updated {
        update_record(&tx, record.as_ref())?;
    }
    for record in &work.deleted {
        delete_record(&tx, record.as_ref())?;
    }
    for record in &hook_rows {
        insert_record(&tx, record.as_ref())?;
    }

    tx.commit()?;

    Ok(CommitSummary {
        inserted: work.inserted.len(),
        updated: work.updated.len(),
        deleted: work.deleted.len(),
        hook_records: hook_rows.len(),
    })
}

fn insert_record(tx: &Transaction<'_>, record: &dyn Record) -> SessionResult<()> {
    let (names, values): (Vec<_>, Vec<_>) = record.columns().into_iter().unzip();
    let mut stmt = tx.prepare_cached(&insert_sql(record.table_name(), &names))?;
    stmt.execute(params_from_iter(values.iter()))?;
    Ok(())
}

fn update_record(tx: &Transaction<'_>, record: &dyn Record) -> SessionResult<()> {
    let (key_name, key_value) = record.key();
    let (names, mut values): (Vec<_>, Vec<_>) = record
        .columns()
        .into_iter()
        .filter(|(name, _)| *name != key_name)
        .unzip();
    values.push(key_value.clone());

    let mut stmt = tx.prepare_cached(&update_sql(record.table_name(), &names, key_name))?;
    let changed = stmt.execute(params_from_iter(values.iter()))?;
    if changed == 0 {
        return Err(SessionError::StaleRecord {
            table: record.table_name(),
            key: key_value.to_string(),
        });
    }
    Ok(())
}

fn delete_record(tx: &Transaction<'_>, record: &dyn Record) -> SessionResult<()> {
    let (key_name, key_value) = record.key();
    let mut stmt = tx.prepare_cached(&delete_sql(record.table_name(), key_name))?;
    let changed = stmt.execute(params![key_value])?;
    if changed == 0 {
        return Err(SessionError::StaleRecord {
            table: record.table_name(),
            key: key_value.to_string(),
        });
    }
    Ok(())
}
