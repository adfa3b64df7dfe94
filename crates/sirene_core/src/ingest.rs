//! Load-once bulk ingestion of the establishment stock file.
//!
//! # Responsibility
//! - Stream a header-delimited CSV source row by row into the record store.
//! - Coerce each mapped column through `coerce` (via the column set).
//! - Commit in fixed-size batches so memory and transaction size stay bounded.
//!
//! # Invariants
//! - Ingestion runs only when `etablissement` is empty. The guard checks
//!   presence, not completion: a partial load must be cleared by hand
//!   before a retry.
//! - Every committed row goes through the session, so each produces one
//!   `INSERT` audit entry.
//! - A failed batch rolls back alone; earlier batches stay committed.
//! - A run starts only on a session with no staged rows, so every batch
//!   holds loader rows only.

use crate::model::etablissement::{Etablissement, ValidationError, COLUMNS};
use crate::repo::etablissement_repo::{EtablissementRepository, SqliteEtablissementRepository};
use crate::repo::RepoError;
use crate::session::{Session, SessionError};
use csv::{ReaderBuilder, StringRecord};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Rows per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error aborting an ingestion run.
#[derive(Debug)]
pub enum IngestionError {
    /// Guard query or schema check failed.
    Repo(RepoError),
    /// The session already holds staged rows; ingestion needs it empty.
    PendingWork { staged: usize },
    /// The source file could not be opened.
    Open { path: PathBuf, source: std::io::Error },
    /// The source could not be read or decoded as CSV.
    Source(csv::Error),
    /// A row has a missing or ill-sized identifier or an over-long field.
    InvalidRow { line: u64, source: ValidationError },
    /// A batch commit failed; `rows_committed` rows were persisted before it.
    Storage {
        rows_committed: usize,
        source: SessionError,
    },
}

impl Display for IngestionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::PendingWork { staged } => write!(
                f,
                "session holds {staged} staged rows; commit or roll back before ingesting"
            ),
            Self::Open { path, source } => {
                write!(f, "cannot open source `{}`: {source}", path.display())
            }
            Self::Source(err) => write!(f, "cannot read source: {err}"),
            Self::InvalidRow { line, source } => write!(f, "invalid row at line {line}: {source}"),
            Self::Storage {
                rows_committed,
                source,
            } => write!(
                f,
                "batch commit failed after {rows_committed} committed rows: {source}"
            ),
        }
    }
}

impl Error for IngestionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::PendingWork { .. } => None,
            Self::Open { source, .. } => Some(source),
            Self::Source(err) => Some(err),
            Self::InvalidRow { source, .. } => Some(source),
            Self::Storage { source, .. } => Some(source),
        }
    }
}

impl From<RepoError> for IngestionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<csv::Error> for IngestionError {
    fn from(value: csv::Error) -> Self {
        Self::Source(value)
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_loaded: usize,
    /// Size of each committed batch, in commit order.
    pub batches: Vec<usize>,
    /// `true` when the guard found existing rows and nothing was read.
    pub skipped: bool,
    /// Rows present before the run.
    pub existing_rows: u64,
}

/// Batched CSV loader.
#[derive(Debug, Clone, Copy)]
pub struct Loader {
    batch_size: usize,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the batch size; `0` is treated as `1`.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Loads `source` when the target table is empty.
    ///
    /// # Errors
    /// - `PendingWork` when `session` already holds staged rows.
    /// - `Repo` when the guard query or schema check fails.
    /// - `Source`, `InvalidRow` or `Storage` abort the run; staged rows of the
    ///   current batch are discarded, earlier batches remain.
    pub fn load_if_empty<R: Read>(
        &self,
        session: &mut Session<'_>,
        source: R,
    ) -> IngestionResult<LoadReport> {
        if let Some(skipped) = check_guard(session)? {
            return Ok(skipped);
        }
        self.load(session, source)
    }

    /// Streams `source` into an empty table. The guard must already have passed.
    fn load<R: Read>(&self, session: &mut Session<'_>, source: R) -> IngestionResult<LoadReport> {
        let started_at = Instant::now();
        info!(
            "event=ingest module=ingest status=start batch_size={}",
            self.batch_size
        );
        let mut report = LoadReport::default();
        match self.stream_rows(session, source, &mut report) {
            Ok(()) => {
                info!(
                    "event=ingest module=ingest status=ok rows={} batches={} duration_ms={}",
                    report.rows_loaded,
                    report.batches.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                let discarded = session.rollback();
                error!(
                    "event=ingest module=ingest status=error rows_committed={} discarded={} duration_ms={} error={}",
                    report.rows_loaded,
                    discarded,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn stream_rows<R: Read>(
        &self,
        session: &mut Session<'_>,
        source: R,
        report: &mut LoadReport,
    ) -> IngestionResult<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        let column_indexes = resolve_column_indexes(&headers);

        let mut record = StringRecord::new();
        let mut staged = 0;
        while reader.read_record(&mut record)? {
            let line = record.position().map_or(0, |position| position.line());
            let row = Etablissement::from_cells(
                column_indexes
                    .iter()
                    .map(|index| index.and_then(|index| record.get(index))),
            );
            row.validate()
                .map_err(|source| IngestionError::InvalidRow { line, source })?;

            session.stage_insert(row);
            staged += 1;
            if staged == self.batch_size {
                self.commit_batch(session, report)?;
                staged = 0;
            }
        }

        if staged > 0 {
            self.commit_batch(session, report)?;
        }
        Ok(())
    }

    fn commit_batch(&self, session: &mut Session<'_>, report: &mut LoadReport) -> IngestionResult<()> {
        let summary = session.commit().map_err(|source| IngestionError::Storage {
            rows_committed: report.rows_loaded,
            source,
        })?;

        report.rows_loaded += summary.inserted;
        report.batches.push(summary.inserted);
        info!(
            "event=ingest_batch module=ingest status=ok batch={} rows={} total={} audit_entries={}",
            report.batches.len(),
            summary.inserted,
            report.rows_loaded,
            summary.hook_records
        );
        Ok(())
    }
}

/// Loads `source` with the default batch size and returns rows loaded.
///
/// Returns `0` when the guard skips the run.
pub fn load_if_empty<R: Read>(session: &mut Session<'_>, source: R) -> IngestionResult<usize> {
    Loader::new()
        .load_if_empty(session, source)
        .map(|report| report.rows_loaded)
}

/// Opens `path` and loads it with `loader` when the target table is empty.
///
/// The file is only opened once the guard has passed.
pub fn load_if_empty_from_path(
    loader: &Loader,
    session: &mut Session<'_>,
    path: impl AsRef<Path>,
) -> IngestionResult<LoadReport> {
    let path = path.as_ref();
    if let Some(skipped) = check_guard(session)? {
        return Ok(skipped);
    }

    let file = File::open(path).map_err(|source| IngestionError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    loader.load(session, file)
}

/// Runs the load-once guard. Returns the skip report when rows already exist.
fn check_guard(session: &mut Session<'_>) -> IngestionResult<Option<LoadReport>> {
    let staged = session.pending_len();
    if staged > 0 {
        return Err(IngestionError::PendingWork { staged });
    }

    let existing_rows = SqliteEtablissementRepository::try_new(session)?.count()?;
    if existing_rows == 0 {
        return Ok(None);
    }

    info!("event=ingest module=ingest status=skip existing_rows={existing_rows}");
    Ok(Some(LoadReport {
        skipped: true,
        existing_rows,
        ..LoadReport::default()
    }))
}

/// Maps each declared column to its position in the source header row.
fn resolve_column_indexes(headers: &StringRecord) -> Vec<Option<usize>> {
    COLUMNS
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|header| header.trim() == column.source_header)
        })
        .collect()
}
