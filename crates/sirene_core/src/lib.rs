//! Core of the SIRENE establishment record store.
//!
//! Owns the transactional session, the change-capture engine writing the
//! audit log, and the load-once bulk ingestion of the establishment stock
//! file. HTTP routing and DTO shaping live outside this crate and call in
//! through the repositories and the session.

pub mod audit;
pub mod coerce;
pub mod config;
pub mod db;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;
pub mod session;

pub use audit::ChangeCapture;
pub use config::{AppConfig, ConfigError};
pub use ingest::{
    load_if_empty, load_if_empty_from_path, IngestionError, IngestionResult, LoadReport, Loader,
    DEFAULT_BATCH_SIZE,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::audit::{AuditEntry, Operation, AUDIT_LOG_TABLE};
pub use model::etablissement::{Etablissement, ValidationError, COLUMNS, ETABLISSEMENT_TABLE};
pub use repo::audit_repo::{AuditLogQuery, AuditLogRepository};
pub use repo::etablissement_repo::{
    EtablissementListQuery, EtablissementPage, EtablissementRepository, EtablissementSort,
    SqliteEtablissementRepository,
};
pub use repo::{RepoError, RepoResult};
pub use schema::{ColumnKind, ColumnValue, Record};
pub use session::{
    CommitSummary, PendingChanges, PreCommitHook, Session, SessionError, SessionFactory,
    SessionResult,
};

/// Builds the session factory used by every writer: change capture wired in.
pub fn audited_session_factory() -> SessionFactory {
    SessionFactory::new().with_hook(ChangeCapture::new())
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
