//! Process configuration for the record store and the startup loader.
//!
//! # Responsibility
//! - Describe where the database, the stock file and the logs live.
//! - Load settings from an optional JSON file, defaulting every field.
//!
//! # Invariants
//! - `batch_size` is never zero once `validate()` has passed.

use crate::ingest::DEFAULT_BATCH_SIZE;
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_PATH: &str = "sirene.sqlite3";
const DEFAULT_CSV_PATH: &str = "/docker-entrypoint-initdb.d/StockEtablissement.csv";

/// Configuration loading error.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "cannot parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Establishment stock file loaded at startup when the store is empty.
    pub csv_path: PathBuf,
    /// Rows per ingestion commit.
    pub batch_size: usize,
    /// One of `trace|debug|info|warn|error`.
    pub log_level: String,
    /// Absolute directory for rolling log files; stderr when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Reads `path` when given, otherwise returns defaults. Validates either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError};
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn defaults_match_startup_layout() {
        let config = AppConfig::load(None).expect("defaults are valid");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(
            config.csv_path,
            PathBuf::from("/docker-entrypoint-initdb.d/StockEtablissement.csv")
        );
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"batch_size": 250, "log_level": "warn"}}"#).expect("write config");

        let config = AppConfig::load(Some(file.path())).expect("config loads");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.database_path, PathBuf::from("sirene.sqlite3"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"batch_size": 0}}"#).expect("write config");

        let err = AppConfig::load(Some(file.path())).expect_err("zero batch size");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write config");

        let err = AppConfig::load(Some(file.path())).expect_err("malformed config");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
