//! Establishment repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD, count and filtered listing over `etablissement`.
//! - Route every write through the session so each committed mutation
//!   gets exactly one audit entry.
//!
//! # Invariants
//! - Write paths call `Etablissement::validate()` before staging.
//! - Updates never change `siret`, `siren` or `nic`.
//! - Each write method commits its own transaction.

use crate::model::etablissement::{Etablissement, COLUMNS, ETABLISSEMENT_TABLE};
use crate::repo::{ensure_connection_ready, RepoError, RepoResult};
use crate::session::Session;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

const LIST_DEFAULT_LIMIT: u32 = 20;
const LIST_LIMIT_MAX: u32 = 100;

/// Sortable columns for listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EtablissementSort {
    #[default]
    Siret,
    Siren,
    CodePostal,
    LibelleCommune,
    DateCreation,
}

impl EtablissementSort {
    fn column(self) -> &'static str {
        match self {
            Self::Siret => "siret",
            Self::Siren => "siren",
            Self::CodePostal => "code_postal",
            Self::LibelleCommune => "libelle_commune",
            Self::DateCreation => "date_creation",
        }
    }

    /// Parses a column name as accepted by list callers.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "siret" => Some(Self::Siret),
            "siren" => Some(Self::Siren),
            "code_postal" => Some(Self::CodePostal),
            "libelle_commune" => Some(Self::LibelleCommune),
            "date_creation" => Some(Self::DateCreation),
            _ => None,
        }
    }
}

/// Query options for listing establishments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtablissementListQuery {
    pub siren: Option<String>,
    pub code_postal: Option<String>,
    pub libelle_commune: Option<String>,
    pub sort: EtablissementSort,
    pub descending: bool,
    /// Defaults to 20, clamped to 100.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One page of establishments plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtablissementPage {
    pub items: Vec<Etablissement>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Repository interface for establishment operations.
pub trait EtablissementRepository {
    /// Inserts a new establishment and returns its SIRET.
    fn create(&mut self, record: &Etablissement) -> RepoResult<String>;
    fn get(&self, siret: &str) -> RepoResult<Option<Etablissement>>;
    fn list(&self, query: &EtablissementListQuery) -> RepoResult<EtablissementPage>;
    /// Replaces every mutable column of an existing establishment.
    fn update(&mut self, record: &Etablissement) -> RepoResult<()>;
    /// Deletes an establishment and returns its last stored state.
    fn delete(&mut self, siret: &str) -> RepoResult<Etablissement>;
    fn count(&self) -> RepoResult<u64>;
}

/// SQLite-backed establishment repository bound to one session.
pub struct SqliteEtablissementRepository<'s, 'conn> {
    session: &'s mut Session<'conn>,
}

impl<'s, 'conn> SqliteEtablissementRepository<'s, 'conn> {
    /// Constructs a repository from a session over a migrated connection.
    pub fn try_new(session: &'s mut Session<'conn>) -> RepoResult<Self> {
        ensure_connection_ready(
            session.connection(),
            ETABLISSEMENT_TABLE,
            COLUMNS.iter().map(|column| column.name),
        )?;
        Ok(Self { session })
    }

    /// Loads, edits and saves one establishment in a single transaction.
    ///
    /// Returns the stored state after the edit.
    pub fn modify(
        &mut self,
        siret: &str,
        edit: impl FnOnce(&mut Etablissement),
    ) -> RepoResult<Etablissement> {
        let current = self
            .get(siret)?
            .ok_or_else(|| RepoError::NotFound(siret.to_string()))?;
        let mut next = current.clone();
        edit(&mut next);
        current.ensure_same_identity(&next)?;
        next.validate()?;

        self.session.stage_update(next.clone());
        self.session.commit()?;
        Ok(next)
    }

    fn conn(&self) -> &Connection {
        self.session.connection()
    }
}

impl EtablissementRepository for SqliteEtablissementRepository<'_, '_> {
    fn create(&mut self, record: &Etablissement) -> RepoResult<String> {
        record.validate()?;

        self.session.stage_insert(record.clone());
        self.session.commit()?;
        Ok(record.siret.clone())
    }

    fn get(&self, siret: &str) -> RepoResult<Option<Etablissement>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{} WHERE siret = ?1;", select_sql()))?;
        let mut rows = stmt.query([siret])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(Etablissement::from_row(row)?));
        }
        Ok(None)
    }

    fn list(&self, query: &EtablissementListQuery) -> RepoResult<EtablissementPage> {
        let mut filter = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        for (column, value) in [
            ("siren", &query.siren),
            ("code_postal", &query.code_postal),
            ("libelle_commune", &query.libelle_commune),
        ] {
            if let Some(value) = value {
                filter.push_str(&format!(" AND {column} = ?"));
                bind_values.push(Value::Text(value.clone()));
            }
        }

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {ETABLISSEMENT_TABLE}{filter};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let limit = normalize_list_limit(query.limit);
        let direction = if query.descending { "DESC" } else { "ASC" };
        let mut sql = format!("{}{filter}", select_sql());
        if query.sort == EtablissementSort::Siret {
            sql.push_str(&format!(" ORDER BY siret {direction}"));
        } else {
            sql.push_str(&format!(
                " ORDER BY {} {direction}, siret ASC",
                query.sort.column()
            ));
        }
        sql.push_str(" LIMIT ? OFFSET ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        bind_values.push(Value::Integer(i64::from(query.offset)));

        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Etablissement::from_row(row)?);
        }

        Ok(EtablissementPage {
            items,
            total: u64::try_from(total).unwrap_or_default(),
            limit,
            offset: query.offset,
        })
    }

    fn update(&mut self, record: &Etablissement) -> RepoResult<()> {
        let current = self
            .get(&record.siret)?
            .ok_or_else(|| RepoError::NotFound(record.siret.clone()))?;
        current.ensure_same_identity(record)?;
        record.validate()?;

        self.session.stage_update(record.clone());
        self.session.commit()?;
        Ok(())
    }

    fn delete(&mut self, siret: &str) -> RepoResult<Etablissement> {
        let current = self
            .get(siret)?
            .ok_or_else(|| RepoError::NotFound(siret.to_string()))?;

        self.session.stage_delete(current.clone());
        self.session.commit()?;
        Ok(current)
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {ETABLISSEMENT_TABLE};"),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn select_sql() -> String {
    let columns = COLUMNS
        .iter()
        .map(|column| column.name)
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM {ETABLISSEMENT_TABLE}")
}

fn normalize_list_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(LIST_DEFAULT_LIMIT)
        .clamp(1, LIST_LIMIT_MAX)
}

#[cfg(test)]
mod tests {
    use super::{normalize_list_limit, select_sql, EtablissementSort};

    #[test]
    fn list_limit_defaults_and_clamps() {
        assert_eq!(normalize_list_limit(None), 20);
        assert_eq!(normalize_list_limit(Some(0)), 1);
        assert_eq!(normalize_list_limit(Some(500)), 100);
        assert_eq!(normalize_list_limit(Some(42)), 42);
    }

    #[test]
    fn select_lists_every_declared_column() {
        let sql = select_sql();
        assert!(sql.starts_with("SELECT siren, nic, siret, statut_diffusion"));
        assert!(sql.ends_with("caractere_employeur FROM etablissement"));
    }

    #[test]
    fn sort_parse_accepts_whitelisted_columns_only() {
        assert_eq!(
            EtablissementSort::parse("code_postal"),
            Some(EtablissementSort::CodePostal)
        );
        assert_eq!(EtablissementSort::parse("siret; DROP TABLE"), None);
    }
}
