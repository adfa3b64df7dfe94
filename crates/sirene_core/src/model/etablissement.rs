//! Establishment record model.
//!
//! # Responsibility
//! - Declare the closed column set once: struct fields, storage columns,
//!   source-file headers and text length limits all come from one list.
//! - Validate identifiers and text lengths before persistence.
//!
//! # Invariants
//! - `siret` is the primary key and is exactly 14 characters.
//! - `siren` (9 chars) and `nic` (5 chars) never change after creation.
//! - Text columns never exceed their declared maximum length.

use crate::schema::{ColumnDef, ColumnField, ColumnValue, DecodeError, Record};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage table for establishment rows.
pub const ETABLISSEMENT_TABLE: &str = "etablissement";

pub const SIRET_LEN: usize = 14;
pub const SIREN_LEN: usize = 9;
pub const NIC_LEN: usize = 5;

const IMMUTABLE_COLUMNS: &[&str] = &["siret", "siren", "nic"];

macro_rules! max_len {
    () => {
        None
    };
    ($max:literal) => {
        Some($max)
    };
}

macro_rules! declare_etablissement {
    ($( $field:ident : $ty:ty => $header:literal $(, max = $max:literal)? ; )+) => {
        /// One establishment (physical or legal place of business).
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct Etablissement {
            $( pub $field: $ty, )+
        }

        /// Declared columns in storage order.
        pub const COLUMNS: &[ColumnDef] = &[
            $(
                ColumnDef {
                    name: stringify!($field),
                    kind: <$ty as ColumnField>::KIND,
                    source_header: $header,
                    max_len: max_len!($($max)?),
                },
            )+
        ];

        impl Etablissement {
            /// Builds a record from raw cells aligned with `COLUMNS`.
            ///
            /// Missing trailing cells are treated as absent.
            pub fn from_cells<'a>(cells: impl IntoIterator<Item = Option<&'a str>>) -> Self {
                let mut cells = cells.into_iter();
                Self {
                    $( $field: <$ty as ColumnField>::from_raw(cells.next().flatten()), )+
                }
            }

            /// Decodes one stored row selected with every declared column.
            pub fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
                Ok(Self {
                    $( $field: <$ty as ColumnField>::from_sql(row, stringify!($field))?, )+
                })
            }

            fn column_values(&self) -> Vec<(&'static str, ColumnValue)> {
                vec![
                    $( (stringify!($field), ColumnField::to_column_value(&self.$field)), )+
                ]
            }
        }
    };
}

declare_etablissement! {
    siren: String => "siren", max = 9;
    nic: String => "nic", max = 5;
    siret: String => "siret", max = 14;
    statut_diffusion: Option<String> => "statutDiffusionEtablissement", max = 1;
    date_creation: Option<NaiveDate> => "dateCreationEtablissement";
    tranche_effectifs: Option<i64> => "trancheEffectifsEtablissement";
    annee_effectifs: Option<i64> => "anneeEffectifsEtablissement";
    activite_principale_registre: Option<String> => "activitePrincipaleRegistreMetiersEtablissement", max = 255;
    date_dernier_traitement: Option<NaiveDateTime> => "dateDernierTraitementEtablissement";
    etablissement_siege: Option<bool> => "etablissementSiege";
    nombre_periodes: Option<i64> => "nombrePeriodesEtablissement";
    complement_adresse: Option<String> => "complementAdresseEtablissement", max = 255;
    numero_voie: Option<i64> => "numeroVoieEtablissement";
    indice_repetition: Option<String> => "indiceRepetitionEtablissement", max = 10;
    type_voie: Option<String> => "typeVoieEtablissement", max = 5;
    libelle_voie: Option<String> => "libelleVoieEtablissement", max = 255;
    code_postal: Option<String> => "codePostalEtablissement", max = 10;
    libelle_commune: Option<String> => "libelleCommuneEtablissement", max = 255;
    libelle_commune_etranger: Option<String> => "libelleCommuneEtrangerEtablissement", max = 255;
    distribution_speciale: Option<String> => "distributionSpecialeEtablissement", max = 255;
    code_commune: Option<String> => "codeCommuneEtablissement", max = 5;
    code_cedex: Option<String> => "codeCedexEtablissement", max = 10;
    libelle_cedex: Option<String> => "libelleCedexEtablissement", max = 255;
    code_pays_etranger: Option<String> => "codePaysEtrangerEtablissement", max = 5;
    libelle_pays_etranger: Option<String> => "libellePaysEtrangerEtablissement", max = 255;
    complement_adresse2: Option<String> => "complementAdresse2Etablissement", max = 255;
    numero_voie2: Option<i64> => "numeroVoie2Etablissement";
    indice_repetition2: Option<String> => "indiceRepetition2Etablissement", max = 10;
    type_voie2: Option<String> => "typeVoie2Etablissement", max = 5;
    libelle_voie2: Option<String> => "libelleVoie2Etablissement", max = 255;
    code_postal2: Option<String> => "codePostal2Etablissement", max = 10;
    libelle_commune2: Option<String> => "libelleCommune2Etablissement", max = 255;
    libelle_commune_etranger2: Option<String> => "libelleCommuneEtranger2Etablissement", max = 255;
    distribution_speciale2: Option<String> => "distributionSpeciale2Etablissement", max = 255;
    code_commune2: Option<String> => "codeCommune2Etablissement", max = 5;
    code_cedex2: Option<String> => "codeCedex2Etablissement", max = 10;
    libelle_cedex2: Option<String> => "libelleCedex2Etablissement", max = 255;
    code_pays_etranger2: Option<String> => "codePaysEtranger2Etablissement", max = 5;
    libelle_pays_etranger2: Option<String> => "libellePaysEtranger2Etablissement", max = 255;
    date_debut: Option<NaiveDate> => "dateDebut";
    etat_administratif: Option<String> => "etatAdministratifEtablissement", max = 1;
    enseigne1: Option<String> => "enseigne1Etablissement", max = 255;
    enseigne2: Option<String> => "enseigne2Etablissement", max = 255;
    enseigne3: Option<String> => "enseigne3Etablissement", max = 255;
    denomination_usuelle: Option<String> => "denominationUsuelleEtablissement", max = 255;
    activite_principale: Option<String> => "activitePrincipaleEtablissement", max = 10;
    nomenclature_activite_principale: Option<String> => "nomenclatureActivitePrincipaleEtablissement", max = 50;
    caractere_employeur: Option<String> => "caractereEmployeurEtablissement", max = 1;
}

/// Validation error for establishment writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A fixed-length identifier has the wrong length.
    IdentifierLength {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A text column is longer than its declared maximum.
    TooLong {
        column: &'static str,
        max: usize,
        actual: usize,
    },
    /// An update tried to change an identity column.
    ImmutableField { column: &'static str },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentifierLength {
                column,
                expected,
                actual,
            } => write!(
                f,
                "`{column}` must be exactly {expected} characters, got {actual}"
            ),
            Self::TooLong { column, max, actual } => write!(
                f,
                "`{column}` exceeds {max} characters (got {actual})"
            ),
            Self::ImmutableField { column } => write!(f, "`{column}` cannot be changed"),
        }
    }
}

impl Error for ValidationError {}

impl Etablissement {
    /// Creates a record carrying only its identifiers.
    pub fn new(
        siren: impl Into<String>,
        nic: impl Into<String>,
        siret: impl Into<String>,
    ) -> Self {
        Self {
            siren: siren.into(),
            nic: nic.into(),
            siret: siret.into(),
            ..Self::default()
        }
    }

    /// Checks identifier lengths and declared text limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identifier("siret", &self.siret, SIRET_LEN)?;
        check_identifier("siren", &self.siren, SIREN_LEN)?;
        check_identifier("nic", &self.nic, NIC_LEN)?;

        for (definition, (_, value)) in COLUMNS.iter().zip(self.column_values()) {
            let (Some(max), ColumnValue::Text(text)) = (definition.max_len, &value) else {
                continue;
            };
            let actual = text.chars().count();
            if actual > max {
                return Err(ValidationError::TooLong {
                    column: definition.name,
                    max,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// Rejects `next` when it changes any identity column of `self`.
    pub fn ensure_same_identity(&self, next: &Etablissement) -> Result<(), ValidationError> {
        let current = self.column_values();
        let proposed = next.column_values();
        for ((name, before), (_, after)) in current.iter().zip(proposed.iter()) {
            if IMMUTABLE_COLUMNS.contains(name) && before != after {
                return Err(ValidationError::ImmutableField { column: *name });
            }
        }
        Ok(())
    }
}

impl Record for Etablissement {
    fn table_name(&self) -> &'static str {
        ETABLISSEMENT_TABLE
    }

    fn key(&self) -> (&'static str, ColumnValue) {
        ("siret", ColumnValue::Text(self.siret.clone()))
    }

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        self.column_values()
    }
}

fn check_identifier(
    column: &'static str,
    value: &str,
    expected: usize,
) -> Result<(), ValidationError> {
    let actual = value.chars().count();
    if actual != expected {
        return Err(ValidationError::IdentifierLength {
            column,
            expected,
            actual,
        });
    }
    Ok(())
}
