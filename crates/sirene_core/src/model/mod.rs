//! Domain models persisted by the record store.
//!
//! # Responsibility
//! - Define the establishment record and its declared column set.
//! - Define the append-only audit entry written by change capture.
//!
//! # Invariants
//! - Both models expose themselves to persistence only through
//!   `schema::Record`.

pub mod audit;
pub mod etablissement;
