//! Process entry point for the establishment record store.
//!
//! # Responsibility
//! - Bootstrap logging and the database from configuration.
//! - Run the load-once ingestion at startup (`init`).
//! - Offer read-only inspection of records and the audit log.

use clap::{Parser, Subcommand};
use log::error;
use sirene_core::db::open_db;
use sirene_core::ingest::load_if_empty_from_path;
use sirene_core::{
    audited_session_factory, init_logging, AppConfig, AuditLogQuery, AuditLogRepository,
    EtablissementRepository, Loader, Operation, SqliteEtablissementRepository,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

/// SIRENE establishment store
#[derive(Parser, Debug)]
#[command(name = "sirene")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the database and load the stock file if the store is empty
    Init {
        /// Overrides the configured stock file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Print the number of stored establishments
    Count,

    /// Print one establishment as JSON
    Get {
        /// 14-character SIRET
        siret: String,
    },

    /// Print audit entries as JSON lines
    Audit {
        #[arg(long)]
        table: Option<String>,
        /// INSERT, UPDATE or DELETE
        #[arg(long)]
        operation: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_exit module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config.log_level, config.log_dir.as_deref())?;

    let mut conn = open_db(&config.database_path)?;
    let factory = audited_session_factory();
    let mut session = factory.open(&mut conn);

    match cli.command {
        Command::Init { csv } => {
            let csv_path = csv.unwrap_or(config.csv_path);
            let loader = Loader::with_batch_size(config.batch_size);
            let report = load_if_empty_from_path(&loader, &mut session, &csv_path)?;
            if report.skipped {
                println!(
                    "skipped: store already holds {} establishments",
                    report.existing_rows
                );
            } else {
                println!(
                    "loaded {} establishments in {} batches",
                    report.rows_loaded,
                    report.batches.len()
                );
            }
        }
        Command::Count => {
            let repo = SqliteEtablissementRepository::try_new(&mut session)?;
            println!("{}", repo.count()?);
        }
        Command::Get { siret } => {
            let repo = SqliteEtablissementRepository::try_new(&mut session)?;
            match repo.get(&siret)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => return Err(format!("etablissement not found: {siret}").into()),
            }
        }
        Command::Audit {
            table,
            operation,
            limit,
        } => {
            let operation = operation
                .map(|value| {
                    Operation::parse(&value)
                        .ok_or_else(|| format!("unknown operation `{value}`"))
                })
                .transpose()?;
            let repo = AuditLogRepository::try_new(session.connection())?;
            let entries = repo.list(&AuditLogQuery {
                table_name: table,
                operation,
                limit: Some(limit),
                offset: 0,
            })?;
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}
