use chrono::NaiveDate;
use sirene_core::db::open_db_in_memory;
use sirene_core::ingest::load_if_empty_from_path;
use sirene_core::{
    audited_session_factory, load_if_empty, AuditLogRepository, Etablissement,
    EtablissementRepository, IngestionError, Loader, Operation, SessionError, SqliteEtablissementRepository,
    ValidationError, COLUMNS,
};
use std::io::Write;

const SHORT_HEADER: &str = "siren,nic,siret,codePostalEtablissement,dateCreationEtablissement";

fn full_header() -> String {
    COLUMNS
        .iter()
        .map(|column| column.source_header)
        .collect::<Vec<_>>()
        .join(",")
}

/// One full-width row with identifiers derived from `index`.
fn full_row(index: usize) -> String {
    let siren = format!("{index:09}");
    COLUMNS
        .iter()
        .map(|column| match column.name {
            "siren" => siren.clone(),
            "nic" => "00001".to_string(),
            "siret" => format!("{siren}00001"),
            "date_creation" => "2022-01-01".to_string(),
            "etablissement_siege" => "true".to_string(),
            "numero_voie" => "10".to_string(),
            "code_postal" => "75001".to_string(),
            "libelle_commune" => "PARIS".to_string(),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn full_source(rows: usize) -> String {
    let mut source = full_header();
    source.push('\n');
    for index in 1..=rows {
        source.push_str(&full_row(index));
        source.push('\n');
    }
    source
}

fn short_source(rows: &[&str]) -> String {
    let mut source = String::from(SHORT_HEADER);
    for row in rows {
        source.push('\n');
        source.push_str(row);
    }
    source.push('\n');
    source
}

#[test]
fn empty_store_loads_in_fixed_size_batches_with_one_audit_entry_per_row() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let report = Loader::with_batch_size(1000)
        .load_if_empty(&mut session, full_source(2500).as_bytes())
        .unwrap();
    assert!(!report.skipped);
    assert_eq!(report.rows_loaded, 2500);
    assert_eq!(report.batches, vec![1000, 1000, 500]);

    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    assert_eq!(repo.count().unwrap(), 2500);
    let first = repo.get("00000000100001").unwrap().unwrap();
    assert_eq!(first.date_creation, NaiveDate::from_ymd_opt(2022, 1, 1));
    assert_eq!(first.etablissement_siege, Some(true));
    assert_eq!(first.numero_voie, Some(10));
    assert_eq!(first.libelle_commune.as_deref(), Some("PARIS"));

    let audit = AuditLogRepository::try_new(session.connection()).unwrap();
    assert_eq!(audit.count().unwrap(), 2500);
    assert_eq!(
        audit.count_for("etablissement", Operation::Insert).unwrap(),
        2500
    );
}

#[test]
fn second_run_is_skipped_once_the_store_has_rows() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let loaded = load_if_empty(&mut session, full_source(3).as_bytes()).unwrap();
    assert_eq!(loaded, 3);

    let report = Loader::new()
        .load_if_empty(&mut session, full_source(10).as_bytes())
        .unwrap();
    assert!(report.skipped);
    assert_eq!(report.existing_rows, 3);
    assert_eq!(report.rows_loaded, 0);
    assert!(report.batches.is_empty());

    let rerun = load_if_empty(&mut session, full_source(10).as_bytes()).unwrap();
    assert_eq!(rerun, 0);

    let audit = AuditLogRepository::try_new(session.connection()).unwrap();
    assert_eq!(audit.count().unwrap(), 3);
}

#[test]
fn missing_columns_load_as_null_and_bad_values_as_none() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let source = short_source(&["123456789,00012,12345678900012,,2022-13-45"]);
    load_if_empty(&mut session, source.as_bytes()).unwrap();

    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    let record = repo.get("12345678900012").unwrap().unwrap();
    assert_eq!(record.siren, "123456789");
    assert_eq!(record.code_postal.as_deref(), Some(""));
    assert_eq!(record.date_creation, None);
    assert_eq!(record.libelle_commune, None);
    assert_eq!(record.etablissement_siege, None);
    assert_eq!(record.numero_voie, None);
}

#[test]
fn short_rows_treat_trailing_cells_as_absent() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let source = short_source(&["123456789,00012,12345678900012"]);
    load_if_empty(&mut session, source.as_bytes()).unwrap();

    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    let record = repo.get("12345678900012").unwrap().unwrap();
    assert_eq!(record.code_postal, None);
    assert_eq!(record.date_creation, None);
}

#[test]
fn invalid_identifier_aborts_the_run_and_keeps_earlier_batches() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let source = short_source(&[
        "111111111,00001,11111111100001,75001,2022-01-01",
        "222222222,00001,22222222200001,75002,2022-01-01",
        "333333333,00001,3333,75003,2022-01-01",
    ]);
    let err = Loader::with_batch_size(2)
        .load_if_empty(&mut session, source.as_bytes())
        .unwrap_err();
    match err {
        IngestionError::InvalidRow { line, source } => {
            assert_eq!(line, 4);
            assert!(matches!(
                source,
                ValidationError::IdentifierLength {
                    column: "siret",
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.pending_len(), 0);

    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    assert_eq!(repo.count().unwrap(), 2);
}

#[test]
fn failing_batch_rolls_back_alone() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let source = short_source(&[
        "111111111,00001,11111111100001,75001,",
        "222222222,00001,22222222200001,75002,",
        "333333333,00001,33333333300001,75003,",
        "111111111,00001,11111111100001,75001,",
    ]);
    let err = Loader::with_batch_size(2)
        .load_if_empty(&mut session, source.as_bytes())
        .unwrap_err();
    match err {
        IngestionError::Storage {
            rows_committed,
            source: SessionError::Db(db_err),
        } => {
            assert_eq!(rows_committed, 2);
            assert!(db_err.is_constraint_violation());
        }
        other => panic!("unexpected error: {other}"),
    }

    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    assert_eq!(repo.count().unwrap(), 2);
    assert!(repo.get("33333333300001").unwrap().is_none());

    let audit = AuditLogRepository::try_new(session.connection()).unwrap();
    assert_eq!(audit.count().unwrap(), 2);
}

#[test]
fn path_loader_reads_file_and_reports_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("StockEtablissement.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(full_source(5).as_bytes()).unwrap();
    drop(file);

    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let missing = dir.path().join("absent.csv");
    let err = load_if_empty_from_path(&Loader::new(), &mut session, &missing).unwrap_err();
    assert!(matches!(err, IngestionError::Open { ref path, .. } if *path == missing));

    let report = load_if_empty_from_path(&Loader::new(), &mut session, &path).unwrap();
    assert_eq!(report.rows_loaded, 5);
    assert_eq!(report.batches, vec![5]);

    // Guard runs first, so a missing file is not an error once rows exist.
    let skipped = load_if_empty_from_path(&Loader::new(), &mut session, &missing).unwrap();
    assert!(skipped.skipped);
    assert_eq!(skipped.existing_rows, 5);
}

#[test]
fn session_with_staged_rows_is_rejected_and_left_untouched() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);
    session.stage_insert(Etablissement::new("999999999", "00009", "99999999900009"));

    let err = Loader::with_batch_size(2)
        .load_if_empty(&mut session, full_source(3).as_bytes())
        .unwrap_err();
    assert!(matches!(err, IngestionError::PendingWork { staged: 1 }));
    assert_eq!(session.pending_len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let err = load_if_empty_from_path(&Loader::new(), &mut session, dir.path().join("absent.csv"))
        .unwrap_err();
    assert!(matches!(err, IngestionError::PendingWork { staged: 1 }));

    let summary = session.commit().unwrap();
    assert_eq!(summary.inserted, 1);
    let repo = SqliteEtablissementRepository::try_new(&mut session).unwrap();
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn batches_count_only_loader_rows() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = audited_session_factory().open(&mut conn);

    let report = Loader::with_batch_size(2)
        .load_if_empty(&mut session, full_source(5).as_bytes())
        .unwrap();
    assert_eq!(report.batches, vec![2, 2, 1]);
    assert_eq!(session.pending_len(), 0);
}
