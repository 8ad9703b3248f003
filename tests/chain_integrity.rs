//! End-to-end integrity properties of the administration ledger.
//!
//! Tampering tests mutate rows directly in storage, the way an attacker with
//! database access would, which first requires dropping the append-only
//! triggers: the storage constraint is itself one of the properties under
//! test.

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use marchain::{
    AdministrationPayload, AdministrationStatus, Database, ExportOptions, Ledger, LedgerError,
    LedgerSettings, Scope, ZERO_HASH,
};

async fn test_database() -> Database {
    let url = format!(
        "sqlite:{}/marchain-test-{}.db",
        std::env::temp_dir().display(),
        Uuid::new_v4()
    );
    let db = Database::connect(&url).await.expect("open test database");
    db.initialize_schema().await.expect("initialize schema");
    db
}

fn payload(patient_id: &str, dose: &str) -> AdministrationPayload {
    AdministrationPayload {
        administration_id: Uuid::new_v4(),
        order_id: "ord-1".into(),
        patient_id: patient_id.into(),
        administered_by: "rn-ortiz".into(),
        scheduled_datetime: Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap(),
        administered_datetime: Utc.with_ymd_and_hms(2026, 5, 2, 8, 4, 0).unwrap(),
        dose_given: dose.into(),
        route_given: "IV".into(),
        status: AdministrationStatus::Administered,
        reason_if_not_given: None,
        notes: None,
    }
}

/// Drop the append-only triggers so a test can simulate direct storage
/// tampering.
async fn disable_immutability(db: &Database) {
    sqlx::query("DROP TRIGGER ledger_no_update")
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("DROP TRIGGER ledger_no_delete")
        .execute(db.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_ledger_has_genesis_tip() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);

    let tip = ledger.latest_tip().await.unwrap();
    assert_eq!(tip.sequence, -1);
    assert_eq!(tip.hash, ZERO_HASH);

    let err = ledger.verify(&Scope::WholeLedger, 10).await.unwrap_err();
    assert!(matches!(err, LedgerError::RecordNotFound));
}

#[tokio::test]
async fn genesis_record_links_zero_sentinel() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);

    let event = ledger.append(payload("pt-1", "10 mg")).await.unwrap();
    assert_eq!(event.chain_sequence, 0);
    assert_eq!(event.previous_hash, ZERO_HASH);

    let report = ledger.verify(&Scope::WholeLedger, 10).await.unwrap();
    assert!(report.valid);
}

#[tokio::test]
async fn sequential_appends_verify_clean() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);

    let mut previous = ZERO_HASH.to_string();
    for i in 0..6 {
        let event = ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
        assert_eq!(event.chain_sequence, i);
        assert_eq!(event.previous_hash, previous);
        previous = event.record_hash;
    }

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.records_checked, 6);
    assert!(report.broken_links.is_empty());
    assert!(report.tampered_records.is_empty());
    assert!(report.sequence_gaps.is_empty());
}

#[tokio::test]
async fn payload_mutation_is_reported_as_tamper_not_broken_link() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..5 {
        ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
    }

    disable_immutability(&db).await;
    sqlx::query("UPDATE administration_ledger SET dose_given = '999 mg' WHERE chain_sequence = 2")
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.tampered_records.len(), 1);
    assert_eq!(report.tampered_records[0].chain_sequence, 2);
    // Record 3's stored link still matches record 2's stored hash literal,
    // so the mutation must not bleed into the broken-link list.
    assert!(report.broken_links.is_empty());
    assert!(report.sequence_gaps.is_empty());
}

#[tokio::test]
async fn rewritten_link_is_reported_as_broken_not_tampered() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    let mut hashes = Vec::new();
    for i in 0..5 {
        let event = ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
        hashes.push(event.record_hash);
    }

    disable_immutability(&db).await;
    // Point record 2 at record 0's hash: a valid hash, the wrong predecessor.
    sqlx::query("UPDATE administration_ledger SET previous_hash = ? WHERE chain_sequence = 2")
        .bind(&hashes[0])
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.broken_links[0].chain_sequence, 2);
    assert_eq!(report.broken_links[0].expected_previous_hash, hashes[1]);
    // The record's own content hash is still internally consistent.
    assert!(report.tampered_records.is_empty());
}

#[tokio::test]
async fn corrupted_stored_hash_marks_only_that_record_tampered() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..4 {
        ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
    }

    disable_immutability(&db).await;
    // Overwrite record 1's stored hash. Record 1's content no longer
    // verifies under any anchor, so it is tampered. Record 2's content is
    // untouched and still verifies under its own stored link, so it must
    // surface only as a broken link against the rewritten predecessor hash.
    sqlx::query("UPDATE administration_ledger SET record_hash = ? WHERE chain_sequence = 1")
        .bind("f".repeat(64))
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.tampered_records.len(), 1);
    assert_eq!(report.tampered_records[0].chain_sequence, 1);
    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.broken_links[0].chain_sequence, 2);
    assert!(report.sequence_gaps.is_empty());
}

#[tokio::test]
async fn concurrent_appends_form_single_contiguous_chain() {
    let db = test_database().await;
    let ledger = Ledger::with_settings(
        &db,
        LedgerSettings {
            max_append_attempts: 40,
            ..LedgerSettings::default()
        },
    );

    const WRITERS: i64 = 10;
    let tasks: Vec<_> = (0..WRITERS)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.append(payload("pt-1", &format!("{} mg", i))).await })
        })
        .collect();

    let mut sequences = Vec::new();
    for result in futures::future::join_all(tasks).await {
        let event = result.unwrap().expect("append must not be lost");
        sequences.push(event.chain_sequence);
    }

    sequences.sort_unstable();
    assert_eq!(sequences, (0..WRITERS).collect::<Vec<_>>());

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(report.valid, "no forks, no lost writes: {:?}", report);
    assert_eq!(report.records_checked, WRITERS as usize);
}

#[tokio::test]
async fn facility_scope_anchors_against_global_predecessors() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    db.register_patient("pt-a", "facility-alpha").await.unwrap();
    db.register_patient("pt-b", "facility-beta").await.unwrap();

    // Interleave the two facilities: A, B, A, B, A at sequences 0..4.
    for i in 0..5 {
        let patient = if i % 2 == 0 { "pt-a" } else { "pt-b" };
        ledger.append(payload(patient, &format!("{} mg", i))).await.unwrap();
    }

    disable_immutability(&db).await;
    // Corrupt the stored hash of the facility-B record at sequence 1. The
    // facility-A record at sequence 2 links against it in global order.
    sqlx::query("UPDATE administration_ledger SET record_hash = ? WHERE chain_sequence = 1")
        .bind("f".repeat(64))
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger
        .verify(&Scope::Facility("facility-alpha".into()), 100)
        .await
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.records_checked, 3);
    assert!(report
        .broken_links
        .iter()
        .any(|b| b.chain_sequence == 2));
    // The sequence-2 record itself is intact; the corruption sits in its
    // predecessor, so nothing in this scope is tampered.
    assert!(report.tampered_records.is_empty());
}

#[tokio::test]
async fn facility_sequences_are_sparse_but_increasing() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    db.register_patient("pt-a", "facility-alpha").await.unwrap();
    db.register_patient("pt-b", "facility-beta").await.unwrap();

    for i in 0..6 {
        let patient = if i % 2 == 0 { "pt-a" } else { "pt-b" };
        ledger.append(payload(patient, "5 mg")).await.unwrap();
    }

    // A clean interleaved chain verifies clean under a facility filter even
    // though the facility's sequences are not contiguous.
    let report = ledger
        .verify(&Scope::Facility("facility-beta".into()), 100)
        .await
        .unwrap();
    assert!(report.valid);
    assert_eq!(report.records_checked, 3);
}

#[tokio::test]
async fn deleted_record_is_a_sequence_gap_not_a_broken_link() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..5 {
        ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
    }

    disable_immutability(&db).await;
    sqlx::query("DELETE FROM administration_ledger WHERE chain_sequence = 2")
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.sequence_gaps.len(), 1);
    assert_eq!(report.sequence_gaps[0].first_missing, 2);
    assert_eq!(report.sequence_gaps[0].last_missing, 2);
    // Record 3's predecessor is missing, which is a gap, not a broken link,
    // and not tampering.
    assert!(report.broken_links.is_empty());
    assert!(report.tampered_records.is_empty());
}

#[tokio::test]
async fn adjacent_deletions_collapse_into_one_gap_run() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..7 {
        ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
    }

    disable_immutability(&db).await;
    sqlx::query("DELETE FROM administration_ledger WHERE chain_sequence IN (2, 3, 5)")
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.verify(&Scope::WholeLedger, 100).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.sequence_gaps.len(), 2);
    assert_eq!(report.sequence_gaps[0].first_missing, 2);
    assert_eq!(report.sequence_gaps[0].last_missing, 3);
    assert_eq!(report.sequence_gaps[1].first_missing, 5);
    assert_eq!(report.sequence_gaps[1].last_missing, 5);
    // Records 4 and 6 lost their predecessors to the deletions; that stays a
    // gap finding, never a broken link or a tamper finding.
    assert!(report.broken_links.is_empty());
    assert!(report.tampered_records.is_empty());
}

#[tokio::test]
async fn append_surfaces_contention_when_retry_budget_is_exhausted() {
    let db = test_database().await;
    let ledger = Ledger::with_settings(
        &db,
        LedgerSettings {
            max_append_attempts: 2,
            backoff_base_ms: 1,
            ..LedgerSettings::default()
        },
    );
    ledger.append(payload("pt-1", "10 mg")).await.unwrap();

    // A rival writer that claims every candidate sequence between the tail
    // read and the insert, so this ledger handle loses every race.
    sqlx::query(
        "CREATE TRIGGER rival_writer BEFORE INSERT ON administration_ledger
         BEGIN
             INSERT INTO administration_ledger (
                 chain_sequence, administration_id, order_id, patient_id,
                 administered_by, scheduled_datetime, administered_datetime,
                 dose_given, route_given, status, record_hash, previous_hash
             ) VALUES (
                 NEW.chain_sequence, lower(hex(randomblob(16))), 'ord-9', 'pt-2',
                 'rn-vega', 0, 0, '1 mg', 'PO', 'administered',
                 NEW.previous_hash, NEW.previous_hash
             );
         END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = ledger.append(payload("pt-1", "20 mg")).await.unwrap_err();
    assert!(matches!(err, LedgerError::ChainContention { attempts: 2 }));

    // Exhaustion leaves no row behind, the losing statement rolls back
    // whole, rival claim included.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM administration_ledger")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn point_of_care_validation_scenario() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..5 {
        ledger.append(payload("pt-p", &format!("{} mg", i))).await.unwrap();
    }

    let report = ledger.validate_patient_chain("pt-p").await.unwrap();
    assert!(report.valid);
    assert_eq!(report.records_checked, 5);

    disable_immutability(&db).await;
    sqlx::query("UPDATE administration_ledger SET dose_given = '999 mg' WHERE chain_sequence = 2")
        .execute(db.pool())
        .await
        .unwrap();

    let report = ledger.validate_patient_chain("pt-p").await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.tampered_records.len(), 1);
    assert_eq!(report.tampered_records[0].chain_sequence, 2);
    assert!(report.broken_links.is_empty());
}

#[tokio::test]
async fn export_refuses_tampered_segments_unless_overridden() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    for i in 0..4 {
        ledger.append(payload("pt-1", &format!("{} mg", i))).await.unwrap();
    }

    let segment = ledger
        .export(&Scope::WholeLedger, 100, &ExportOptions::default())
        .await
        .unwrap();
    assert!(segment.verification.valid);
    assert_eq!(segment.records.len(), 4);

    disable_immutability(&db).await;
    sqlx::query("UPDATE administration_ledger SET notes = 'edited' WHERE chain_sequence = 1")
        .execute(db.pool())
        .await
        .unwrap();

    let err = ledger
        .export(&Scope::WholeLedger, 100, &ExportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ExportRefused { tampered: 1 }));

    let overridden = ledger
        .export(
            &Scope::WholeLedger,
            100,
            &ExportOptions {
                allow_tampered: true,
                override_reason: Some("compliance hold 2026-117".into()),
            },
        )
        .await
        .unwrap();
    assert!(!overridden.verification.valid);
    assert_eq!(overridden.verification.tampered_records.len(), 1);
}

#[tokio::test]
async fn ledger_rows_are_immutable_at_the_storage_layer() {
    let db = test_database().await;
    let ledger = Ledger::new(&db);
    ledger.append(payload("pt-1", "10 mg")).await.unwrap();

    let update = sqlx::query("UPDATE administration_ledger SET dose_given = 'x'")
        .execute(db.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM administration_ledger")
        .execute(db.pool())
        .await;
    assert!(delete.is_err());

    let report = ledger.verify(&Scope::WholeLedger, 10).await.unwrap();
    assert!(report.valid);
}
