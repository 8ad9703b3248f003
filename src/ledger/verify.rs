//! Chain verification.
//!
//! A scoped range (facility, patient) is a sparse, interleaved subsequence of
//! the one global chain, so every record is anchored against its true global
//! predecessor fetched by sequence number, never against the previous item of
//! the filtered list. The three failure modes stay separate because they call
//! for different remediation: a tampered record means in-place field
//! mutation, a broken link means reordering or a swapped hash, a sequence gap
//! means a record is missing outright.

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::chain::Ledger;
use crate::ledger::encode::canonical_encode;
use crate::ledger::event::AdministrationEvent;
use crate::ledger::hash::{record_hash, ZERO_HASH};

/// Range selector for verification and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// The whole ledger, most recent records first.
    WholeLedger,
    /// Records whose patient belongs to one facility, resolved by join.
    Facility(String),
    /// One patient's records.
    Patient(String),
}

/// A record whose stored `previous_hash` does not match its true global
/// predecessor's stored `record_hash`.
#[derive(Debug, Clone, Serialize)]
pub struct BrokenLink {
    pub chain_sequence: i64,
    pub administration_id: Uuid,
    pub stored_previous_hash: String,
    pub expected_previous_hash: String,
}

/// A record whose recomputed digest matches its stored `record_hash` under
/// neither its own stored link nor its true predecessor's hash.
#[derive(Debug, Clone, Serialize)]
pub struct TamperedRecord {
    pub chain_sequence: i64,
    pub administration_id: Uuid,
    pub stored_hash: String,
    pub computed_hash: String,
}

/// A contiguous run of sequence values with no records, inside the verified
/// global context. Missing records are a different failure mode from
/// tampering and are never folded into the broken-link list.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceGap {
    pub first_missing: i64,
    pub last_missing: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    /// Tail sequence captured when the scan started; every read was bounded
    /// to it, so appends landing mid-scan do not move the goalposts.
    pub snapshot_sequence: i64,
    pub records_checked: usize,
    pub broken_links: Vec<BrokenLink>,
    pub tampered_records: Vec<TamperedRecord>,
    pub sequence_gaps: Vec<SequenceGap>,
}

impl Ledger {
    /// Verify the last `limit` records matching `scope`.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        scope: &Scope,
        limit: i64,
    ) -> Result<VerificationReport, LedgerError> {
        let tip = self.latest_tip().await?;
        if tip.sequence < 0 {
            return Err(LedgerError::RecordNotFound);
        }
        let snapshot = tip.sequence;
        let records = self.resolve_scope(scope, limit, snapshot).await?;
        if records.is_empty() {
            return Err(LedgerError::RecordNotFound);
        }
        self.check_records(&records, snapshot).await
    }

    /// Point-of-care trust check over one patient's records, bounded by the
    /// configured record cap so it stays interactive.
    #[instrument(skip(self))]
    pub async fn validate_patient_chain(
        &self,
        patient_id: &str,
    ) -> Result<VerificationReport, LedgerError> {
        let limit = self.settings().point_of_care_limit;
        self.verify(&Scope::Patient(patient_id.to_string()), limit).await
    }

    /// Resolve the concrete record set for a scope, in ascending global
    /// order, bounded above by the snapshot sequence.
    pub(crate) async fn resolve_scope(
        &self,
        scope: &Scope,
        limit: i64,
        snapshot: i64,
    ) -> Result<Vec<AdministrationEvent>, LedgerError> {
        let rows = match scope {
            Scope::WholeLedger => {
                sqlx::query(
                    "SELECT * FROM administration_ledger
                     WHERE chain_sequence <= ?
                     ORDER BY chain_sequence DESC LIMIT ?",
                )
                .bind(snapshot)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            Scope::Facility(facility_id) => {
                sqlx::query(
                    "SELECT l.* FROM administration_ledger l
                     JOIN patients p ON p.patient_id = l.patient_id
                     WHERE p.facility_id = ? AND l.chain_sequence <= ?
                     ORDER BY l.chain_sequence DESC LIMIT ?",
                )
                .bind(facility_id)
                .bind(snapshot)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            Scope::Patient(patient_id) => {
                sqlx::query(
                    "SELECT * FROM administration_ledger
                     WHERE patient_id = ? AND chain_sequence <= ?
                     ORDER BY chain_sequence DESC LIMIT ?",
                )
                .bind(patient_id)
                .bind(snapshot)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };

        let mut records = rows
            .iter()
            .map(AdministrationEvent::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    /// Run the three integrity checks over an already-resolved record set.
    pub(crate) async fn check_records(
        &self,
        records: &[AdministrationEvent],
        snapshot: i64,
    ) -> Result<VerificationReport, LedgerError> {
        let mut broken_links = Vec::new();
        let mut tampered_records = Vec::new();

        // Gap detection covers the whole global context spanned by the
        // resolved set, including records belonging to other tenants sitting
        // between the filtered ones, and the anchor predecessor itself. It
        // stays in SQL: only the boundary row after each missing run comes
        // back, so a sparse scope whose records span a wide stretch of the
        // global chain never materializes that stretch.
        let first_seq = records[0].chain_sequence;
        let last_seq = records[records.len() - 1].chain_sequence;
        let context_start = (first_seq - 1).max(0);
        let run_boundaries: Vec<(i64, Option<i64>)> = sqlx::query_as(
            "SELECT l.chain_sequence,
                    (SELECT MAX(p.chain_sequence) FROM administration_ledger p
                      WHERE p.chain_sequence < l.chain_sequence) AS prev_present
             FROM administration_ledger l
             WHERE l.chain_sequence > ? AND l.chain_sequence <= ?
               AND NOT EXISTS (SELECT 1 FROM administration_ledger p
                               WHERE p.chain_sequence = l.chain_sequence - 1)
             ORDER BY l.chain_sequence",
        )
        .bind(context_start)
        .bind(last_seq)
        .fetch_all(self.pool())
        .await?;

        let sequence_gaps: Vec<SequenceGap> = run_boundaries
            .into_iter()
            .map(|(after_run, prev_present)| SequenceGap {
                // Runs reaching back past the anchor predecessor are clamped
                // to the verified context.
                first_missing: prev_present
                    .map_or(context_start, |p| p + 1)
                    .max(context_start),
                last_missing: after_run - 1,
            })
            .collect();

        for record in records {
            // True global predecessor, fetched by sequence number. For the
            // genesis record the expected anchor is the zero sentinel.
            let expected_previous = if record.chain_sequence == 0 {
                Some(ZERO_HASH.to_string())
            } else {
                self.record_hash_at(record.chain_sequence - 1).await?
            };

            // Content integrity: a record is tampered only when its digest
            // fails to verify under both candidate previous-hash inputs, the
            // record's own stored link and the predecessor-derived hash. A
            // rewritten link field still verifies under the true predecessor,
            // and a record whose predecessor's stored hash was corrupted
            // still verifies under its own stored link; both stay link
            // findings instead of bleeding into the tamper list.
            let encoded = canonical_encode(&record.payload, record.chain_sequence);
            let computed = record_hash(&encoded, record.previous_hash.as_str());
            let content_verifies = computed == record.record_hash
                || expected_previous
                    .as_deref()
                    .is_some_and(|prev| record_hash(&encoded, prev) == record.record_hash);
            if !content_verifies {
                tampered_records.push(TamperedRecord {
                    chain_sequence: record.chain_sequence,
                    administration_id: record.payload.administration_id,
                    stored_hash: record.record_hash.clone(),
                    computed_hash: computed,
                });
            }

            // Structural integrity: stored link against the predecessor's
            // stored hash, literal comparison on both sides. A missing
            // predecessor is a gap, not a broken link.
            if let Some(expected) = expected_previous {
                if expected != record.previous_hash {
                    broken_links.push(BrokenLink {
                        chain_sequence: record.chain_sequence,
                        administration_id: record.payload.administration_id,
                        stored_previous_hash: record.previous_hash.clone(),
                        expected_previous_hash: expected,
                    });
                }
            }
        }

        Ok(VerificationReport {
            valid: broken_links.is_empty()
                && tampered_records.is_empty()
                && sequence_gaps.is_empty(),
            snapshot_sequence: snapshot,
            records_checked: records.len(),
            broken_links,
            tampered_records,
            sequence_gaps,
        })
    }
}
