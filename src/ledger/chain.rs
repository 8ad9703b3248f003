//! Chain state accessor and the append path.
//!
//! Append is the only write path and the only serialization point is the
//! tail: `chain_sequence` is the table's primary key, so two writers that
//! read the same tail and race to claim the next sequence cannot both
//! succeed. The loser sees a uniqueness violation, re-reads the tail, and
//! recomputes its hash against the new predecessor.

use std::time::Duration;

use sqlx::sqlite::SqlitePool;
use tracing::{debug, instrument, warn};

use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::db::Database;
use crate::error::LedgerError;
use crate::ledger::encode::canonical_encode;
use crate::ledger::event::{AdministrationEvent, AdministrationPayload};
use crate::ledger::hash::{record_hash, ZERO_HASH};

/// Tail of the global chain: the highest assigned sequence and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub sequence: i64,
    pub hash: String,
}

impl ChainTip {
    /// Tail of an empty ledger. The next append claims sequence 0 and links
    /// against the zero sentinel.
    pub fn genesis() -> Self {
        Self {
            sequence: -1,
            hash: ZERO_HASH.to_string(),
        }
    }
}

/// Tuning for the append retry loop and the point-of-care validator cap.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub max_append_attempts: u32,
    pub backoff_base_ms: u64,
    pub point_of_care_limit: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_append_attempts: 8,
            backoff_base_ms: 10,
            point_of_care_limit: 256,
        }
    }
}

/// Handle to the administration ledger.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl Ledger {
    pub fn new(database: &Database) -> Self {
        Self::with_settings(database, LedgerSettings::default())
    }

    pub fn with_settings(database: &Database, settings: LedgerSettings) -> Self {
        Self {
            pool: database.pool().clone(),
            settings,
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Read the current global tail. Not facility-scoped: the chain is one
    /// total order across all tenants.
    pub async fn latest_tip(&self) -> Result<ChainTip, LedgerError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT chain_sequence, record_hash FROM administration_ledger
             ORDER BY chain_sequence DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((sequence, hash)) => ChainTip { sequence, hash },
            None => ChainTip::genesis(),
        })
    }

    /// Append one administration event to the chain.
    ///
    /// Reads the tail, computes the record hash over the canonical encoding
    /// concatenated with the tail hash, and inserts at `tail + 1`. A lost
    /// race is retried from the tail read with jittered exponential backoff;
    /// the payload itself is never altered between attempts. Exhausting the
    /// retry budget surfaces [`LedgerError::ChainContention`] with no row
    /// written.
    #[instrument(skip(self, payload), fields(
        administration_id = %payload.administration_id,
        patient_id = %payload.patient_id,
    ))]
    pub async fn append(
        &self,
        payload: AdministrationPayload,
    ) -> Result<AdministrationEvent, LedgerError> {
        let mut backoff = ExponentialBackoff::from_millis(2)
            .factor(self.settings.backoff_base_ms)
            .max_delay(Duration::from_millis(250))
            .map(jitter)
            .take(self.settings.max_append_attempts.saturating_sub(1) as usize);

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let tip = self.latest_tip().await?;
            let sequence = tip.sequence + 1;
            let encoded = canonical_encode(&payload, sequence);
            let hash = record_hash(&encoded, &tip.hash);

            match self.insert_record(&payload, sequence, &hash, &tip.hash).await {
                Ok(()) => {
                    debug!(sequence, "administration event appended");
                    return Ok(AdministrationEvent {
                        payload,
                        chain_sequence: sequence,
                        record_hash: hash,
                        previous_hash: tip.hash,
                    });
                }
                Err(err) if is_retryable_conflict(&err) => match backoff.next() {
                    Some(delay) => {
                        warn!(sequence, attempts, "lost append race, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(LedgerError::ChainContention { attempts }),
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn insert_record(
        &self,
        payload: &AdministrationPayload,
        sequence: i64,
        hash: &str,
        previous_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO administration_ledger (
                chain_sequence, administration_id, order_id, patient_id,
                administered_by, scheduled_datetime, administered_datetime,
                dose_given, route_given, status, reason_if_not_given, notes,
                record_hash, previous_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sequence)
        .bind(payload.administration_id.to_string())
        .bind(&payload.order_id)
        .bind(&payload.patient_id)
        .bind(&payload.administered_by)
        .bind(payload.scheduled_datetime.timestamp())
        .bind(payload.administered_datetime.timestamp())
        .bind(&payload.dose_given)
        .bind(&payload.route_given)
        .bind(payload.status.as_str())
        .bind(&payload.reason_if_not_given)
        .bind(&payload.notes)
        .bind(hash)
        .bind(previous_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored hash of the record at an exact chain position, if present.
    pub(crate) async fn record_hash_at(
        &self,
        sequence: i64,
    ) -> Result<Option<String>, LedgerError> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT record_hash FROM administration_ledger WHERE chain_sequence = ?",
        )
        .bind(sequence)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }
}

/// A conflict worth re-reading the tail for: the claimed sequence was taken
/// by a concurrent writer, or SQLite reported the database busy/locked under
/// write contention.
fn is_retryable_conflict(err: &sqlx::Error) -> bool {
    match err.as_database_error() {
        Some(db) => {
            db.is_unique_violation()
                || matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
        }
        None => false,
    }
}
