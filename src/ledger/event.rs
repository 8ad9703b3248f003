//! Data model for medication administration events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::LedgerError;

/// Outcome of a scheduled administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdministrationStatus {
    Administered,
    Refused,
    Held,
    Omitted,
}

impl AdministrationStatus {
    /// Canonical lowercase form, used both for storage and for the canonical
    /// byte encoding. Must never change for an existing variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administered => "administered",
            Self::Refused => "refused",
            Self::Held => "held",
            Self::Omitted => "omitted",
        }
    }
}

impl fmt::Display for AdministrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdministrationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administered" => Ok(Self::Administered),
            "refused" => Ok(Self::Refused),
            "held" => Ok(Self::Held),
            "omitted" => Ok(Self::Omitted),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// Caller-supplied portion of an administration event. Everything here is
/// carried through the hash; the chain fields are owned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministrationPayload {
    pub administration_id: Uuid,
    pub order_id: String,
    pub patient_id: String,
    pub administered_by: String,
    pub scheduled_datetime: DateTime<Utc>,
    pub administered_datetime: DateTime<Utc>,
    pub dose_given: String,
    pub route_given: String,
    pub status: AdministrationStatus,
    pub reason_if_not_given: Option<String>,
    pub notes: Option<String>,
}

/// An immutable ledger record: the clinical payload plus the chain fields
/// assigned at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministrationEvent {
    #[serde(flatten)]
    pub payload: AdministrationPayload,
    pub chain_sequence: i64,
    pub record_hash: String,
    pub previous_hash: String,
}

impl AdministrationEvent {
    /// Map a ledger row back into an event. Timestamps are persisted as unix
    /// seconds, matching the precision the canonical encoder hashes.
    pub fn from_row(row: &SqliteRow) -> Result<Self, LedgerError> {
        let scheduled = timestamp_from_secs(row.try_get("scheduled_datetime")?)?;
        let administered = timestamp_from_secs(row.try_get("administered_datetime")?)?;
        let status: String = row.try_get("status")?;
        let id: String = row.try_get("administration_id")?;

        Ok(Self {
            payload: AdministrationPayload {
                administration_id: Uuid::parse_str(&id)
                    .map_err(|_| LedgerError::InvalidId(id))?,
                order_id: row.try_get("order_id")?,
                patient_id: row.try_get("patient_id")?,
                administered_by: row.try_get("administered_by")?,
                scheduled_datetime: scheduled,
                administered_datetime: administered,
                dose_given: row.try_get("dose_given")?,
                route_given: row.try_get("route_given")?,
                status: status.parse()?,
                reason_if_not_given: row.try_get("reason_if_not_given")?,
                notes: row.try_get("notes")?,
            },
            chain_sequence: row.try_get("chain_sequence")?,
            record_hash: row.try_get("record_hash")?,
            previous_hash: row.try_get("previous_hash")?,
        })
    }
}

fn timestamp_from_secs(secs: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::from_timestamp(secs, 0).ok_or(LedgerError::InvalidTimestamp)
}
