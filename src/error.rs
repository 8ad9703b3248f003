//! Error taxonomy for the administration ledger.
//!
//! Verification findings (broken links, tampered records, sequence gaps) are
//! deliberately not error variants: they are surfaced as structured report
//! entries so callers can act on each failure mode separately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The append lost the sequence race to concurrent writers after
    /// exhausting its retry budget. No row was written; the clinical action
    /// must be resubmitted in full.
    #[error("append lost the chain-sequence race after {attempts} attempts")]
    ChainContention { attempts: u32 },

    /// Verification or export was requested over a range that resolves to no
    /// records.
    #[error("no ledger records match the requested range")]
    RecordNotFound,

    /// Export was refused because verification found tampered records and the
    /// caller did not set the audit override.
    #[error("export refused: verification found {tampered} tampered record(s)")]
    ExportRefused { tampered: usize },

    /// A persisted timestamp could not be converted back to UTC.
    #[error("stored timestamp is out of range")]
    InvalidTimestamp,

    /// A persisted status string is not one of the known administration
    /// outcomes.
    #[error("unrecognized administration status: {0}")]
    InvalidStatus(String),

    /// A persisted administration id is not a valid uuid.
    #[error("stored administration id is not a valid uuid: {0}")]
    InvalidId(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
