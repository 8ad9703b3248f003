//! marchain - medication administration hash-chain ledger
//!
//! An append-only, cryptographically linked record of medication
//! administration events. Every record carries a SHA-256 digest over its
//! canonical byte encoding concatenated with the digest of the record that
//! precedes it in global chain order, so any retroactive edit, deletion, or
//! reordering is mechanically detectable.

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;

pub use db::Database;
pub use error::LedgerError;
pub use ledger::chain::{ChainTip, Ledger, LedgerSettings};
pub use ledger::event::{AdministrationEvent, AdministrationPayload, AdministrationStatus};
pub use ledger::export::{ExportOptions, LedgerSegment};
pub use ledger::hash::ZERO_HASH;
pub use ledger::verify::{Scope, VerificationReport};
