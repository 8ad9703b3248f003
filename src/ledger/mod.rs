//! The hash-chain ledger.
//!
//! Module layout, leaves first: `encode` produces the canonical byte form of
//! a record, `hash` digests it against the previous record's hash, `event`
//! holds the data model, `chain` owns the tail accessor and the concurrency-
//! safe append path, `verify` walks ranges and reports findings, `export`
//! serializes verified ranges for regulatory handoff.

pub mod chain;
pub mod encode;
pub mod event;
pub mod export;
pub mod hash;
pub mod verify;
