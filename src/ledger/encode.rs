//! Canonical record encoder.
//!
//! Produces the deterministic byte form of a record that feeds the hash. The
//! layout is versioned and language-independent: an ASCII version tag, then
//! every field in fixed order, strings as tag + big-endian u32 length + UTF-8
//! bytes, integers as tag + 8 big-endian bytes, nullable strings with an
//! explicit presence byte. Nothing here may depend on locale, struct layout,
//! or serde defaults.
//!
//! Any layout change must mint a new version tag; records hashed under an
//! older tag continue to verify against the layout in force when they were
//! written, because the tag itself is part of the hashed bytes.

use crate::ledger::event::AdministrationPayload;

/// Current encoder schema version.
pub const ENCODER_VERSION: u8 = 1;

/// Version tag embedded at the start of every encoding.
const VERSION_TAG: &[u8; 4] = b"MAR1";

// Field tags, one per payload field plus the chain sequence. Never reorder or
// reuse within a version.
const TAG_ADMINISTRATION_ID: u8 = 0x01;
const TAG_ORDER_ID: u8 = 0x02;
const TAG_PATIENT_ID: u8 = 0x03;
const TAG_ADMINISTERED_BY: u8 = 0x04;
const TAG_SCHEDULED: u8 = 0x05;
const TAG_ADMINISTERED: u8 = 0x06;
const TAG_DOSE_GIVEN: u8 = 0x07;
const TAG_ROUTE_GIVEN: u8 = 0x08;
const TAG_STATUS: u8 = 0x09;
const TAG_REASON: u8 = 0x0a;
const TAG_NOTES: u8 = 0x0b;
const TAG_CHAIN_SEQUENCE: u8 = 0x0c;

/// Encode a payload at a given chain position.
///
/// The chain sequence is bound into the encoding so that moving a record to a
/// different position changes its digest; `record_hash` and `previous_hash`
/// are excluded (they are derived from this output).
pub fn canonical_encode(payload: &AdministrationPayload, chain_sequence: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(VERSION_TAG);

    put_str(
        &mut buf,
        TAG_ADMINISTRATION_ID,
        // Hyphenated lowercase is the one canonical uuid rendering.
        &payload.administration_id.hyphenated().to_string(),
    );
    put_str(&mut buf, TAG_ORDER_ID, &payload.order_id);
    put_str(&mut buf, TAG_PATIENT_ID, &payload.patient_id);
    put_str(&mut buf, TAG_ADMINISTERED_BY, &payload.administered_by);
    put_i64(&mut buf, TAG_SCHEDULED, payload.scheduled_datetime.timestamp());
    put_i64(
        &mut buf,
        TAG_ADMINISTERED,
        payload.administered_datetime.timestamp(),
    );
    put_str(&mut buf, TAG_DOSE_GIVEN, &payload.dose_given);
    put_str(&mut buf, TAG_ROUTE_GIVEN, &payload.route_given);
    put_str(&mut buf, TAG_STATUS, payload.status.as_str());
    put_opt_str(&mut buf, TAG_REASON, payload.reason_if_not_given.as_deref());
    put_opt_str(&mut buf, TAG_NOTES, payload.notes.as_deref());
    put_i64(&mut buf, TAG_CHAIN_SEQUENCE, chain_sequence);

    buf
}

fn put_str(buf: &mut Vec<u8>, tag: u8, value: &str) {
    buf.push(tag);
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn put_opt_str(buf: &mut Vec<u8>, tag: u8, value: Option<&str>) {
    buf.push(tag);
    match value {
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v.as_bytes());
        }
        // Absent and empty-string must encode differently.
        None => buf.push(0),
    }
}

fn put_i64(buf: &mut Vec<u8>, tag: u8, value: i64) {
    buf.push(tag);
    buf.extend_from_slice(&value.to_be_bytes());
}
