//! Regulatory export of verified ledger segments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::LedgerError;
use crate::ledger::chain::Ledger;
use crate::ledger::encode::ENCODER_VERSION;
use crate::ledger::event::AdministrationEvent;
use crate::ledger::verify::{Scope, VerificationReport};

/// Export controls. Exporting a range with known tampered records is refused
/// unless `allow_tampered` is set; the override is an auditable action and is
/// logged with its reason.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub allow_tampered: bool,
    pub override_reason: Option<String>,
}

/// A verified range plus its chain metadata, in a stable serialization for
/// handoff to regulators or external auditors.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSegment {
    pub exported_at: DateTime<Utc>,
    pub encoder_version: u8,
    pub scope: Scope,
    pub verification: VerificationReport,
    pub records: Vec<AdministrationEvent>,
}

impl Ledger {
    /// Verify the last `limit` records matching `scope` and serialize them
    /// with their chain metadata and the verification report.
    #[instrument(skip(self, options))]
    pub async fn export(
        &self,
        scope: &Scope,
        limit: i64,
        options: &ExportOptions,
    ) -> Result<LedgerSegment, LedgerError> {
        let tip = self.latest_tip().await?;
        if tip.sequence < 0 {
            return Err(LedgerError::RecordNotFound);
        }
        let snapshot = tip.sequence;
        let records = self.resolve_scope(scope, limit, snapshot).await?;
        if records.is_empty() {
            return Err(LedgerError::RecordNotFound);
        }

        let verification = self.check_records(&records, snapshot).await?;
        let tampered = verification.tampered_records.len();
        if tampered > 0 {
            if !options.allow_tampered {
                return Err(LedgerError::ExportRefused { tampered });
            }
            warn!(
                tampered,
                reason = options.override_reason.as_deref().unwrap_or("none given"),
                "exporting segment with tampered records under audit override"
            );
        }

        info!(
            records = records.len(),
            valid = verification.valid,
            "ledger segment exported"
        );
        Ok(LedgerSegment {
            exported_at: Utc::now(),
            encoder_version: ENCODER_VERSION,
            scope: scope.clone(),
            verification,
            records,
        })
    }
}
