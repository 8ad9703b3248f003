//! marchain command-line interface.
//!
//! Operational entry points for the administration ledger: schema setup,
//! appending events, integrity verification, point-of-care validation, and
//! regulatory export. The HTTP recording flow consumes the same library API.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use marchain::{
    config, AdministrationPayload, Database, ExportOptions, Ledger, LedgerSettings, Scope,
};

#[derive(Parser)]
#[command(name = "marchain", about = "Tamper-evident medication administration ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger schema (idempotent).
    Init,
    /// Register a patient's facility membership for scoped verification.
    RegisterPatient {
        patient_id: String,
        facility_id: String,
    },
    /// Append one administration event to the chain.
    Append {
        #[arg(long)]
        order_id: String,
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        administered_by: String,
        #[arg(long)]
        dose: String,
        #[arg(long)]
        route: String,
        /// administered | refused | held | omitted
        #[arg(long)]
        status: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// RFC 3339; defaults to now.
        #[arg(long)]
        scheduled: Option<String>,
        /// RFC 3339; defaults to now.
        #[arg(long)]
        administered_at: Option<String>,
    },
    /// Verify chain integrity over the most recent records.
    Verify {
        #[arg(long, conflicts_with = "patient")]
        facility: Option<String>,
        #[arg(long)]
        patient: Option<String>,
        #[arg(long, default_value_t = 1000)]
        limit: i64,
    },
    /// Point-of-care trust check for one patient.
    VerifyPatient { patient_id: String },
    /// Export a verified segment for regulatory handoff.
    Export {
        #[arg(long)]
        facility: Option<String>,
        #[arg(long, default_value_t = 1000)]
        limit: i64,
        /// Output file; stdout if omitted.
        #[arg(long)]
        out: Option<std::path::PathBuf>,
        /// Export even if verification found tampered records. Audited.
        #[arg(long)]
        allow_tampered: bool,
        #[arg(long, requires = "allow_tampered")]
        override_reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = config::load().context("failed to load configuration")?;

    let database = Database::connect(&settings.database.url)
        .await
        .context("failed to open ledger database")?;
    database.initialize_schema().await?;

    let ledger = Ledger::with_settings(
        &database,
        LedgerSettings {
            max_append_attempts: settings.ledger.max_append_attempts,
            backoff_base_ms: settings.ledger.backoff_base_ms,
            point_of_care_limit: settings.ledger.point_of_care_limit,
        },
    );

    match cli.command {
        Command::Init => {
            println!("ledger schema ready");
        }
        Command::RegisterPatient {
            patient_id,
            facility_id,
        } => {
            database.register_patient(&patient_id, &facility_id).await?;
            println!("registered {} at facility {}", patient_id, facility_id);
        }
        Command::Append {
            order_id,
            patient_id,
            administered_by,
            dose,
            route,
            status,
            reason,
            notes,
            scheduled,
            administered_at,
        } => {
            let payload = AdministrationPayload {
                administration_id: Uuid::new_v4(),
                order_id,
                patient_id,
                administered_by,
                scheduled_datetime: parse_or_now(scheduled.as_deref())?,
                administered_datetime: parse_or_now(administered_at.as_deref())?,
                dose_given: dose,
                route_given: route,
                status: status.parse()?,
                reason_if_not_given: reason,
                notes,
            };
            let event = ledger.append(payload).await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        Command::Verify {
            facility,
            patient,
            limit,
        } => {
            let scope = match (facility, patient) {
                (Some(f), _) => Scope::Facility(f),
                (None, Some(p)) => Scope::Patient(p),
                (None, None) => Scope::WholeLedger,
            };
            let report = ledger.verify(&scope, limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::VerifyPatient { patient_id } => {
            let report = ledger.validate_patient_chain(&patient_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Export {
            facility,
            limit,
            out,
            allow_tampered,
            override_reason,
        } => {
            let scope = match facility {
                Some(f) => Scope::Facility(f),
                None => Scope::WholeLedger,
            };
            let options = ExportOptions {
                allow_tampered,
                override_reason,
            };
            let segment = ledger.export(&scope, limit, &options).await?;
            let json = serde_json::to_string_pretty(&segment)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json).context("failed to write export file")?;
                    println!("exported {} records to {}", segment.records.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}

fn parse_or_now(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .context("timestamp must be RFC 3339")?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}
