//! Database connection and schema management.
//!
//! The ledger table is append-only by storage-layer constraint, not by
//! application convention: UPDATE and DELETE are blocked with triggers, so a
//! retroactive edit has to go out of its way (dropping the trigger) and is
//! never something the application role can do by accident.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Database handle shared by the ledger and its callers.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a connection pool, creating the database file if needed.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the ledger schema if it does not exist.
    pub async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        // chain_sequence doubles as the primary key: a lost append race
        // surfaces as a uniqueness violation instead of a silent fork.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS administration_ledger (
                chain_sequence INTEGER PRIMARY KEY,
                administration_id TEXT NOT NULL UNIQUE,
                order_id TEXT NOT NULL,
                patient_id TEXT NOT NULL,
                administered_by TEXT NOT NULL,
                scheduled_datetime INTEGER NOT NULL,
                administered_datetime INTEGER NOT NULL,
                dose_given TEXT NOT NULL,
                route_given TEXT NOT NULL,
                status TEXT NOT NULL,
                reason_if_not_given TEXT,
                notes TEXT,
                record_hash TEXT NOT NULL,
                previous_hash TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Facility membership, resolved by join. Owned by the patient CRUD
        // side of the system; the ledger only reads it.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS patients (
                patient_id TEXT PRIMARY KEY,
                facility_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS ledger_no_update
             BEFORE UPDATE ON administration_ledger
             BEGIN
                 SELECT RAISE(ABORT, 'administration ledger is append-only');
             END",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS ledger_no_delete
             BEFORE DELETE ON administration_ledger
             BEGIN
                 SELECT RAISE(ABORT, 'administration ledger is append-only');
             END",
        )
        .execute(&self.pool)
        .await?;

        info!("ledger schema initialized");
        Ok(())
    }

    /// Register a patient's facility membership for scoped verification.
    pub async fn register_patient(
        &self,
        patient_id: &str,
        facility_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO patients (patient_id, facility_id) VALUES (?, ?)
             ON CONFLICT(patient_id) DO UPDATE SET facility_id = excluded.facility_id",
        )
        .bind(patient_id)
        .bind(facility_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
