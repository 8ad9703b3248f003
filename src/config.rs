//! Application configuration.
//!
//! Settings are layered: built-in defaults, then an optional `config/default`
//! file, then an environment-specific file selected by `MARCHAIN_ENV`, then
//! `MARCHAIN_*` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub ledger: LedgerTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

/// Tuning knobs for the append retry loop and the point-of-care validator.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTuning {
    pub max_append_attempts: u32,
    pub backoff_base_ms: u64,
    pub point_of_care_limit: i64,
}

pub fn load() -> Result<Settings, ConfigError> {
    let env = std::env::var("MARCHAIN_ENV").unwrap_or_else(|_| "development".into());

    Config::builder()
        .set_default("database.url", "sqlite:marchain.db")?
        .set_default("ledger.max_append_attempts", 8_i64)?
        .set_default("ledger.backoff_base_ms", 10_i64)?
        .set_default("ledger.point_of_care_limit", 256_i64)?
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", env)).required(false))
        .add_source(Environment::with_prefix("MARCHAIN").separator("__"))
        .build()?
        .try_deserialize()
}
