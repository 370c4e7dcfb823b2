//! Runtime configuration (spec §A.3), loaded the way
//! `he-database-runtime::DatabaseConfig::from_env` does: `.env` via
//! `dotenvy`, then typed env vars with sane fallback defaults.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub broker_url: String,
    /// Bounded timeout for client-notification publishes (spec §5: 5s).
    pub client_notification_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;

        Ok(Self {
            database_url,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            broker_url: env::var("BROKER_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            client_notification_timeout: Duration::from_secs(
                env::var("CLIENT_NOTIFICATION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        })
    }
}
