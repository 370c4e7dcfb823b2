//! Typed persistence for the gameplay-orchestration core (C2) plus the
//! transaction helper (C8) repositories are built to run under.

pub mod repos;
pub mod tx;

pub use tx::{with_tx, BoxFuture, Tx};

pub type DbPool = sqlx::PgPool;

use std::time::Duration;

use anyhow::{Context, Result};
use novel_core::config::Config;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Build a connection pool the way `he-database-runtime::DatabaseManager`
/// does: sized from config, with a bounded connect timeout.
pub async fn connect(config: &Config) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("failed to connect to the gameplay database")?;

    info!("database connection pool established");
    Ok(pool)
}
