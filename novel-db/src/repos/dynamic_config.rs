//! `DynamicConfig` repository (C2) — per-operation tunables (image-prompt
//! suffixes and the like) read fresh on every call rather than cached in
//! memory (spec §9 "Global mutable state: none is required").

use novel_core::error::NovelError;
use tracing::instrument;

#[instrument(skip(executor))]
pub async fn get<'e, E>(executor: E, key: &str) -> Result<Option<serde_json::Value>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT value FROM dynamic_config WHERE key = $1")
            .bind(key)
            .fetch_optional(executor)
            .await
            .map_err(NovelError::from)?;
    Ok(row.map(|(value,)| value))
}

#[instrument(skip(executor, value))]
pub async fn set<'e, E>(
    executor: E,
    key: &str,
    value: serde_json::Value,
) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO dynamic_config (key, value) VALUES ($1, $2)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await
    .map_err(NovelError::from)?;
    Ok(())
}
