//! `PlayerProgress` repository (C2) — nodes of the per-story decision DAG,
//! shared across every player converging to the same `state_hash` (spec
//! §3, §9).

use std::collections::HashMap;

use novel_core::error::NovelError;
use novel_core::ids::{ProgressId, StoryId, UserId};
use novel_core::model::{PlayerProgress, INITIAL_STATE_HASH};
use tracing::{instrument, warn};

#[instrument(skip(executor))]
pub async fn find_by_story_and_hash<'e, E>(
    executor: E,
    story_id: StoryId,
    state_hash: &str,
) -> Result<Option<PlayerProgress>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerProgress>(
        "SELECT * FROM player_progress WHERE story_id = $1 AND state_hash = $2",
    )
    .bind(story_id)
    .bind(state_hash)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)
}

#[instrument(skip(executor))]
pub async fn find_by_id<'e, E>(executor: E, id: ProgressId) -> Result<PlayerProgress, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerProgress>("SELECT * FROM player_progress WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(NovelError::from)?
        .ok_or(NovelError::NotFound)
}

/// Create the node at a new hash, or return the existing one if a
/// concurrent writer beat this call to the unique index (spec §9 "Unique
/// index race"). Takes a concrete connection for the same reason
/// `story_scene::insert_or_get` does — two sequential statements, one
/// connection.
#[instrument(skip(conn, stats, encountered_characters))]
pub async fn create_or_get(
    conn: &mut sqlx::PgConnection,
    user_id: UserId,
    story_id: StoryId,
    state_hash: &str,
    stats: &HashMap<String, i64>,
    scene_index: i32,
    encountered_characters: &[String],
) -> Result<PlayerProgress, NovelError> {
    let stats_json = serde_json::to_value(stats).expect("i64 map always serializes");
    let characters_json =
        serde_json::to_value(encountered_characters).expect("string vec always serializes");

    let inserted = sqlx::query_as::<_, PlayerProgress>(
        r#"
        INSERT INTO player_progress
            (id, user_id, story_id, state_hash, core_stats, scene_index, encountered_characters)
        VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6)
        ON CONFLICT (story_id, state_hash) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(story_id)
    .bind(state_hash)
    .bind(&stats_json)
    .bind(scene_index)
    .bind(&characters_json)
    .fetch_optional(&mut *conn)
    .await
    .map_err(NovelError::from)?;

    if let Some(progress) = inserted {
        return Ok(progress);
    }

    warn!(story_id = %story_id, state_hash, "progress-node insert lost the unique-index race; re-reading existing row");
    find_by_story_and_hash(&mut *conn, story_id, state_hash)
        .await?
        .ok_or(NovelError::NotFound)
}

/// `CreateNewGameState`'s initial node: hash = `InitialStateHash`, stats
/// from `CoreStatsDefinition.initial`, zero scene index, no characters yet
/// (spec §4.2).
#[instrument(skip(conn, initial_stats))]
pub async fn upsert_initial(
    conn: &mut sqlx::PgConnection,
    user_id: UserId,
    story_id: StoryId,
    initial_stats: &HashMap<String, i64>,
) -> Result<PlayerProgress, NovelError> {
    create_or_get(conn, user_id, story_id, INITIAL_STATE_HASH, initial_stats, 0, &[]).await
}

/// Refresh cached summaries from the latest worker output; never mutates
/// anything else about the node (spec §3 lifecycle: "ProgressNode ...
/// never mutated after creation other than to refresh cached summaries").
#[instrument(skip(executor, story_summary, future_direction, var_impact_summary))]
pub async fn update_cached_summaries<'e, E>(
    executor: E,
    id: ProgressId,
    story_summary: Option<&str>,
    future_direction: Option<&str>,
    var_impact_summary: Option<&str>,
) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE player_progress
         SET last_story_summary = $2, last_future_direction = $3, last_var_impact_summary = $4
         WHERE id = $1",
    )
    .bind(id)
    .bind(story_summary)
    .bind(future_direction)
    .bind(var_impact_summary)
    .execute(executor)
    .await
    .map_err(NovelError::from)?;
    Ok(())
}

/// `UpdatePlayerProgressInternal` (spec §4.2): strict JSON validation of the
/// replacement stats/characters before writing.
#[instrument(skip(executor, stats, encountered_characters))]
pub async fn update_internal<'e, E>(
    executor: E,
    id: ProgressId,
    stats: serde_json::Value,
    encountered_characters: serde_json::Value,
) -> Result<PlayerProgress, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    serde_json::from_value::<HashMap<String, i64>>(stats.clone())
        .map_err(|e| NovelError::bad_request("core_stats", e.to_string()))?;
    serde_json::from_value::<Vec<String>>(encountered_characters.clone())
        .map_err(|e| NovelError::bad_request("encountered_characters", e.to_string()))?;

    sqlx::query_as::<_, PlayerProgress>(
        "UPDATE player_progress SET core_stats = $2, encountered_characters = $3
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(stats)
    .bind(encountered_characters)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)?
    .ok_or(NovelError::NotFound)
}
