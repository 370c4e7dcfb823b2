//! `PlayerGameState` repository (C2) — save slots, singleton per
//! `(player, story)` (spec §3, Property 3).

use novel_core::error::NovelError;
use novel_core::ids::{GameStateId, ProgressId, SceneId, StoryId, UserId};
use novel_core::model::{PlayerGameState, PlayerStatus};
use tracing::instrument;

#[instrument(skip(executor))]
pub async fn find_by_id<'e, E>(executor: E, id: GameStateId) -> Result<PlayerGameState, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>("SELECT * FROM player_game_states WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(NovelError::from)?
        .ok_or(NovelError::PlayerGameStateNotFound)
}

/// Row-locking read used by `MakeChoice`/retry (spec §5: "implementers
/// MUST use row-level locking on the game state row for the duration of
/// the choice/retry transaction"). Only valid inside a transaction.
#[instrument(skip(executor))]
pub async fn find_by_id_for_update<'e, E>(
    executor: E,
    id: GameStateId,
) -> Result<PlayerGameState, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>(
        "SELECT * FROM player_game_states WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)?
    .ok_or(NovelError::PlayerGameStateNotFound)
}

#[instrument(skip(executor))]
pub async fn find_by_player_and_story<'e, E>(
    executor: E,
    player_id: UserId,
    story_id: StoryId,
) -> Result<Option<PlayerGameState>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>(
        "SELECT * FROM player_game_states WHERE player_id = $1 AND story_id = $2",
    )
    .bind(player_id)
    .bind(story_id)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)
}

#[instrument(skip(executor))]
pub async fn list_by_player<'e, E>(
    executor: E,
    player_id: UserId,
) -> Result<Vec<PlayerGameState>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>(
        "SELECT * FROM player_game_states WHERE player_id = $1 ORDER BY last_activity_at DESC",
    )
    .bind(player_id)
    .fetch_all(executor)
    .await
    .map_err(NovelError::from)
}

/// Enforces the one-slot-per-story invariant at the database layer via a
/// unique `(player_id, story_id)` index; a violation here means the caller
/// raced another `CreateNewGameState` for the same player+story and should
/// surface `SaveSlotExists`.
#[instrument(skip(executor))]
pub async fn insert<'e, E>(
    executor: E,
    player_id: UserId,
    story_id: StoryId,
    player_progress_id: ProgressId,
    current_scene_id: Option<SceneId>,
    player_status: PlayerStatus,
) -> Result<PlayerGameState, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>(
        r#"
        INSERT INTO player_game_states
            (id, player_id, story_id, player_progress_id, current_scene_id, player_status,
             started_at, last_activity_at)
        VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now(), now())
        RETURNING *
        "#,
    )
    .bind(player_id)
    .bind(story_id)
    .bind(player_progress_id)
    .bind(current_scene_id)
    .bind(player_status)
    .fetch_one(executor)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => NovelError::SaveSlotExists,
        _ => NovelError::from(e),
    })
}

#[instrument(skip(executor))]
pub async fn update_progress_and_status<'e, E>(
    executor: E,
    id: GameStateId,
    player_progress_id: ProgressId,
    current_scene_id: Option<SceneId>,
    player_status: PlayerStatus,
) -> Result<PlayerGameState, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlayerGameState>(
        r#"
        UPDATE player_game_states
        SET player_progress_id = $2, current_scene_id = $3, player_status = $4,
            error_details = NULL, last_activity_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(player_progress_id)
    .bind(current_scene_id)
    .bind(player_status)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)?
    .ok_or(NovelError::PlayerGameStateNotFound)
}

#[instrument(skip(executor, error_details))]
pub async fn mark_error<'e, E>(
    executor: E,
    id: GameStateId,
    error_details: &str,
) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE player_game_states
         SET player_status = 'error', error_details = $2, last_activity_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(error_details)
    .execute(executor)
    .await
    .map_err(NovelError::from)?;
    Ok(())
}

#[instrument(skip(executor))]
pub async fn delete<'e, E>(executor: E, id: GameStateId) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM player_game_states WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map_err(NovelError::from)?;
    if result.rows_affected() == 0 {
        return Err(NovelError::PlayerGameStateNotFound);
    }
    Ok(())
}
