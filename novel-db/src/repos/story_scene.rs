//! `StoryScene` repository (C2). Content-addressed by `(story_id,
//! state_hash)`; scene creation is idempotent via a unique index (spec
//! §5, §9 "Unique index race").

use novel_core::error::NovelError;
use novel_core::ids::{SceneId, StoryId};
use novel_core::model::StoryScene;
use tracing::{instrument, warn};

#[instrument(skip(executor))]
pub async fn find_by_story_and_hash<'e, E>(
    executor: E,
    story_id: StoryId,
    state_hash: &str,
) -> Result<Option<StoryScene>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, StoryScene>(
        "SELECT * FROM story_scenes WHERE story_id = $1 AND state_hash = $2",
    )
    .bind(story_id)
    .bind(state_hash)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)
}

#[instrument(skip(executor))]
pub async fn find_by_id<'e, E>(executor: E, id: SceneId) -> Result<StoryScene, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, StoryScene>("SELECT * FROM story_scenes WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(NovelError::from)?
        .ok_or(NovelError::SceneNotFound)
}

/// Insert a scene at `(story_id, state_hash)`. If a concurrent insert won
/// the unique-constraint race, re-read and return the row that now exists
/// rather than surfacing the conflict as an error (spec §9, Property 2).
///
/// Takes a concrete connection (rather than a generic `PgExecutor`) because
/// it needs two sequential statements against the same connection — the
/// same reason `with_tx` callers reach for `Tx::executor()` here instead of
/// cloning a pool handle.
#[instrument(skip(conn, content))]
pub async fn insert_or_get(
    conn: &mut sqlx::PgConnection,
    story_id: StoryId,
    state_hash: &str,
    content: serde_json::Value,
) -> Result<StoryScene, NovelError> {
    let inserted = sqlx::query_as::<_, StoryScene>(
        r#"
        INSERT INTO story_scenes (id, story_id, state_hash, content)
        VALUES (gen_random_uuid(), $1, $2, $3)
        ON CONFLICT (story_id, state_hash) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(story_id)
    .bind(state_hash)
    .bind(&content)
    .fetch_optional(&mut *conn)
    .await
    .map_err(NovelError::from)?;

    if let Some(scene) = inserted {
        return Ok(scene);
    }

    warn!(story_id = %story_id, state_hash, "scene insert lost the unique-index race; re-reading existing row");
    find_by_story_and_hash(&mut *conn, story_id, state_hash)
        .await?
        .ok_or(NovelError::SceneNotFound)
}

/// `UpdateSceneInternal` (spec §4.2): validates the replacement content is
/// syntactically valid JSON with the expected shape before writing.
#[instrument(skip(executor, content))]
pub async fn update_internal<'e, E>(
    executor: E,
    id: SceneId,
    content: serde_json::Value,
) -> Result<StoryScene, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    serde_json::from_value::<novel_core::model::SceneContent>(content.clone())
        .map_err(|e| NovelError::bad_request("content", e.to_string()))?;

    sqlx::query_as::<_, StoryScene>(
        "UPDATE story_scenes SET content = $2 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(content)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)?
    .ok_or(NovelError::SceneNotFound)
}

/// `DeleteSceneInternal` (spec §4.2): admin-only hard delete.
#[instrument(skip(executor))]
pub async fn delete_internal<'e, E>(executor: E, id: SceneId) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM story_scenes WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map_err(NovelError::from)?;
    if result.rows_affected() == 0 {
        return Err(NovelError::SceneNotFound);
    }
    Ok(())
}
