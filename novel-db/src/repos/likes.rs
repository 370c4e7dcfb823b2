//! Likes repository (C2) — the `likes_count` on `PublishedStory` plus the
//! per-user like rows it is derived from.

use novel_core::error::NovelError;
use novel_core::ids::{StoryId, UserId};
use tracing::instrument;

#[instrument(skip(executor))]
pub async fn has_liked<'e, E>(
    executor: E,
    story_id: StoryId,
    user_id: UserId,
) -> Result<bool, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM story_likes WHERE story_id = $1 AND user_id = $2",
    )
    .bind(story_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(NovelError::from)?;
    Ok(row.is_some())
}

#[instrument(skip(conn))]
pub async fn add_like(
    conn: &mut sqlx::PgConnection,
    story_id: StoryId,
    user_id: UserId,
) -> Result<(), NovelError> {
    let inserted = sqlx::query(
        "INSERT INTO story_likes (story_id, user_id) VALUES ($1, $2)
         ON CONFLICT (story_id, user_id) DO NOTHING",
    )
    .bind(story_id)
    .bind(user_id)
    .execute(&mut *conn)
    .await
    .map_err(NovelError::from)?;

    if inserted.rows_affected() == 1 {
        sqlx::query("UPDATE published_stories SET likes_count = likes_count + 1 WHERE id = $1")
            .bind(story_id)
            .execute(&mut *conn)
            .await
            .map_err(NovelError::from)?;
    }
    Ok(())
}

#[instrument(skip(conn))]
pub async fn remove_like(
    conn: &mut sqlx::PgConnection,
    story_id: StoryId,
    user_id: UserId,
) -> Result<(), NovelError> {
    let deleted = sqlx::query("DELETE FROM story_likes WHERE story_id = $1 AND user_id = $2")
        .bind(story_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(NovelError::from)?;

    if deleted.rows_affected() == 1 {
        sqlx::query(
            "UPDATE published_stories SET likes_count = GREATEST(likes_count - 1, 0) WHERE id = $1",
        )
        .bind(story_id)
        .execute(&mut *conn)
        .await
        .map_err(NovelError::from)?;
    }
    Ok(())
}
