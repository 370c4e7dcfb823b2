//! `ImageReference` repository (C2) — maps a character/cover/card
//! reference tag to the blob URL a generation worker produced (spec §3,
//! §4.1).

use novel_core::error::NovelError;
use novel_core::ids::{CharacterId, ImageReferenceId, StoryId};
use novel_core::model::ImageReference;
use tracing::instrument;

#[instrument(skip(executor))]
pub async fn insert_pending<'e, E>(
    executor: E,
    story_id: StoryId,
    character_id: Option<CharacterId>,
    reference: &str,
) -> Result<ImageReference, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, ImageReference>(
        r#"
        INSERT INTO image_references (id, story_id, character_id, reference, url)
        VALUES (gen_random_uuid(), $1, $2, $3, NULL)
        RETURNING *
        "#,
    )
    .bind(story_id)
    .bind(character_id)
    .bind(reference)
    .fetch_one(executor)
    .await
    .map_err(NovelError::from)
}

#[instrument(skip(executor))]
pub async fn find_by_reference<'e, E>(
    executor: E,
    reference: &str,
) -> Result<Option<ImageReference>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, ImageReference>("SELECT * FROM image_references WHERE reference = $1")
        .bind(reference)
        .fetch_optional(executor)
        .await
        .map_err(NovelError::from)
}

#[instrument(skip(executor))]
pub async fn resolve_url<'e, E>(
    executor: E,
    id: ImageReferenceId,
    url: &str,
) -> Result<(), NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("UPDATE image_references SET url = $2 WHERE id = $1")
        .bind(id)
        .bind(url)
        .execute(executor)
        .await
        .map_err(NovelError::from)?;
    Ok(())
}

#[instrument(skip(executor))]
pub async fn list_unresolved_for_story<'e, E>(
    executor: E,
    story_id: StoryId,
) -> Result<Vec<ImageReference>, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, ImageReference>(
        "SELECT * FROM image_references WHERE story_id = $1 AND url IS NULL",
    )
    .bind(story_id)
    .fetch_all(executor)
    .await
    .map_err(NovelError::from)
}
