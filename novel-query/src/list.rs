//! Story-list queries: the public browse feed and an author's own stories.
//!
//! Grounded in `he-core`'s `list_received_mails`/`list_sent_mails`
//! (`crates/he-core/src/entities/mail.rs`) for the limit/offset shape, with
//! `StoryListItem` kept deliberately narrower than `PublishedStory` — list
//! rows never need `config`/`setup`, and leaving those opaque JSON blobs
//! out keeps a browse page cheap regardless of how large a story's
//! generated setup gets.

use novel_core::error::NovelError;
use novel_core::ids::{StoryId, UserId};
use novel_core::model::PublishedStoryStatus;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Default and ceiling page size. A caller asking for more than this gets
/// silently capped, matching the defensive clamp `he-api`'s leaderboard
/// handler applies to its own `limit` query param.
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoryListItem {
    pub id: StoryId,
    pub user_id: UserId,
    pub language: String,
    pub is_adult_content: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub likes_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct StoryListPage {
    pub items: Vec<StoryListItem>,
    /// `true` when a further page exists (one extra row was fetched and
    /// trimmed, avoiding a separate `COUNT(*)`).
    pub has_more: bool,
}

fn clamp_page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Public browse feed: `Ready` stories marked `is_public`, newest first.
/// `include_adult_content` gates the adult-content flag the same way the
/// caller's own age/consent check would upstream of this façade.
#[instrument(skip(executor))]
pub async fn list_public_stories<'e, E>(
    executor: E,
    include_adult_content: bool,
    limit: Option<i64>,
    offset: i64,
) -> Result<StoryListPage, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let page_size = clamp_page_size(limit);
    let rows: Vec<StoryListItem> = sqlx::query_as(
        "SELECT id, user_id, language, is_adult_content, title, description,
                cover_image_url, likes_count, created_at
         FROM published_stories
         WHERE status = $1 AND is_public = true AND ($2 OR is_adult_content = false)
         ORDER BY created_at DESC
         LIMIT $3 OFFSET $4",
    )
    .bind(PublishedStoryStatus::Ready)
    .bind(include_adult_content)
    .bind(page_size + 1)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(NovelError::from)?;

    Ok(paginate(rows, page_size))
}

/// An author's own stories regardless of status or visibility, newest
/// first — the "my stories" list, which must show drafts and errored
/// pipelines the public feed never would.
#[instrument(skip(executor))]
pub async fn list_stories_by_author<'e, E>(
    executor: E,
    author_id: UserId,
    limit: Option<i64>,
    offset: i64,
) -> Result<StoryListPage, NovelError>
where
    E: sqlx::PgExecutor<'e>,
{
    let page_size = clamp_page_size(limit);
    let rows: Vec<StoryListItem> = sqlx::query_as(
        "SELECT id, user_id, language, is_adult_content, title, description,
                cover_image_url, likes_count, created_at
         FROM published_stories
         WHERE user_id = $1
         ORDER BY created_at DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(author_id)
    .bind(page_size + 1)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(NovelError::from)?;

    Ok(paginate(rows, page_size))
}

fn paginate(mut rows: Vec<StoryListItem>, page_size: i64) -> StoryListPage {
    let has_more = rows.len() as i64 > page_size;
    if has_more {
        rows.truncate(page_size as usize);
    }
    StoryListPage { items: rows, has_more }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> StoryListItem {
        StoryListItem {
            id: StoryId::new(),
            user_id: UserId::new(),
            language: "en".into(),
            is_adult_content: false,
            title: Some("The Lighthouse".into()),
            description: None,
            cover_image_url: None,
            likes_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn page_size_defaults_and_clamps_to_the_ceiling() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(5)), 5);
        assert_eq!(clamp_page_size(Some(1000)), MAX_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
    }

    #[test]
    fn an_extra_fetched_row_flips_has_more_and_is_trimmed() {
        let rows = vec![item(), item(), item()];
        let page = paginate(rows, 2);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn exactly_a_full_page_has_no_more() {
        let rows = vec![item(), item()];
        let page = paginate(rows, 2);
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_more);
    }
}
