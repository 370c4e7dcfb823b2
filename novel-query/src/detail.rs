//! Single-story detail assembly: the story itself plus the viewer-specific
//! facts a detail page needs (has the viewer liked it, do they already have
//! a save slot). Grounded in `he-api`'s handler-layer assembly of multiple
//! repository reads into one response DTO (`crates/he-api/src/handlers/*.rs`),
//! minus the HTTP transport those handlers also carry.
//!
//! Takes a concrete connection rather than a generic executor, the same
//! convention `novel-db`'s own multi-statement composite reads use (e.g.
//! `novel-game::GameLoop::make_choice`), since assembling a detail page is
//! several sequential statements over one connection, not one.

use novel_core::error::NovelError;
use novel_core::ids::{StoryId, UserId};
use novel_core::model::{PlayerGameState, PublishedStory};
use novel_db::repos::{likes, player_game_state, published_story};
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct StoryDetail {
    pub story: PublishedStory,
    /// `false` for an anonymous viewer; never queried in that case.
    pub viewer_has_liked: bool,
    /// The viewer's own save slot for this story, if one exists.
    pub viewer_game_state: Option<PlayerGameState>,
}

/// Fetch a story for display. A private story is visible only to its
/// author; anyone else (including an anonymous viewer) gets `Forbidden`,
/// matching the owner-check convention the rest of the crate uses in place
/// of a real auth layer (spec Non-goals: "no auth implementation").
#[instrument(skip(conn))]
pub async fn get_story_detail(
    conn: &mut sqlx::PgConnection,
    story_id: StoryId,
    viewer_id: Option<UserId>,
) -> Result<StoryDetail, NovelError> {
    let story = published_story::find_by_id(&mut *conn, story_id).await?;

    if !story.is_public && viewer_id != Some(story.user_id) {
        return Err(NovelError::Forbidden);
    }

    let (viewer_has_liked, viewer_game_state) = match viewer_id {
        Some(user_id) => {
            let has_liked = likes::has_liked(&mut *conn, story_id, user_id).await?;
            let game_state =
                player_game_state::find_by_player_and_story(&mut *conn, user_id, story_id).await?;
            (has_liked, game_state)
        }
        None => (false, None),
    };

    Ok(StoryDetail { story, viewer_has_liked, viewer_game_state })
}
