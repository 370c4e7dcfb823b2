//! Browsing/Query Façade (C10, spec §1 component table, SPEC_FULL §C10).
//!
//! Read-only story-list and detail-assembly queries for whatever transport
//! the embedding service chooses (none is implemented here, same as C5/C6
//! expose plain functions rather than handlers). Shares `novel-core`'s DTOs
//! and `novel-db`'s repository layer rather than rolling its own parsers,
//! so a list row and a detail row can never drift out of sync with the
//! `PublishedStory` the state machine itself reads and writes.

pub mod detail;
pub mod list;

pub use detail::{get_story_detail, StoryDetail};
pub use list::{list_public_stories, list_stories_by_author, StoryListItem, StoryListPage};
