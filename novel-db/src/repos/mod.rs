//! Repository functions, each generic over `sqlx::PgExecutor<'e>` so a
//! caller can pass either a pool reference or a transaction's connection
//! (spec §5: "Repositories MUST accept either a pool handle or a
//! transaction handle through a common database-executor abstraction").

pub mod dynamic_config;
pub mod image_reference;
pub mod likes;
pub mod player_game_state;
pub mod player_progress;
pub mod published_story;
pub mod story_scene;
