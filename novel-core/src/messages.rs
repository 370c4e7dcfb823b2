//! Wire schemas for outbound generation tasks and inbound notifications
//! (spec §6.1, §6.2, §6.3). Transport-agnostic: these are the payloads a
//! `TaskPublisher`/`ClientUpdatePublisher` serializes, not the broker
//! client itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CharacterId, GameStateId, StoryId, TaskId, UserId};
use crate::model::{ImageRatio, PromptType};

/// Single canonical schema for every generation task (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub published_story_id: StoryId,
    pub prompt_type: PromptType,
    pub user_input: String,
    pub state_hash: Option<String>,
    pub language: String,
    pub game_state_id: Option<GameStateId>,
}

impl GenerationTask {
    pub fn new(
        user_id: UserId,
        published_story_id: StoryId,
        prompt_type: PromptType,
        user_input: String,
        language: String,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            user_id,
            published_story_id,
            prompt_type,
            user_input,
            state_hash: None,
            language,
            game_state_id: None,
        }
    }

    pub fn with_state_hash(mut self, state_hash: impl Into<String>) -> Self {
        self.state_hash = Some(state_hash.into());
        self
    }

    pub fn with_game_state_id(mut self, game_state_id: GameStateId) -> Self {
        self.game_state_id = Some(game_state_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTask {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub published_story_id: StoryId,
    pub character_id: Option<CharacterId>,
    pub character_name: String,
    pub image_reference: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub ratio: ImageRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTaskBatch {
    pub batch_id: Uuid,
    pub tasks: Vec<ImageTask>,
}

impl ImageTaskBatch {
    pub fn new(tasks: Vec<ImageTask>) -> Self {
        Self { batch_id: Uuid::new_v4(), tasks }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Success,
    Error,
}

/// Inbound notification from a generation worker (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationNotification {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub published_story_id: StoryId,
    pub prompt_type: PromptType,
    pub status: NotificationStatus,
    pub error_details: Option<String>,
    /// Echoes `ImageTask::image_reference` for `CardImageGeneration`/
    /// `CharacterImageGeneration` notifications; `None` for every other
    /// prompt type.
    #[serde(default)]
    pub image_reference: Option<String>,
    /// Echoes `GenerationTask::game_state_id` for the three scene-level
    /// prompt types (`NovelFirstSceneCreator`, `StoryContinuation`,
    /// `NovelGameOverCreator`); `None` for every story-pipeline step.
    #[serde(default)]
    pub game_state_id: Option<GameStateId>,
    /// Echoes `GenerationTask::state_hash` for the same three prompt
    /// types — the hash the resulting scene must be persisted under.
    #[serde(default)]
    pub state_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientUpdateType {
    Story,
    GameState,
}

/// Outbound fan-out to end-user sockets (spec §6.3). Delivery is
/// best-effort; see `novel_events::client_updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub id: Uuid,
    pub user_id: UserId,
    pub update_type: ClientUpdateType,
    pub status: String,
    pub error_details: Option<String>,
    pub scene_id: Option<Uuid>,
}

impl ClientUpdate {
    pub fn story(user_id: UserId, status: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            update_type: ClientUpdateType::Story,
            status: status.into(),
            error_details: None,
            scene_id: None,
        }
    }

    pub fn game_state(user_id: UserId, status: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            update_type: ClientUpdateType::GameState,
            status: status.into(),
            error_details: None,
            scene_id: None,
        }
    }

    pub fn with_error(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    pub fn with_scene(mut self, scene_id: Uuid) -> Self {
        self.scene_id = Some(scene_id);
        self
    }
}

/// The recorded result of a completed generation task, fetched through the
/// `generation_result` side-channel keyed by `task_id` (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GenerationArtifact {
    Text(String),
    Json(serde_json::Value),
    ImageUrl(String),
}
