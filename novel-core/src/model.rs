//! Shared data model (spec §3) and the status/step enums driving C5/C6.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CharacterId, GameStateId, ImageReferenceId, ProgressId, SceneId, StoryId, UserId};

/// Reserved state hash for the first node of every story's decision DAG
/// (spec §6.5). Deliberately not a 64-hex-char string so it can never
/// collide with a SHA-256 output.
pub const INITIAL_STATE_HASH: &str = "init";

// ---------------------------------------------------------------------
// Story generation pipeline (C5)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PublishedStoryStatus {
    Draft,
    SetupPending,
    Generating,
    Ready,
    Error,
}

/// Ordered pipeline steps (spec §4.1). Order here *is* the contract: C5 and
/// C7 both depend on `InternalGenerationStep::ALL` being this exact sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum InternalGenerationStep {
    Moderation,
    ProtagonistGoal,
    ScenePlanner,
    CharacterGeneration,
    SetupGeneration,
    InitialSceneJson,
    CoverImageGeneration,
    CardImageGeneration,
    CharacterImageGeneration,
}

impl InternalGenerationStep {
    pub const ALL: [InternalGenerationStep; 9] = [
        InternalGenerationStep::Moderation,
        InternalGenerationStep::ProtagonistGoal,
        InternalGenerationStep::ScenePlanner,
        InternalGenerationStep::CharacterGeneration,
        InternalGenerationStep::SetupGeneration,
        InternalGenerationStep::InitialSceneJson,
        InternalGenerationStep::CoverImageGeneration,
        InternalGenerationStep::CardImageGeneration,
        InternalGenerationStep::CharacterImageGeneration,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).expect("step is always in ALL")
    }

    /// `None` once the story becomes `Ready`.
    pub fn next(self) -> Option<InternalGenerationStep> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Steps strictly after `self`, in order — the downstream set a retry
    /// must reset (spec §4.3 "Flag reset").
    pub fn downstream(self) -> &'static [InternalGenerationStep] {
        let idx = self.index();
        &Self::ALL[idx + 1..]
    }
}

/// Outbound/inbound prompt discriminator (spec §6.5). Superset of
/// `InternalGenerationStep` plus the scene/game-over/moderation variants
/// that are not part of the story pipeline proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Moderation,
    ProtagonistGoal,
    ScenePlanner,
    CharacterGeneration,
    SetupGeneration,
    InitialSceneJson,
    CoverImageGeneration,
    CardImageGeneration,
    CharacterImageGeneration,
    StoryContinuation,
    NovelFirstSceneCreator,
    NovelGameOverCreator,
    ContentModeration,
}

impl From<InternalGenerationStep> for PromptType {
    fn from(step: InternalGenerationStep) -> Self {
        match step {
            InternalGenerationStep::Moderation => PromptType::Moderation,
            InternalGenerationStep::ProtagonistGoal => PromptType::ProtagonistGoal,
            InternalGenerationStep::ScenePlanner => PromptType::ScenePlanner,
            InternalGenerationStep::CharacterGeneration => PromptType::CharacterGeneration,
            InternalGenerationStep::SetupGeneration => PromptType::SetupGeneration,
            InternalGenerationStep::InitialSceneJson => PromptType::InitialSceneJson,
            InternalGenerationStep::CoverImageGeneration => PromptType::CoverImageGeneration,
            InternalGenerationStep::CardImageGeneration => PromptType::CardImageGeneration,
            InternalGenerationStep::CharacterImageGeneration => {
                PromptType::CharacterImageGeneration
            }
        }
    }
}

/// Pending image-task counters tracked on `PublishedStory` (spec §3/§4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingImageCounters {
    pub char_gen: i32,
    pub card_img: i32,
    pub char_img: i32,
}

impl PendingImageCounters {
    pub fn all_zero(&self) -> bool {
        self.char_gen == 0 && self.card_img == 0 && self.char_img == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PublishedStory {
    pub id: StoryId,
    pub user_id: UserId,
    pub language: String,
    pub is_adult_content: bool,
    pub is_public: bool,
    pub config: serde_json::Value,
    pub setup: Option<serde_json::Value>,
    pub status: PublishedStoryStatus,
    pub internal_generation_step: Option<InternalGenerationStep>,
    pub is_first_scene_pending: bool,
    pub are_images_pending: bool,
    pub pending_char_gen: i32,
    pub pending_card_img: i32,
    pub pending_char_img: i32,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cover_image_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub likes_count: i64,
}

impl PublishedStory {
    pub fn pending_counters(&self) -> PendingImageCounters {
        PendingImageCounters {
            char_gen: self.pending_char_gen,
            card_img: self.pending_card_img,
            char_img: self.pending_char_img,
        }
    }

    /// Spec §3 invariant 4: everything that must hold for `Ready`.
    pub fn satisfies_ready_invariant(&self, has_initial_scene: bool) -> bool {
        self.setup.is_some()
            && has_initial_scene
            && !self.is_first_scene_pending
            && !self.are_images_pending
            && self.pending_counters().all_zero()
    }
}

// ---------------------------------------------------------------------
// Scenes and the progress DAG (C2, C6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub text: String,
    pub consequences: Consequences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceBlock {
    pub description: String,
    /// Character tag; empty string means "no character introduced here".
    #[serde(default)]
    pub character: String,
    /// Always exactly two options (spec §3).
    pub options: [ChoiceOption; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneContent {
    pub narration: String,
    pub choices: Vec<ChoiceBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoryScene {
    pub id: SceneId,
    pub story_id: StoryId,
    pub state_hash: String,
    pub content: serde_json::Value,
}

impl StoryScene {
    pub fn parsed_content(&self) -> Result<SceneContent, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }
}

/// `core_stats_change` accepts either the stat's name or its 0-based index
/// into the alphabetized stat list (spec §3, §9 "Consequence key mode").
/// Contributions from both forms touching the same stat are summed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consequences {
    pub core_stats_change: HashMap<String, i64>,
}

impl Consequences {
    /// Resolve name-or-index keys against the alphabetized stat list and
    /// return a `stat_name -> delta` map with same-stat contributions
    /// summed (spec §9).
    pub fn resolve(&self, sorted_stat_names: &[String]) -> BTreeMap<String, i64> {
        let mut resolved: BTreeMap<String, i64> = BTreeMap::new();
        for (key, delta) in &self.core_stats_change {
            let stat_name = if let Ok(idx) = key.parse::<usize>() {
                sorted_stat_names.get(idx).cloned()
            } else {
                Some(key.clone())
            };
            if let Some(name) = stat_name {
                *resolved.entry(name).or_insert(0) += delta;
            }
        }
        resolved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSummaries {
    pub last_story_summary: Option<String>,
    pub last_future_direction: Option<String>,
    pub last_var_impact_summary: Option<String>,
}

impl Default for CachedSummaries {
    fn default() -> Self {
        Self { last_story_summary: None, last_future_direction: None, last_var_impact_summary: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayerProgress {
    pub id: ProgressId,
    pub user_id: UserId,
    pub story_id: StoryId,
    pub state_hash: String,
    pub core_stats: serde_json::Value,
    pub scene_index: i32,
    pub encountered_characters: serde_json::Value,
    pub last_story_summary: Option<String>,
    pub last_future_direction: Option<String>,
    pub last_var_impact_summary: Option<String>,
}

impl PlayerProgress {
    pub fn stats_map(&self) -> HashMap<String, i64> {
        serde_json::from_value(self.core_stats.clone()).unwrap_or_default()
    }

    pub fn encountered_characters_vec(&self) -> Vec<String> {
        serde_json::from_value(self.encountered_characters.clone()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------
// Game states (save slots) (C6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PlayerStatus {
    Playing,
    GeneratingScene,
    GameOverPending,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayerGameState {
    pub id: GameStateId,
    pub player_id: UserId,
    pub story_id: StoryId,
    pub player_progress_id: ProgressId,
    pub current_scene_id: Option<SceneId>,
    pub player_status: PlayerStatus,
    pub error_details: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Setup content: core stats definition (C2, C6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOverTrigger {
    #[serde(default)]
    pub min: bool,
    #[serde(default)]
    pub max: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStatDefinition {
    pub initial: i64,
    pub description: String,
    pub icon: String,
    pub game_over: GameOverTrigger,
}

/// Fixed mechanic range for every stat (spec §3).
pub const STAT_MIN: i64 = 0;
pub const STAT_MAX: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreStatsDefinition(pub BTreeMap<String, CoreStatDefinition>);

/// Outcome of a single game-over check (spec §4.2 tie-break: first stat
/// encountered in alphabetical order wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameOverReason {
    pub stat_name: String,
    pub condition: GameOverCondition,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverCondition {
    Min,
    Max,
}

impl CoreStatsDefinition {
    /// Stat names sorted lexicographically — the fixed iteration order the
    /// contract mandates for game-over scanning and index resolution
    /// (spec §4.2, §9).
    pub fn sorted_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn initial_stats(&self) -> HashMap<String, i64> {
        self.0.iter().map(|(name, def)| (name.clone(), def.initial)).collect()
    }

    /// First stat (alphabetically) whose current value trips its
    /// configured game-over condition, or `None`.
    pub fn check_game_over(&self, stats: &HashMap<String, i64>) -> Option<GameOverReason> {
        for (name, def) in &self.0 {
            let Some(value) = stats.get(name).copied() else { continue };
            if def.game_over.min && value <= STAT_MIN {
                return Some(GameOverReason { stat_name: name.clone(), condition: GameOverCondition::Min, value });
            }
            if def.game_over.max && value >= STAT_MAX {
                return Some(GameOverReason { stat_name: name.clone(), condition: GameOverCondition::Max, value });
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovelSetupContent {
    pub core_stats_definition: CoreStatsDefinition,
    pub cards: serde_json::Value,
    pub cover_image_prompt: String,
}

// ---------------------------------------------------------------------
// Images (C5)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageReference {
    pub id: ImageReferenceId,
    pub story_id: StoryId,
    pub character_id: Option<CharacterId>,
    pub reference: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRatio {
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "3:2")]
    Landscape,
}

// ---------------------------------------------------------------------
// Dynamic config (per-operation tunables, §9 "Global mutable state")
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DynamicConfigEntry {
    pub key: String,
    pub value: serde_json::Value,
}
