//! Game Loop Engine (C6, spec §4.2).
//!
//! `GameLoop` is the single entry point the API layer calls for everything
//! a player does against an already-`Ready` story: reading the current
//! scene, making a choice, opening/closing save slots, and the narrow set
//! of internal CRUD operations an admin surface needs. `make_choice` is the
//! one composite, multi-statement operation here and follows the same
//! concrete-connection convention as `novel_db`'s other composite repo
//! calls — see `player_progress::create_or_get`.

pub mod choice;
pub mod formatters;
mod notifications;

use std::sync::Arc;

use novel_core::error::{NovelError, NovelResult};
use novel_core::ids::{GameStateId, ProgressId, SceneId, StoryId, UserId};
use novel_core::messages::{ClientUpdate, GenerationArtifact, GenerationNotification, NotificationStatus};
use novel_core::model::{
    CoreStatsDefinition, PlayerGameState, PlayerProgress, PlayerStatus, PromptType, PublishedStory,
    PublishedStoryStatus, StoryScene,
};
use novel_db::repos::{player_game_state, player_progress, published_story, story_scene};
use novel_db::tx::with_tx;
use novel_db::DbPool;
use novel_events::{notify_best_effort, ClientUpdatePublisher, TaskPublisher};
use novel_hash::HashVariant;
use tracing::{info, instrument, warn};

use notifications::parse_scene_artifact;

pub struct GameLoop {
    pool: DbPool,
    tasks: Arc<dyn TaskPublisher>,
    client_updates: Arc<dyn ClientUpdatePublisher>,
    hash_variant: HashVariant,
}

impl GameLoop {
    pub fn new(
        pool: DbPool,
        tasks: Arc<dyn TaskPublisher>,
        client_updates: Arc<dyn ClientUpdatePublisher>,
    ) -> Self {
        Self { pool, tasks, client_updates, hash_variant: HashVariant::StatsOnly }
    }

    /// `GetStoryScene` (spec §4.2): the scene a save slot is currently
    /// sitting at, or the status-specific sentinel when there isn't one to
    /// show yet.
    #[instrument(skip(self))]
    pub async fn get_story_scene(
        &self,
        user_id: UserId,
        game_state_id: GameStateId,
    ) -> NovelResult<StoryScene> {
        let gs = player_game_state::find_by_id(&self.pool, game_state_id).await?;
        if gs.player_id != user_id {
            return Err(NovelError::Forbidden);
        }
        match gs.player_status {
            PlayerStatus::Playing => {
                let scene_id = gs.current_scene_id.ok_or_else(|| {
                    NovelError::Internal("playing game state has no current scene".into())
                })?;
                story_scene::find_by_id(&self.pool, scene_id).await
            }
            PlayerStatus::GeneratingScene => Err(NovelError::SceneNeedsGeneration),
            PlayerStatus::GameOverPending => Err(NovelError::GameOverPending),
            PlayerStatus::Completed => Err(NovelError::GameCompleted),
            PlayerStatus::Error => Err(NovelError::PlayerStateInError),
        }
    }

    /// `CreateNewGameState` (spec §4.2): one save slot per `(player,
    /// story)`. Links the initial scene immediately if it already exists
    /// for this story, otherwise enqueues its generation.
    #[instrument(skip(self))]
    pub async fn create_new_game_state(
        &self,
        user_id: UserId,
        story_id: StoryId,
    ) -> NovelResult<PlayerGameState> {
        let tasks = self.tasks.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let story = published_story::find_by_id(tx.executor(), story_id).await?;
                if story.status != PublishedStoryStatus::Ready {
                    return Err(NovelError::StoryNotReady);
                }
                let stats_def = stats_definition(&story)?;

                let progress = player_progress::upsert_initial(
                    tx.executor(),
                    user_id,
                    story_id,
                    &stats_def.initial_stats(),
                )
                .await?;

                let existing_scene = story_scene::find_by_story_and_hash(
                    tx.executor(),
                    story_id,
                    novel_core::model::INITIAL_STATE_HASH,
                )
                .await?;

                let (status, scene_id) = match &existing_scene {
                    Some(scene) => (PlayerStatus::Playing, Some(scene.id)),
                    None => (PlayerStatus::GeneratingScene, None),
                };

                let gs = player_game_state::insert(
                    tx.executor(),
                    user_id,
                    story_id,
                    progress.id,
                    scene_id,
                    status,
                )
                .await?;

                if existing_scene.is_none() {
                    let task = novel_core::messages::GenerationTask::new(
                        user_id,
                        story_id,
                        novel_core::model::PromptType::NovelFirstSceneCreator,
                        formatters::first_scene_input(&story),
                        story.language.clone(),
                    )
                    .with_state_hash(novel_core::model::INITIAL_STATE_HASH)
                    .with_game_state_id(gs.id);

                    let tasks = tasks.clone();
                    tx.queue_after_commit(async move {
                        if let Err(err) = tasks.publish_generation_task(&task).await {
                            warn!(error = %err, task_id = %task.task_id, "failed to publish initial scene task");
                        }
                    });
                }

                Ok(gs)
            })
        })
        .await
    }

    /// `MakeChoice` (spec §4.2): apply consequences for the consumed
    /// blocks, check for game-over, then either reuse an existing scene at
    /// the new hash or enqueue generation of a new one.
    #[instrument(skip(self, indices))]
    pub async fn make_choice(
        &self,
        user_id: UserId,
        game_state_id: GameStateId,
        indices: Vec<usize>,
    ) -> NovelResult<PlayerGameState> {
        let tasks = self.tasks.clone();
        let hash_variant = self.hash_variant;

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let gs = player_game_state::find_by_id_for_update(tx.executor(), game_state_id).await?;
                if gs.player_id != user_id {
                    return Err(NovelError::Forbidden);
                }
                if gs.player_status != PlayerStatus::Playing {
                    return Err(NovelError::bad_request(
                        "player_status",
                        "game state is not in a playable status",
                    ));
                }
                let scene_id = gs.current_scene_id.ok_or_else(|| {
                    NovelError::Internal("playing game state has no current scene".into())
                })?;
                let scene = story_scene::find_by_id(tx.executor(), scene_id).await?;
                let content = scene
                    .parsed_content()
                    .map_err(|e| NovelError::Internal(format!("stored scene content is not valid: {e}")))?;

                let progress = player_progress::find_by_id(tx.executor(), gs.player_progress_id).await?;
                let story = published_story::find_by_id(tx.executor(), gs.story_id).await?;
                let stats_def = stats_definition(&story)?;

                let outcome = choice::apply_choices(
                    &content,
                    &indices,
                    progress.stats_map(),
                    progress.encountered_characters_vec(),
                    progress.scene_index,
                    &stats_def,
                )?;

                let new_hash = novel_hash::hash(hash_variant, &progress.state_hash, &outcome.new_stats);

                if let Some(reason) = outcome.game_over {
                    let next_progress = player_progress::create_or_get(
                        tx.executor(),
                        user_id,
                        gs.story_id,
                        &new_hash,
                        &outcome.new_stats,
                        outcome.scene_index,
                        &outcome.encountered_characters,
                    )
                    .await?;

                    let updated = player_game_state::update_progress_and_status(
                        tx.executor(),
                        gs.id,
                        next_progress.id,
                        None,
                        PlayerStatus::GameOverPending,
                    )
                    .await?;

                    let task = novel_core::messages::GenerationTask::new(
                        user_id,
                        gs.story_id,
                        novel_core::model::PromptType::NovelGameOverCreator,
                        formatters::game_over_input(&story, &reason),
                        story.language.clone(),
                    )
                    .with_state_hash(new_hash.clone())
                    .with_game_state_id(gs.id);

                    let tasks = tasks.clone();
                    tx.queue_after_commit(async move {
                        if let Err(err) = tasks.publish_generation_task(&task).await {
                            warn!(error = %err, task_id = %task.task_id, "failed to publish game-over task");
                        }
                    });

                    info!(game_state_id = %gs.id, stat = %reason.stat_name, "player tripped a game-over condition");
                    return Ok(updated);
                }

                let existing_scene =
                    story_scene::find_by_story_and_hash(tx.executor(), gs.story_id, &new_hash).await?;

                let next_progress = player_progress::create_or_get(
                    tx.executor(),
                    user_id,
                    gs.story_id,
                    &new_hash,
                    &outcome.new_stats,
                    outcome.scene_index,
                    &outcome.encountered_characters,
                )
                .await?;

                let updated = match &existing_scene {
                    Some(found) => {
                        player_game_state::update_progress_and_status(
                            tx.executor(),
                            gs.id,
                            next_progress.id,
                            Some(found.id),
                            PlayerStatus::Playing,
                        )
                        .await?
                    }
                    None => {
                        let updated = player_game_state::update_progress_and_status(
                            tx.executor(),
                            gs.id,
                            next_progress.id,
                            None,
                            PlayerStatus::GeneratingScene,
                        )
                        .await?;

                        let last_choice_text = choice::last_choice_text(&content, &indices);
                        let task = novel_core::messages::GenerationTask::new(
                            user_id,
                            gs.story_id,
                            novel_core::model::PromptType::StoryContinuation,
                            formatters::continuation_input(&story, &next_progress, &last_choice_text),
                            story.language.clone(),
                        )
                        .with_state_hash(new_hash.clone())
                        .with_game_state_id(gs.id);

                        let tasks = tasks.clone();
                        tx.queue_after_commit(async move {
                            if let Err(err) = tasks.publish_generation_task(&task).await {
                                warn!(error = %err, task_id = %task.task_id, "failed to publish continuation task");
                            }
                        });

                        updated
                    }
                };

                Ok(updated)
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn list_game_states(&self, user_id: UserId) -> NovelResult<Vec<PlayerGameState>> {
        player_game_state::list_by_player(&self.pool, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_player_game_state(
        &self,
        user_id: UserId,
        game_state_id: GameStateId,
    ) -> NovelResult<()> {
        let gs = player_game_state::find_by_id(&self.pool, game_state_id).await?;
        if gs.player_id != user_id {
            return Err(NovelError::Forbidden);
        }
        player_game_state::delete(&self.pool, game_state_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_player_progress(
        &self,
        user_id: UserId,
        game_state_id: GameStateId,
    ) -> NovelResult<PlayerProgress> {
        let gs = player_game_state::find_by_id(&self.pool, game_state_id).await?;
        if gs.player_id != user_id {
            return Err(NovelError::Forbidden);
        }
        player_progress::find_by_id(&self.pool, gs.player_progress_id).await
    }

    /// `UpdateSceneInternal` (spec §4.2): admin-only, strict JSON validation
    /// happens inside `story_scene::update_internal`.
    #[instrument(skip(self, content))]
    pub async fn update_scene_internal(
        &self,
        scene_id: SceneId,
        content: serde_json::Value,
    ) -> NovelResult<StoryScene> {
        story_scene::update_internal(&self.pool, scene_id, content).await
    }

    /// `DeleteSceneInternal` (spec §4.2): admin-only hard delete.
    #[instrument(skip(self))]
    pub async fn delete_scene_internal(&self, scene_id: SceneId) -> NovelResult<()> {
        story_scene::delete_internal(&self.pool, scene_id).await
    }

    /// `UpdatePlayerProgressInternal` (spec §4.2): admin-only, strict JSON
    /// validation happens inside `player_progress::update_internal`.
    #[instrument(skip(self, stats, encountered_characters))]
    pub async fn update_player_progress_internal(
        &self,
        progress_id: ProgressId,
        stats: serde_json::Value,
        encountered_characters: serde_json::Value,
    ) -> NovelResult<PlayerProgress> {
        player_progress::update_internal(&self.pool, progress_id, stats, encountered_characters).await
    }

    /// `HandleSceneNotification` (spec §2: "notification → C6 when the
    /// task was scene-level"). The counterpart to
    /// `StoryPipeline::handle_notification` for the three prompt types
    /// that produce a player-visible scene instead of advancing the
    /// story pipeline: `NovelFirstSceneCreator`, `StoryContinuation`,
    /// `NovelGameOverCreator`.
    #[instrument(skip(self, notification, artifact))]
    pub async fn handle_scene_notification(
        &self,
        notification: GenerationNotification,
        artifact: Option<GenerationArtifact>,
    ) -> NovelResult<()> {
        match notification.status {
            NotificationStatus::Error => self.handle_scene_error(notification).await,
            NotificationStatus::Success => {
                let artifact = artifact
                    .ok_or_else(|| NovelError::Generation("success notification missing artifact".into()))?;
                self.handle_scene_success(notification, artifact).await
            }
        }
    }

    async fn handle_scene_error(&self, notification: GenerationNotification) -> NovelResult<()> {
        let game_state_id = notification
            .game_state_id
            .ok_or_else(|| NovelError::Generation("scene notification missing game_state_id".into()))?;
        let details = notification.error_details.unwrap_or_else(|| "scene generation failed".to_string());
        let client_updates = self.client_updates.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let gs = player_game_state::find_by_id(tx.executor(), game_state_id).await?;
                player_game_state::mark_error(tx.executor(), gs.id, &details).await?;
                warn!(game_state_id = %gs.id, %details, "scene generation failed");
                let update = ClientUpdate::game_state(gs.player_id, "error").with_error(details.clone());
                tx.queue_after_commit(async move {
                    notify_best_effort(client_updates.as_ref(), update).await;
                });
                Ok(())
            })
        })
        .await
    }

    /// Persists the scene at the notification's own `state_hash` (not just
    /// `InitialStateHash`, populating the content-addressed cache for
    /// every continuation), refreshes the progress node's cached
    /// summaries, and drives the game state `GeneratingScene → Playing` /
    /// `GameOverPending → Completed`. Idempotent per `(story, hash)`: a
    /// duplicate notification for a game state that has already moved
    /// past the expected status is a no-op, and `story_scene::insert_or_get`
    /// is itself idempotent on the unique `(story_id, state_hash)` index.
    async fn handle_scene_success(
        &self,
        notification: GenerationNotification,
        artifact: GenerationArtifact,
    ) -> NovelResult<()> {
        let game_state_id = notification
            .game_state_id
            .ok_or_else(|| NovelError::Generation("scene notification missing game_state_id".into()))?;
        let state_hash = notification
            .state_hash
            .ok_or_else(|| NovelError::Generation("scene notification missing state_hash".into()))?;
        let prompt_type = notification.prompt_type;
        let client_updates = self.client_updates.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let gs = player_game_state::find_by_id_for_update(tx.executor(), game_state_id).await?;

                let expected_status = match prompt_type {
                    PromptType::NovelFirstSceneCreator | PromptType::StoryContinuation => {
                        PlayerStatus::GeneratingScene
                    }
                    PromptType::NovelGameOverCreator => PlayerStatus::GameOverPending,
                    other => {
                        return Err(NovelError::Generation(format!(
                            "{other:?} is not a scene-level prompt type"
                        )))
                    }
                };

                if gs.player_status != expected_status {
                    info!(game_state_id = %gs.id, ?prompt_type, "ignoring stale scene notification");
                    return Ok(());
                }

                let parsed = parse_scene_artifact(artifact)?;
                let scene = story_scene::insert_or_get(tx.executor(), gs.story_id, &state_hash, parsed.scene).await?;

                player_progress::update_cached_summaries(
                    tx.executor(),
                    gs.player_progress_id,
                    parsed.story_summary.as_deref(),
                    parsed.future_direction.as_deref(),
                    parsed.var_impact_summary.as_deref(),
                )
                .await?;

                let next_status = match expected_status {
                    PlayerStatus::GeneratingScene => PlayerStatus::Playing,
                    PlayerStatus::GameOverPending => PlayerStatus::Completed,
                    _ => unreachable!(),
                };

                let updated = player_game_state::update_progress_and_status(
                    tx.executor(),
                    gs.id,
                    gs.player_progress_id,
                    Some(scene.id),
                    next_status,
                )
                .await?;

                info!(game_state_id = %gs.id, ?next_status, "scene notification applied");
                let status_label = if next_status == PlayerStatus::Completed { "completed" } else { "ready" };
                let update = ClientUpdate::game_state(updated.player_id, status_label).with_scene(scene.id.into_uuid());
                tx.queue_after_commit(async move {
                    notify_best_effort(client_updates.as_ref(), update).await;
                });
                Ok(())
            })
        })
        .await
    }
}

/// Parse `core_stats_definition` out of a `Ready` story's persisted setup.
/// Every `Ready` story has passed `satisfies_ready_invariant`, so the key is
/// always present; a missing or malformed value means the setup JSON was
/// corrupted by something other than this crate. Exposed (not just used
/// internally) so the retry engine can recompute a pending game-over's
/// reason without duplicating this parsing.
pub fn stats_definition(story: &PublishedStory) -> NovelResult<CoreStatsDefinition> {
    let setup = story.setup.as_ref().ok_or(NovelError::StoryNotReady)?;
    let value = setup.get("core_stats_definition").ok_or_else(|| {
        NovelError::Internal("ready story is missing core_stats_definition in its setup".into())
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| NovelError::Internal(format!("stored core_stats_definition is not valid: {e}")))
}
