//! Retry Engine (C7, spec §4.3).
//!
//! Two entry points: `retry_initial_generation` rebuilds the task for a
//! story pipeline's current step, `retry_generation_for_game_state`
//! rebuilds whatever a save slot's in-flight generation was. Both share the
//! same discipline: validate prerequisites, anchor the story at the step
//! being retried via `published_story::reset_downstream_of` (which also
//! does the downstream flag reset), rebuild the task from persisted
//! artifacts with the same pure formatters the live pipeline uses, then
//! publish strictly after commit.

use std::sync::{Arc, Mutex};

use novel_core::error::{NovelError, NovelResult};
use novel_core::ids::{GameStateId, StoryId, UserId};
use novel_core::messages::GenerationTask;
use novel_core::model::{
    InternalGenerationStep, PlayerStatus, PromptType, PublishedStory, PublishedStoryStatus,
    INITIAL_STATE_HASH,
};
use novel_db::repos::{player_game_state, player_progress, published_story, story_scene};
use novel_db::tx::{with_tx, Tx};
use novel_db::DbPool;
use novel_events::{publish_all_best_effort, publish_image_tasks_best_effort, TaskPublisher};
use novel_story::formatters::build_user_input;
use tracing::{info, instrument, warn};

pub struct RetryEngine {
    pool: DbPool,
    tasks: Arc<dyn TaskPublisher>,
}

/// Slot a queued after-commit publish writes its failure into, so the
/// retry method that queued it can see the outcome once `with_tx` returns
/// (spec §4.3 point 5, §7: "retry endpoints never return success if the
/// post-commit publish failed"). `with_tx` itself stays best-effort for
/// every other caller — only retry endpoints make this promise to the
/// client, so the capturing happens here rather than in `Tx`/`with_tx`.
type PublishOutcome = Arc<Mutex<Option<NovelError>>>;

fn new_publish_outcome() -> PublishOutcome {
    Arc::new(Mutex::new(None))
}

fn record_publish_failure(outcome: &PublishOutcome, err: NovelError) {
    *outcome.lock().expect("publish outcome mutex poisoned") = Some(err);
}

/// Consume the outcome after `with_tx` has returned (so every queued
/// after-commit future has already run and dropped its clone of the
/// `Arc`) and turn a recorded failure into the error the retry endpoint
/// must surface instead of a bare `Ok(())`.
fn into_publish_result(outcome: PublishOutcome) -> NovelResult<()> {
    let failure = Arc::try_unwrap(outcome)
        .expect("after-commit futures have all completed by the time with_tx returns")
        .into_inner()
        .expect("publish outcome mutex poisoned");
    match failure {
        None => Ok(()),
        Some(err) => Err(NovelError::Internal(format!(
            "database was updated but the retried task did not enqueue: {err}"
        ))),
    }
}

impl RetryEngine {
    pub fn new(pool: DbPool, tasks: Arc<dyn TaskPublisher>) -> Self {
        Self { pool, tasks }
    }

    /// `RetryInitialGeneration` (spec §4.3): valid when the story itself is
    /// `Error` or `Generating` and has an active step.
    #[instrument(skip(self))]
    pub async fn retry_initial_generation(&self, user_id: UserId, story_id: StoryId) -> NovelResult<()> {
        let tasks = self.tasks.clone();
        let outcome = new_publish_outcome();
        let outcome_tx = outcome.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let story = published_story::find_by_id(tx.executor(), story_id).await?;
                if story.user_id != user_id {
                    return Err(NovelError::Forbidden);
                }
                if !matches!(story.status, PublishedStoryStatus::Error | PublishedStoryStatus::Generating) {
                    return Err(NovelError::CannotRetry(
                        "story is not in an error or generating status".into(),
                    ));
                }
                let step = story.internal_generation_step.ok_or_else(|| {
                    NovelError::CannotRetry("story has no active generation step to retry".into())
                })?;

                validate_prerequisites(&story, step)?;
                published_story::reset_downstream_of(tx.executor(), story_id, step).await?;

                info!(story_id = %story_id, step = ?step, "retrying story pipeline step");
                publish_step_retry(&mut *tx, &story, step, tasks.clone(), outcome_tx).await
            })
        })
        .await?;

        into_publish_result(outcome)
    }

    /// `RetryGenerationForGameState` (spec §4.3): valid when the save slot's
    /// status is `Error` or (defensively) `GeneratingScene`.
    #[instrument(skip(self))]
    pub async fn retry_generation_for_game_state(
        &self,
        user_id: UserId,
        game_state_id: GameStateId,
    ) -> NovelResult<()> {
        let tasks = self.tasks.clone();
        let outcome = new_publish_outcome();
        let outcome_tx = outcome.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let gs = player_game_state::find_by_id_for_update(tx.executor(), game_state_id).await?;
                if gs.player_id != user_id {
                    return Err(NovelError::Forbidden);
                }
                if !matches!(gs.player_status, PlayerStatus::Error | PlayerStatus::GeneratingScene) {
                    return Err(NovelError::CannotRetry(
                        "game state is not in an error or generating-scene status".into(),
                    ));
                }

                let story = published_story::find_by_id(tx.executor(), gs.story_id).await?;

                if story.setup.is_none() {
                    // The underlying story pipeline never finished setup;
                    // the game state's own generation can't possibly have
                    // started, so the retry target is the story pipeline.
                    let step = InternalGenerationStep::SetupGeneration;
                    validate_prerequisites(&story, step)?;
                    published_story::reset_downstream_of(tx.executor(), story.id, step).await?;
                    publish_step_retry(&mut *tx, &story, step, tasks.clone(), outcome_tx.clone()).await?;

                    player_game_state::update_progress_and_status(
                        tx.executor(),
                        gs.id,
                        gs.player_progress_id,
                        None,
                        PlayerStatus::GeneratingScene,
                    )
                    .await?;
                    return Ok(());
                }

                let progress = player_progress::find_by_id(tx.executor(), gs.player_progress_id).await?;
                let stats_def = novel_game::stats_definition(&story)?;
                let game_over_reason = stats_def.check_game_over(&progress.stats_map());

                if let Some(reason) = game_over_reason {
                    let task = GenerationTask::new(
                        user_id,
                        story.id,
                        PromptType::NovelGameOverCreator,
                        novel_game::formatters::game_over_input(&story, &reason),
                        story.language.clone(),
                    )
                    .with_state_hash(progress.state_hash.clone())
                    .with_game_state_id(gs.id);

                    player_game_state::update_progress_and_status(
                        tx.executor(),
                        gs.id,
                        gs.player_progress_id,
                        None,
                        PlayerStatus::GameOverPending,
                    )
                    .await?;

                    info!(game_state_id = %gs.id, "retrying game-over narration task");
                    let tasks = tasks.clone();
                    let outcome = outcome_tx.clone();
                    tx.queue_after_commit(async move {
                        if let Err(err) = publish_all_best_effort(tasks.as_ref(), std::slice::from_ref(&task)).await {
                            warn!(error = %err, task_id = %task.task_id, "failed to publish retried game-over task");
                            record_publish_failure(&outcome, err);
                        }
                    });
                    return Ok(());
                }

                let prompt_type = if progress.state_hash == INITIAL_STATE_HASH {
                    PromptType::NovelFirstSceneCreator
                } else {
                    PromptType::StoryContinuation
                };
                let user_input = if prompt_type == PromptType::NovelFirstSceneCreator {
                    novel_game::formatters::first_scene_input(&story)
                } else {
                    // The literal choice text that led here isn't persisted
                    // anywhere (spec §3: `PlayerProgress` only keeps stats,
                    // scene index, and encountered characters); the retried
                    // task is rebuilt without it, same as every other retry
                    // path being limited to already-persisted artifacts.
                    novel_game::formatters::continuation_input(&story, &progress, "")
                };

                let task = GenerationTask::new(user_id, story.id, prompt_type, user_input, story.language.clone())
                    .with_state_hash(progress.state_hash.clone())
                    .with_game_state_id(gs.id);

                player_game_state::update_progress_and_status(
                    tx.executor(),
                    gs.id,
                    gs.player_progress_id,
                    None,
                    PlayerStatus::GeneratingScene,
                )
                .await?;

                info!(game_state_id = %gs.id, prompt_type = ?prompt_type, "retrying scene generation task");
                let tasks = tasks.clone();
                let outcome = outcome_tx.clone();
                tx.queue_after_commit(async move {
                    if let Err(err) = publish_all_best_effort(tasks.as_ref(), std::slice::from_ref(&task)).await {
                        warn!(error = %err, task_id = %task.task_id, "failed to publish retried scene task");
                        record_publish_failure(&outcome, err);
                    }
                });
                Ok(())
            })
        })
        .await?;

        into_publish_result(outcome)
    }
}

/// Every step's required, already-persisted artifacts (spec §4.3 point 1).
/// A missing one means the retry target is further along than what's on
/// disk supports rebuilding, which is a caller mistake, not a transient
/// failure — surfaced as `BadRequest`.
fn validate_prerequisites(story: &PublishedStory, step: InternalGenerationStep) -> NovelResult<()> {
    use InternalGenerationStep::*;

    let setup_has_key = |key: &str| story.setup.as_ref().and_then(|s| s.get(key)).is_some();

    match step {
        Moderation | ProtagonistGoal => Ok(()),
        ScenePlanner => {
            if published_story::extract_protagonist_goal(&story.config).is_none() {
                return Err(NovelError::bad_request("config", "protagonist goal has not been generated yet"));
            }
            Ok(())
        }
        CharacterGeneration => {
            if !setup_has_key("plan") {
                return Err(NovelError::bad_request("setup", "scene plan has not been generated yet"));
            }
            Ok(())
        }
        SetupGeneration => {
            if !setup_has_key("characters") {
                return Err(NovelError::bad_request("setup", "characters have not been generated yet"));
            }
            Ok(())
        }
        InitialSceneJson => {
            if !setup_has_key("core_stats_definition") || !setup_has_key("cover_image_prompt") {
                return Err(NovelError::bad_request("setup", "setup generation has not completed yet"));
            }
            Ok(())
        }
        CoverImageGeneration => {
            if !setup_has_key("cover_image_prompt") {
                return Err(NovelError::bad_request("setup", "cover image prompt is missing"));
            }
            Ok(())
        }
        CardImageGeneration | CharacterImageGeneration => {
            if !setup_has_key("characters") {
                return Err(NovelError::bad_request("setup", "characters are missing"));
            }
            if story.cover_image_url.is_none() {
                return Err(NovelError::bad_request("cover_image_url", "cover image has not been generated yet"));
            }
            Ok(())
        }
    }
}

/// Rebuild and, strictly after commit, publish the task for `step` —
/// dispatching to the image-batch republish for the two fan-out steps.
/// Any publish failure is recorded into `outcome` so the caller can turn
/// it into an error once the transaction has committed.
async fn publish_step_retry(
    tx: &mut Tx,
    story: &PublishedStory,
    step: InternalGenerationStep,
    tasks: Arc<dyn TaskPublisher>,
    outcome: PublishOutcome,
) -> NovelResult<()> {
    use InternalGenerationStep::*;

    match step {
        CardImageGeneration => {
            let batch = novel_story::steps::refan_out_card_images(tx.executor(), story).await?;
            tx.queue_after_commit(async move {
                if let Err(err) = publish_image_tasks_best_effort(tasks.as_ref(), &batch).await {
                    warn!(error = %err, batch_id = %batch.batch_id, "failed to publish retried image batch");
                    record_publish_failure(&outcome, err);
                }
            });
            Ok(())
        }
        CharacterImageGeneration => {
            let batch = novel_story::steps::refan_out_character_images(tx.executor(), story).await?;
            tx.queue_after_commit(async move {
                if let Err(err) = publish_image_tasks_best_effort(tasks.as_ref(), &batch).await {
                    warn!(error = %err, batch_id = %batch.batch_id, "failed to publish retried image batch");
                    record_publish_failure(&outcome, err);
                }
            });
            Ok(())
        }
        _ => {
            let goal = published_story::extract_protagonist_goal(&story.config);
            let initial_scene = if step == CoverImageGeneration {
                story_scene::find_by_story_and_hash(tx.executor(), story.id, INITIAL_STATE_HASH)
                    .await?
                    .map(|scene| scene.content)
            } else {
                None
            };
            let user_input = build_user_input(step, story, goal.as_deref(), initial_scene.as_ref());
            let task = GenerationTask::new(
                story.user_id,
                story.id,
                PromptType::from(step),
                user_input,
                story.language.clone(),
            );
            tx.queue_after_commit(async move {
                if let Err(err) = publish_all_best_effort(tasks.as_ref(), std::slice::from_ref(&task)).await {
                    warn!(error = %err, task_id = %task.task_id, "failed to publish retried generation task");
                    record_publish_failure(&outcome, err);
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_core::ids::{StoryId, UserId};
    use novel_core::model::PublishedStoryStatus;

    fn story(setup: Option<serde_json::Value>, cover_image_url: Option<&str>) -> PublishedStory {
        PublishedStory {
            id: StoryId::new(),
            user_id: UserId::new(),
            language: "en".into(),
            is_adult_content: false,
            is_public: true,
            config: serde_json::json!({"premise": "a haunted lighthouse"}),
            setup,
            status: PublishedStoryStatus::Generating,
            internal_generation_step: Some(InternalGenerationStep::CharacterGeneration),
            is_first_scene_pending: true,
            are_images_pending: true,
            pending_char_gen: 0,
            pending_card_img: 0,
            pending_char_img: 0,
            error_details: None,
            created_at: chrono::Utc::now(),
            cover_image_url: cover_image_url.map(String::from),
            title: None,
            description: None,
            likes_count: 0,
        }
    }

    #[test]
    fn character_generation_retry_requires_a_plan_in_setup() {
        let s = story(None, None);
        let err = validate_prerequisites(&s, InternalGenerationStep::CharacterGeneration).unwrap_err();
        assert!(matches!(err, NovelError::BadRequest { .. }));

        let s = story(Some(serde_json::json!({"plan": {}})), None);
        assert!(validate_prerequisites(&s, InternalGenerationStep::CharacterGeneration).is_ok());
    }

    #[test]
    fn scene_planner_retry_requires_a_protagonist_goal() {
        let s = story(None, None);
        let err = validate_prerequisites(&s, InternalGenerationStep::ScenePlanner).unwrap_err();
        assert!(matches!(err, NovelError::BadRequest { .. }));
    }

    #[test]
    fn card_image_retry_requires_characters_and_a_cover_url() {
        let s = story(Some(serde_json::json!({"characters": []})), None);
        let err = validate_prerequisites(&s, InternalGenerationStep::CardImageGeneration).unwrap_err();
        assert!(matches!(err, NovelError::BadRequest { .. }));

        let s = story(Some(serde_json::json!({"characters": []})), Some("https://example.com/cover.png"));
        assert!(validate_prerequisites(&s, InternalGenerationStep::CardImageGeneration).is_ok());
    }

    #[test]
    fn moderation_and_protagonist_goal_have_no_prerequisites() {
        let s = story(None, None);
        assert!(validate_prerequisites(&s, InternalGenerationStep::Moderation).is_ok());
        assert!(validate_prerequisites(&s, InternalGenerationStep::ProtagonistGoal).is_ok());
    }

    #[test]
    fn an_outcome_with_no_recorded_failure_is_ok() {
        let outcome = new_publish_outcome();
        assert!(into_publish_result(outcome).is_ok());
    }

    #[test]
    fn a_recorded_publish_failure_surfaces_as_an_internal_error() {
        let outcome = new_publish_outcome();
        record_publish_failure(&outcome, NovelError::Generation("broker down".into()));
        let err = into_publish_result(outcome).unwrap_err();
        assert!(matches!(err, NovelError::Internal(_)));
    }
}
