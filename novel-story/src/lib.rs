//! Story Generation State Machine (C5, spec §4.1).
//!
//! `StoryPipeline::handle_notification` is the single entry point a worker
//! notification consumer calls. Every DB write for a step happens inside
//! one transaction; the next task (or client update) is only ever queued
//! via `Tx::queue_after_commit`, so a crash between commit and publish can
//! at worst duplicate a task — never lose state the client already saw.

pub mod formatters;
pub mod steps;

use std::sync::Arc;

use novel_core::error::{NovelError, NovelResult};
use novel_core::messages::{ClientUpdate, GenerationArtifact, GenerationNotification, NotificationStatus};
use novel_core::model::{InternalGenerationStep, PromptType};
use novel_db::repos::published_story;
use novel_db::tx::with_tx;
use novel_db::DbPool;
use novel_events::{notify_best_effort, ClientUpdatePublisher, TaskPublisher};
use tracing::{info, instrument, warn};

use steps::NextDispatch;

pub struct StoryPipeline {
    pool: DbPool,
    tasks: Arc<dyn TaskPublisher>,
    client_updates: Arc<dyn ClientUpdatePublisher>,
    game: novel_game::GameLoop,
}

impl StoryPipeline {
    pub fn new(
        pool: DbPool,
        tasks: Arc<dyn TaskPublisher>,
        client_updates: Arc<dyn ClientUpdatePublisher>,
    ) -> Self {
        let game = novel_game::GameLoop::new(pool.clone(), tasks.clone(), client_updates.clone());
        Self { pool, tasks, client_updates, game }
    }

    /// Every notification either advances the story pipeline (C5, this
    /// type) or reports on a scene-level task and is delegated whole to
    /// C6 — `as_step` returning `None` is how the two are told apart.
    #[instrument(skip(self, notification, artifact))]
    pub async fn handle_notification(
        &self,
        notification: GenerationNotification,
        artifact: Option<GenerationArtifact>,
    ) -> NovelResult<()> {
        if is_scene_level(notification.prompt_type) {
            return self.game.handle_scene_notification(notification, artifact).await;
        }
        match notification.status {
            NotificationStatus::Error => self.handle_error(notification).await,
            NotificationStatus::Success => self.handle_success(notification, artifact).await,
        }
    }

    async fn handle_error(&self, notification: GenerationNotification) -> NovelResult<()> {
        let story_id = notification.published_story_id;
        let user_id = notification.user_id;
        let details = notification.error_details.unwrap_or_else(|| "generation failed".to_string());
        let client_updates = self.client_updates.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                published_story::mark_error(tx.executor(), story_id, &details).await?;
                warn!(story_id = %story_id, %details, "story generation failed");
                let update = ClientUpdate::story(user_id, "error").with_error(details.clone());
                tx.queue_after_commit(async move {
                    notify_best_effort(client_updates.as_ref(), update).await;
                });
                Ok(())
            })
        })
        .await
    }

    async fn handle_success(
        &self,
        notification: GenerationNotification,
        artifact: Option<GenerationArtifact>,
    ) -> NovelResult<()> {
        let story_id = notification.published_story_id;
        let prompt_type = notification.prompt_type;
        let reference = notification.image_reference;
        let artifact = artifact
            .ok_or_else(|| NovelError::Generation("success notification missing artifact".into()))?;
        let tasks = self.tasks.clone();
        let client_updates = self.client_updates.clone();

        with_tx(&self.pool, move |tx| {
            Box::pin(async move {
                let story = published_story::find_by_id(tx.executor(), story_id).await?;
                let user_id = story.user_id;
                let dispatch =
                    dispatch_step(tx.executor(), &story, prompt_type, artifact, reference.as_deref()).await?;

                match dispatch {
                    NextDispatch::None => {}
                    NextDispatch::One(task) => {
                        let tasks = tasks.clone();
                        tx.queue_after_commit(async move {
                            if let Err(err) = tasks.publish_generation_task(&task).await {
                                warn!(error = %err, task_id = %task.task_id, "failed to publish next generation task");
                            }
                        });
                    }
                    NextDispatch::ImageBatch(batch) => {
                        let tasks = tasks.clone();
                        tx.queue_after_commit(async move {
                            if let Err(err) = tasks.publish_image_batch(&batch).await {
                                warn!(error = %err, batch_id = %batch.batch_id, "failed to publish image batch");
                            }
                        });
                    }
                    NextDispatch::StoryReady => {
                        info!(story_id = %story_id, "story is ready");
                        let client_updates = client_updates.clone();
                        tx.queue_after_commit(async move {
                            notify_best_effort(client_updates.as_ref(), ClientUpdate::story(user_id, "ready")).await;
                        });
                    }
                }
                Ok(())
            })
        })
        .await
    }
}

fn is_scene_level(prompt_type: PromptType) -> bool {
    matches!(
        prompt_type,
        PromptType::NovelFirstSceneCreator | PromptType::StoryContinuation | PromptType::NovelGameOverCreator
    )
}

fn as_step(prompt_type: PromptType) -> Option<InternalGenerationStep> {
    match prompt_type {
        PromptType::Moderation => Some(InternalGenerationStep::Moderation),
        PromptType::ProtagonistGoal => Some(InternalGenerationStep::ProtagonistGoal),
        PromptType::ScenePlanner => Some(InternalGenerationStep::ScenePlanner),
        PromptType::CharacterGeneration => Some(InternalGenerationStep::CharacterGeneration),
        PromptType::SetupGeneration => Some(InternalGenerationStep::SetupGeneration),
        PromptType::InitialSceneJson => Some(InternalGenerationStep::InitialSceneJson),
        PromptType::CoverImageGeneration => Some(InternalGenerationStep::CoverImageGeneration),
        PromptType::CardImageGeneration => Some(InternalGenerationStep::CardImageGeneration),
        PromptType::CharacterImageGeneration => Some(InternalGenerationStep::CharacterImageGeneration),
        PromptType::StoryContinuation
        | PromptType::NovelFirstSceneCreator
        | PromptType::NovelGameOverCreator
        | PromptType::ContentModeration => None,
    }
}

async fn dispatch_step(
    conn: &mut sqlx::PgConnection,
    story: &novel_core::model::PublishedStory,
    prompt_type: PromptType,
    artifact: GenerationArtifact,
    reference: Option<&str>,
) -> NovelResult<NextDispatch> {
    let step = as_step(prompt_type)
        .ok_or_else(|| NovelError::Generation(format!("{prompt_type:?} is not a story-pipeline step")))?;

    match step {
        InternalGenerationStep::Moderation => steps::on_moderation_success(conn, story).await,
        InternalGenerationStep::ProtagonistGoal => {
            let goal = steps::expect_text(artifact)?;
            steps::on_protagonist_goal_success(conn, story, &goal).await
        }
        InternalGenerationStep::ScenePlanner => {
            steps::on_scene_planner_success(conn, story, steps::expect_json(artifact)?).await
        }
        InternalGenerationStep::CharacterGeneration => {
            steps::on_character_generation_success(conn, story, steps::expect_json(artifact)?).await
        }
        InternalGenerationStep::SetupGeneration => {
            steps::on_setup_generation_success(conn, story, steps::expect_json(artifact)?).await
        }
        InternalGenerationStep::InitialSceneJson => {
            steps::on_initial_scene_success(conn, story, steps::expect_json(artifact)?).await
        }
        InternalGenerationStep::CoverImageGeneration => {
            let url = steps::expect_image_url(artifact)?;
            steps::on_cover_image_success(conn, story, &url).await
        }
        InternalGenerationStep::CardImageGeneration => {
            let url = steps::expect_image_url(artifact)?;
            let reference = reference
                .ok_or_else(|| NovelError::Generation("card image notification missing reference".into()))?;
            steps::on_card_image_success(conn, story, reference, &url).await
        }
        InternalGenerationStep::CharacterImageGeneration => {
            let url = steps::expect_image_url(artifact)?;
            let reference = reference.ok_or_else(|| {
                NovelError::Generation("character image notification missing reference".into())
            })?;
            steps::on_character_image_success(conn, story, reference, &url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pipeline_prompt_types_have_no_step() {
        assert!(as_step(PromptType::StoryContinuation).is_none());
        assert!(as_step(PromptType::NovelGameOverCreator).is_none());
    }

    #[test]
    fn scene_level_prompt_types_are_routed_away_from_the_pipeline() {
        assert!(is_scene_level(PromptType::NovelFirstSceneCreator));
        assert!(is_scene_level(PromptType::StoryContinuation));
        assert!(is_scene_level(PromptType::NovelGameOverCreator));
        assert!(!is_scene_level(PromptType::ContentModeration));
        assert!(!is_scene_level(PromptType::Moderation));
    }

    #[test]
    fn every_pipeline_step_round_trips_through_prompt_type() {
        for step in InternalGenerationStep::ALL {
            assert_eq!(as_step(PromptType::from(step)), Some(step));
        }
    }
}
