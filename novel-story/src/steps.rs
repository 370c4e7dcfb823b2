//! Per-step handlers for the story generation state machine (C5, spec
//! §4.1). Each handler runs against the caller's open transaction
//! connection, performs the step's DB writes, attempts the guarded step
//! advance, and — only if the guard actually won the race — builds the
//! next task(s) to publish after commit.
//!
//! Pending-counter mapping (an Open Question the spec leaves to the
//! implementer, resolved here and recorded in DESIGN.md): `char_gen`
//! tracks the single `CharacterGeneration` task (0/1, for uniformity with
//! the two genuine image fan-outs); `card_img`/`char_img` track the
//! `CardImageGeneration`/`CharacterImageGeneration` batches. Cover is a
//! single task with no counter of its own — its completion is the
//! presence of `cover_image_url`.

use novel_core::error::NovelError;
use novel_core::ids::TaskId;
use novel_core::messages::{GenerationArtifact, GenerationTask, ImageTask, ImageTaskBatch};
use novel_core::model::{ImageRatio, InternalGenerationStep, PromptType, PublishedStory};
use novel_db::repos::published_story::{self, ImageCounterKind};
use novel_db::repos::{image_reference, story_scene};
use tracing::info;

use crate::formatters::build_user_input;

/// What a successful step handler wants published after commit.
pub enum NextDispatch {
    /// The step guard lost the race (duplicate notification) — nothing to
    /// publish.
    None,
    One(GenerationTask),
    ImageBatch(ImageTaskBatch),
    /// The story just became `Ready`; nothing further to dispatch, but the
    /// caller should send a client update of `"ready"`.
    StoryReady,
}

fn single_task(
    story: &PublishedStory,
    step: InternalGenerationStep,
    goal: Option<&str>,
    initial_scene: Option<&serde_json::Value>,
) -> GenerationTask {
    let user_input = build_user_input(step, story, goal, initial_scene);
    GenerationTask::new(story.user_id, story.id, PromptType::from(step), user_input, story.language.clone())
}

/// Moderation succeeded: advance to `ProtagonistGoal` and dispatch its task.
pub async fn on_moderation_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
) -> Result<NextDispatch, NovelError> {
    let next = InternalGenerationStep::ProtagonistGoal;
    if !published_story::advance_step(conn, story.id, InternalGenerationStep::Moderation, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    info!(story_id = %story.id, "moderation passed");
    Ok(NextDispatch::One(single_task(story, next, None, None)))
}

/// ProtagonistGoal succeeded: persist the goal (legacy `world_lore` append
/// + dedicated field, spec §4.1/§9), advance to `ScenePlanner`.
pub async fn on_protagonist_goal_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    goal: &str,
) -> Result<NextDispatch, NovelError> {
    published_story::apply_protagonist_goal(&mut *conn, story.id, story.config.clone(), goal).await?;

    let next = InternalGenerationStep::ScenePlanner;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::ProtagonistGoal, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    Ok(NextDispatch::One(single_task(story, next, Some(goal), None)))
}

/// ScenePlanner succeeded: merge the plan into `setup`, advance to
/// `CharacterGeneration`.
pub async fn on_scene_planner_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    plan: serde_json::Value,
) -> Result<NextDispatch, NovelError> {
    let merged = merge_setup(story.setup.clone(), "plan", plan);
    published_story::set_setup(&mut *conn, story.id, merged.clone()).await?;

    let next = InternalGenerationStep::CharacterGeneration;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::ScenePlanner, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    published_story::set_image_counters(&mut *conn, story.id, 1, 0, 0).await?;

    let mut updated = story.clone();
    updated.setup = Some(merged);
    Ok(NextDispatch::One(single_task(&updated, next, None, None)))
}

/// CharacterGeneration succeeded: merge character definitions into
/// `setup`, clear the `char_gen` counter, advance to `SetupGeneration`.
pub async fn on_character_generation_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    characters: serde_json::Value,
) -> Result<NextDispatch, NovelError> {
    let merged = merge_setup(story.setup.clone(), "characters", characters);
    published_story::set_setup(&mut *conn, story.id, merged.clone()).await?;
    published_story::decrement_image_counter(&mut *conn, story.id, ImageCounterKind::CharGen).await?;

    let next = InternalGenerationStep::SetupGeneration;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::CharacterGeneration, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    let mut updated = story.clone();
    updated.setup = Some(merged);
    Ok(NextDispatch::One(single_task(&updated, next, None, None)))
}

/// SetupGeneration succeeded: the final `NovelSetupContent` (core stats
/// definition, cards, cover prompt) is now in hand. Merged alongside the
/// `plan`/`characters` keys `ScenePlanner`/`CharacterGeneration` already
/// wrote — `SetupGeneration` never regenerates characters, so their entry
/// must survive this merge for the image fan-out steps downstream. Advance
/// to `InitialSceneJSON`.
pub async fn on_setup_generation_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    setup_content: serde_json::Value,
) -> Result<NextDispatch, NovelError> {
    let mut merged = story.setup.clone().unwrap_or_else(|| serde_json::json!({}));
    if let (Some(target), Some(source)) = (merged.as_object_mut(), setup_content.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    published_story::set_setup(&mut *conn, story.id, merged.clone()).await?;

    let next = InternalGenerationStep::InitialSceneJson;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::SetupGeneration, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    let mut updated = story.clone();
    updated.setup = Some(merged);
    Ok(NextDispatch::One(single_task(&updated, next, None, None)))
}

/// InitialSceneJSON succeeded: persist the scene at `InitialStateHash`,
/// clear `is_first_scene_pending`, advance to `CoverImageGeneration`.
pub async fn on_initial_scene_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    scene_content: serde_json::Value,
) -> Result<NextDispatch, NovelError> {
    story_scene::insert_or_get(&mut *conn, story.id, novel_core::model::INITIAL_STATE_HASH, scene_content.clone())
        .await?;
    published_story::clear_first_scene_pending(&mut *conn, story.id).await?;

    let next = InternalGenerationStep::CoverImageGeneration;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::InitialSceneJson, Some(next)).await? {
        return Ok(NextDispatch::None);
    }
    Ok(NextDispatch::One(single_task(story, next, None, Some(&scene_content))))
}

/// CoverImageGeneration succeeded: resolve the cover URL, advance to
/// `CardImageGeneration`, and fan out one card-image task per character.
pub async fn on_cover_image_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    url: &str,
) -> Result<NextDispatch, NovelError> {
    published_story::set_cover_image_url(&mut *conn, story.id, url).await?;

    let next = InternalGenerationStep::CardImageGeneration;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::CoverImageGeneration, Some(next)).await? {
        return Ok(NextDispatch::None);
    }

    let characters = characters_from_setup(story);
    published_story::set_image_counters(&mut *conn, story.id, 0, characters.len() as i32, 0).await?;
    let batch = build_character_image_tasks(&mut *conn, story, &characters, ImageRatio::Portrait).await?;
    Ok(NextDispatch::ImageBatch(batch))
}

/// One card-image task in the `CardImageGeneration` batch resolved. The
/// notification's `task_id` doubles as the `image_references.reference`
/// key (spec §6.2 carries no separate reference field, and the task_id is
/// already a stable per-task identifier).
/// Resolves the reference and decrements `card_img`; when that counter
/// hits zero every card image is in, and the machine advances to
/// `CharacterImageGeneration`, fanning out that batch.
pub async fn on_card_image_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    reference: &str,
    url: &str,
) -> Result<NextDispatch, NovelError> {
    resolve_reference(&mut *conn, reference, url).await?;
    let counters = published_story::decrement_image_counter(&mut *conn, story.id, ImageCounterKind::CardImg).await?;
    if counters.card_img != 0 {
        return Ok(NextDispatch::None);
    }

    let next = InternalGenerationStep::CharacterImageGeneration;
    if !published_story::advance_step(&mut *conn, story.id, InternalGenerationStep::CardImageGeneration, Some(next)).await? {
        return Ok(NextDispatch::None);
    }

    let characters = characters_from_setup(story);
    published_story::set_image_counters(&mut *conn, story.id, 0, 0, characters.len() as i32).await?;
    let batch = build_character_image_tasks(&mut *conn, story, &characters, ImageRatio::Landscape).await?;
    Ok(NextDispatch::ImageBatch(batch))
}

/// One character-portrait task resolved. When the last one lands (counter
/// reaches zero) and the cover is already in, the story becomes `Ready`
/// (spec §4.1: "when all image counters reach zero and all flags clear").
pub async fn on_character_image_success(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    reference: &str,
    url: &str,
) -> Result<NextDispatch, NovelError> {
    resolve_reference(&mut *conn, reference, url).await?;
    let counters = published_story::decrement_image_counter(&mut *conn, story.id, ImageCounterKind::CharImg).await?;
    if !counters.all_zero() || story.cover_image_url.is_none() {
        return Ok(NextDispatch::None);
    }

    let advanced = published_story::advance_step(
        &mut *conn,
        story.id,
        InternalGenerationStep::CharacterImageGeneration,
        None,
    )
    .await?;
    if !advanced {
        return Ok(NextDispatch::None);
    }
    published_story::clear_images_pending(&mut *conn, story.id).await?;
    Ok(NextDispatch::StoryReady)
}

async fn resolve_reference(
    conn: &mut sqlx::PgConnection,
    reference: &str,
    url: &str,
) -> Result<(), NovelError> {
    if let Some(existing) = image_reference::find_by_reference(&mut *conn, reference).await? {
        image_reference::resolve_url(&mut *conn, existing.id, url).await?;
    }
    Ok(())
}

struct CharacterSlot {
    name: String,
    reference_tag: String,
    visual_prompt: String,
    negative_prompt: String,
}

fn characters_from_setup(story: &PublishedStory) -> Vec<CharacterSlot> {
    let Some(setup) = &story.setup else { return Vec::new() };
    let Some(characters) = setup.get("characters").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    characters
        .iter()
        .filter_map(|c| {
            Some(CharacterSlot {
                name: c.get("name")?.as_str()?.to_string(),
                reference_tag: c.get("reference_tag")?.as_str()?.to_string(),
                visual_prompt: c.get("visual_prompt").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                negative_prompt: c.get("negative_prompt").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

async fn build_character_image_tasks(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
    characters: &[CharacterSlot],
    ratio: ImageRatio,
) -> Result<ImageTaskBatch, NovelError> {
    let mut tasks = Vec::with_capacity(characters.len());
    for character in characters {
        let task_id = TaskId::new();
        let reference = task_id.to_string();
        image_reference::insert_pending(&mut *conn, story.id, None, &reference).await?;
        tasks.push(ImageTask {
            task_id,
            user_id: story.user_id,
            published_story_id: story.id,
            character_id: None,
            character_name: character.name.clone(),
            image_reference: reference,
            prompt: character.visual_prompt.clone(),
            negative_prompt: character.negative_prompt.clone(),
            ratio,
        });
    }
    Ok(ImageTaskBatch::new(tasks))
}

/// Re-fan-out the full `CardImageGeneration` batch for `story`, inserting a
/// fresh `image_references` row (and task id) per character. Used by the
/// retry engine: since an `image_references` row carries no correlation back
/// to which character it was for beyond its task-id-derived reference, a
/// retry of this step cannot selectively resume only the undone portion of
/// a prior batch and instead reissues the whole batch (spec §4.3, resolved
/// in DESIGN.md).
pub async fn refan_out_card_images(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
) -> Result<ImageTaskBatch, NovelError> {
    let characters = characters_from_setup(story);
    published_story::set_image_counters(&mut *conn, story.id, 0, characters.len() as i32, 0).await?;
    build_character_image_tasks(&mut *conn, story, &characters, ImageRatio::Portrait).await
}

/// Re-fan-out the full `CharacterImageGeneration` batch for `story`; see
/// `refan_out_card_images` for why a retry reissues the whole batch.
pub async fn refan_out_character_images(
    conn: &mut sqlx::PgConnection,
    story: &PublishedStory,
) -> Result<ImageTaskBatch, NovelError> {
    let characters = characters_from_setup(story);
    published_story::set_image_counters(&mut *conn, story.id, 0, 0, characters.len() as i32).await?;
    build_character_image_tasks(&mut *conn, story, &characters, ImageRatio::Landscape).await
}

fn merge_setup(existing: Option<serde_json::Value>, key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut setup = existing.unwrap_or_else(|| serde_json::json!({}));
    if let Some(obj) = setup.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
    setup
}

pub fn expect_json(artifact: GenerationArtifact) -> Result<serde_json::Value, NovelError> {
    match artifact {
        GenerationArtifact::Json(value) => Ok(value),
        GenerationArtifact::Text(text) => serde_json::from_str(&text)
            .map_err(|e| NovelError::Generation(format!("expected JSON artifact: {e}"))),
        GenerationArtifact::ImageUrl(_) => Err(NovelError::Generation("expected JSON artifact, got image URL".into())),
    }
}

pub fn expect_text(artifact: GenerationArtifact) -> Result<String, NovelError> {
    match artifact {
        GenerationArtifact::Text(text) => Ok(text),
        other => Err(NovelError::Generation(format!("expected text artifact, got {other:?}"))),
    }
}

pub fn expect_image_url(artifact: GenerationArtifact) -> Result<String, NovelError> {
    match artifact {
        GenerationArtifact::ImageUrl(url) => Ok(url),
        other => Err(NovelError::Generation(format!("expected image URL artifact, got {other:?}"))),
    }
}
