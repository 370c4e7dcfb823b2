//! Pure prompt-body formatters (spec §4.3 point 4: "inputs are reformatted
//! from already-persisted artifacts ... using pure formatter helpers — no
//! reliance on worker state beyond the database"). Shared by the pipeline
//! (C5) and the retry engine (C7) so a retried task is byte-identical in
//! shape to the task that would have been built the first time.

use novel_core::model::{InternalGenerationStep, PublishedStory};

/// Build the `user_input` body for the task that would be dispatched for
/// `step`, given the story's currently-persisted `config`/`setup` and (when
/// relevant) the already-generated protagonist goal / initial scene JSON.
pub fn build_user_input(
    step: InternalGenerationStep,
    story: &PublishedStory,
    protagonist_goal: Option<&str>,
    initial_scene_json: Option<&serde_json::Value>,
) -> String {
    match step {
        InternalGenerationStep::Moderation => story.config.to_string(),
        InternalGenerationStep::ProtagonistGoal => story.config.to_string(),
        InternalGenerationStep::ScenePlanner => serde_json::json!({
            "config": story.config,
            "protagonist_goal": protagonist_goal,
        })
        .to_string(),
        InternalGenerationStep::CharacterGeneration => serde_json::json!({
            "config": story.config,
            "plan": story.setup,
        })
        .to_string(),
        InternalGenerationStep::SetupGeneration => serde_json::json!({
            "config": story.config,
            "setup": story.setup,
        })
        .to_string(),
        InternalGenerationStep::InitialSceneJson => serde_json::json!({
            "config": story.config,
            "setup": story.setup,
        })
        .to_string(),
        InternalGenerationStep::CoverImageGeneration => story
            .setup
            .as_ref()
            .and_then(|s| s.get("cover_image_prompt"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        InternalGenerationStep::CardImageGeneration | InternalGenerationStep::CharacterImageGeneration => {
            serde_json::json!({
                "setup": story.setup,
                "initial_scene": initial_scene_json,
            })
            .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_core::ids::{StoryId, UserId};
    use novel_core::model::PublishedStoryStatus;

    fn story() -> PublishedStory {
        PublishedStory {
            id: StoryId::new(),
            user_id: UserId::new(),
            language: "en".into(),
            is_adult_content: false,
            is_public: true,
            config: serde_json::json!({"premise": "a haunted lighthouse"}),
            setup: None,
            status: PublishedStoryStatus::Generating,
            internal_generation_step: Some(InternalGenerationStep::Moderation),
            is_first_scene_pending: true,
            are_images_pending: true,
            pending_char_gen: 0,
            pending_card_img: 0,
            pending_char_img: 0,
            error_details: None,
            created_at: chrono::Utc::now(),
            cover_image_url: None,
            title: None,
            description: None,
            likes_count: 0,
        }
    }

    #[test]
    fn rebuilding_the_same_step_twice_is_byte_identical() {
        let s = story();
        let a = build_user_input(InternalGenerationStep::Moderation, &s, None, None);
        let b = build_user_input(InternalGenerationStep::Moderation, &s, None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn scene_planner_input_carries_the_protagonist_goal() {
        let s = story();
        let input = build_user_input(
            InternalGenerationStep::ScenePlanner,
            &s,
            Some("Escape the lighthouse"),
            None,
        );
        assert!(input.contains("Escape the lighthouse"));
    }
}
