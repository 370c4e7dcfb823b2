//! Pure prompt-body formatters for the three task kinds the game loop
//! dispatches: first scene, scene continuation, game-over narration (spec
//! §4.2). Mirrors `novel_story::formatters` so a retried task is
//! byte-identical in shape to the one that would have been built live.

use novel_core::model::{GameOverCondition, GameOverReason, PlayerProgress, PublishedStory};

pub fn first_scene_input(story: &PublishedStory) -> String {
    serde_json::json!({
        "config": story.config,
        "setup": story.setup,
    })
    .to_string()
}

pub fn continuation_input(
    story: &PublishedStory,
    progress: &PlayerProgress,
    last_choice_text: &str,
) -> String {
    serde_json::json!({
        "setup": story.setup,
        "last_story_summary": progress.last_story_summary,
        "last_future_direction": progress.last_future_direction,
        "last_var_impact_summary": progress.last_var_impact_summary,
        "last_choice_text": last_choice_text,
    })
    .to_string()
}

pub fn game_over_input(story: &PublishedStory, reason: &GameOverReason) -> String {
    let condition = match reason.condition {
        GameOverCondition::Min => "min",
        GameOverCondition::Max => "max",
    };
    serde_json::json!({
        "config": story.config,
        "setup": story.setup,
        "stat_name": reason.stat_name,
        "condition": condition,
        "value": reason.value,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_core::ids::{ProgressId, StoryId, UserId};
    use novel_core::model::PublishedStoryStatus;

    fn story() -> PublishedStory {
        PublishedStory {
            id: StoryId::new(),
            user_id: UserId::new(),
            language: "en".into(),
            is_adult_content: false,
            is_public: true,
            config: serde_json::json!({"premise": "a haunted lighthouse"}),
            setup: Some(serde_json::json!({"cover_image_prompt": "a lighthouse at dusk"})),
            status: PublishedStoryStatus::Ready,
            internal_generation_step: None,
            is_first_scene_pending: false,
            are_images_pending: false,
            pending_char_gen: 0,
            pending_card_img: 0,
            pending_char_img: 0,
            error_details: None,
            created_at: chrono::Utc::now(),
            cover_image_url: Some("https://example.com/cover.png".into()),
            title: None,
            description: None,
            likes_count: 0,
        }
    }

    fn progress() -> PlayerProgress {
        PlayerProgress {
            id: ProgressId::new(),
            user_id: UserId::new(),
            story_id: StoryId::new(),
            state_hash: "deadbeef".into(),
            core_stats: serde_json::json!({"hp": 40}),
            scene_index: 3,
            encountered_characters: serde_json::json!(["guard"]),
            last_story_summary: Some("fled the keep".into()),
            last_future_direction: Some("seek the harbor".into()),
            last_var_impact_summary: None,
        }
    }

    #[test]
    fn continuation_input_carries_the_last_choice_text() {
        let input = continuation_input(&story(), &progress(), "Flee into the fog");
        assert!(input.contains("Flee into the fog"));
        assert!(input.contains("fled the keep"));
    }

    #[test]
    fn game_over_input_names_the_tripped_stat_and_condition() {
        let reason = GameOverReason { stat_name: "hp".into(), condition: GameOverCondition::Min, value: 0 };
        let input = game_over_input(&story(), &reason);
        assert!(input.contains("\"stat_name\":\"hp\""));
        assert!(input.contains("\"condition\":\"min\""));
    }
}
