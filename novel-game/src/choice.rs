//! Pure `MakeChoice` resolution logic (spec §4.2, step 2). Kept free of any
//! database or async dependency so the block-consumption and game-over
//! tie-break rules can be unit tested directly against fixtures.

use std::collections::HashMap;

use novel_core::error::NovelError;
use novel_core::model::{CoreStatsDefinition, GameOverReason, SceneContent, STAT_MAX, STAT_MIN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOutcome {
    pub new_stats: HashMap<String, i64>,
    pub encountered_characters: Vec<String>,
    pub scene_index: i32,
    pub game_over: Option<GameOverReason>,
}

/// Apply `indices` (one per consumed choice block) to `stats`/`encountered`
/// and report the result, stopping early the moment a block trips a
/// game-over condition (spec §4.2 steps 1-3 and the tie-break rule).
pub fn apply_choices(
    scene: &SceneContent,
    indices: &[usize],
    mut stats: HashMap<String, i64>,
    mut encountered: Vec<String>,
    mut scene_index: i32,
    stats_def: &CoreStatsDefinition,
) -> Result<ChoiceOutcome, NovelError> {
    if indices.is_empty() {
        return Err(NovelError::bad_request("indices", "must choose at least one block"));
    }
    if indices.len() > scene.choices.len() {
        return Err(NovelError::bad_request("indices", "more entries than the scene offers blocks"));
    }

    for (i, &choice_idx) in indices.iter().enumerate() {
        let block = &scene.choices[i];
        let Some(option) = block.options.get(choice_idx) else {
            return Err(NovelError::bad_request("indices", format!("block {i}: option index out of range")));
        };

        let sorted_names = stats_def.sorted_names();
        for (name, delta) in option.consequences.resolve(&sorted_names) {
            let entry = stats.entry(name).or_insert(0);
            *entry = (*entry + delta).clamp(STAT_MIN, STAT_MAX);
        }

        if !block.character.is_empty() && !encountered.contains(&block.character) {
            encountered.push(block.character.clone());
        }
        scene_index += 1;

        if let Some(reason) = stats_def.check_game_over(&stats) {
            return Ok(ChoiceOutcome { new_stats: stats, encountered_characters: encountered, scene_index, game_over: Some(reason) });
        }
    }

    if indices.len() < scene.choices.len() {
        return Err(NovelError::bad_request(
            "indices",
            "must consume every choice block in the scene unless a game-over stops processing early",
        ));
    }

    Ok(ChoiceOutcome { new_stats: stats, encountered_characters: encountered, scene_index, game_over: None })
}

/// The user-visible text of the last consumed choice, for the scene
/// continuation task's prompt body.
pub fn last_choice_text(scene: &SceneContent, indices: &[usize]) -> String {
    let last = indices.len() - 1;
    scene.choices[last].options[indices[last]].text.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_core::model::{ChoiceBlock, ChoiceOption, Consequences, CoreStatDefinition, GameOverCondition, GameOverTrigger};
    use std::collections::BTreeMap;

    fn option(text: &str, stat: &str, delta: i64) -> ChoiceOption {
        let mut change = HashMap::new();
        change.insert(stat.to_string(), delta);
        ChoiceOption { text: text.to_string(), consequences: Consequences { core_stats_change: change } }
    }

    fn block(character: &str, a: ChoiceOption, b: ChoiceOption) -> ChoiceBlock {
        ChoiceBlock { description: "a moment".into(), character: character.to_string(), options: [a, b] }
    }

    fn stats_def() -> CoreStatsDefinition {
        let mut map = BTreeMap::new();
        map.insert(
            "hp".to_string(),
            CoreStatDefinition { initial: 50, description: "health".into(), icon: "heart".into(), game_over: GameOverTrigger { min: true, max: false } },
        );
        map.insert(
            "morale".to_string(),
            CoreStatDefinition { initial: 50, description: "morale".into(), icon: "flag".into(), game_over: GameOverTrigger { min: false, max: true } },
        );
        CoreStatsDefinition(map)
    }

    fn stats(hp: i64, morale: i64) -> HashMap<String, i64> {
        let mut m = HashMap::new();
        m.insert("hp".to_string(), hp);
        m.insert("morale".to_string(), morale);
        m
    }

    #[test]
    fn applies_consequences_and_tracks_a_newly_encountered_character() {
        let scene = SceneContent {
            narration: "n".into(),
            choices: vec![block("guard", option("fight", "hp", -10), option("flee", "hp", 5))],
        };
        let outcome = apply_choices(&scene, &[0], stats(50, 50), vec![], 3, &stats_def()).unwrap();
        assert_eq!(outcome.new_stats["hp"], 40);
        assert_eq!(outcome.encountered_characters, vec!["guard".to_string()]);
        assert_eq!(outcome.scene_index, 4);
        assert!(outcome.game_over.is_none());
    }

    #[test]
    fn stops_at_the_first_game_over_and_does_not_consume_later_blocks() {
        let scene = SceneContent {
            narration: "n".into(),
            choices: vec![
                block("", option("fight", "hp", -60), option("flee", "hp", 0)),
                block("merchant", option("buy", "morale", 60), option("ignore", "morale", 0)),
            ],
        };
        let outcome = apply_choices(&scene, &[0, 0], stats(50, 50), vec![], 0, &stats_def()).unwrap();
        assert_eq!(outcome.new_stats["hp"], 0);
        let reason = outcome.game_over.unwrap();
        assert_eq!(reason.stat_name, "hp");
        assert_eq!(reason.condition, GameOverCondition::Min);
        assert!(outcome.encountered_characters.is_empty(), "merchant's block was never consumed");
    }

    #[test]
    fn stats_clamp_to_the_fixed_mechanic_range() {
        let scene = SceneContent {
            narration: "n".into(),
            choices: vec![block("", option("overheal", "hp", 1000), option("nothing", "hp", 0))],
        };
        let outcome = apply_choices(&scene, &[0], stats(50, 50), vec![], 0, &stats_def()).unwrap();
        assert_eq!(outcome.new_stats["hp"], STAT_MAX);
    }

    #[test]
    fn consuming_fewer_blocks_than_offered_without_a_game_over_is_a_bad_request() {
        let scene = SceneContent {
            narration: "n".into(),
            choices: vec![
                block("", option("a", "hp", 0), option("b", "hp", 0)),
                block("", option("c", "morale", 0), option("d", "morale", 0)),
            ],
        };
        let err = apply_choices(&scene, &[0], stats(50, 50), vec![], 0, &stats_def()).unwrap_err();
        assert!(matches!(err, NovelError::BadRequest { .. }));
    }

    #[test]
    fn an_already_encountered_character_is_not_duplicated() {
        let scene = SceneContent {
            narration: "n".into(),
            choices: vec![block("guard", option("a", "hp", 0), option("b", "hp", 0))],
        };
        let outcome = apply_choices(&scene, &[0], stats(50, 50), vec!["guard".to_string()], 0, &stats_def()).unwrap();
        assert_eq!(outcome.encountered_characters, vec!["guard".to_string()]);
    }
}
