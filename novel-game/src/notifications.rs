//! Parsing for the worker's scene-level success payload (spec §6.2's
//! artifact is opaque JSON; the exact shape for the three scene-producing
//! prompt types is an implementation decision, recorded in DESIGN.md).
//! The payload carries both the scene content `MakeChoice`/`GetStoryScene`
//! serve and the rolling summaries `continuation_input` needs for the
//! *next* continuation prompt.

use novel_core::error::{NovelError, NovelResult};
use novel_core::messages::GenerationArtifact;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ParsedScene {
    pub scene: serde_json::Value,
    #[serde(default)]
    pub story_summary: Option<String>,
    #[serde(default)]
    pub future_direction: Option<String>,
    #[serde(default)]
    pub var_impact_summary: Option<String>,
}

pub(crate) fn parse_scene_artifact(artifact: GenerationArtifact) -> NovelResult<ParsedScene> {
    let value = match artifact {
        GenerationArtifact::Json(value) => value,
        GenerationArtifact::Text(text) => serde_json::from_str(&text)
            .map_err(|e| NovelError::Generation(format!("expected JSON scene artifact: {e}")))?,
        GenerationArtifact::ImageUrl(_) => {
            return Err(NovelError::Generation("expected JSON scene artifact, got image URL".into()))
        }
    };
    serde_json::from_value(value)
        .map_err(|e| NovelError::Generation(format!("scene artifact missing required fields: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scene_plus_summaries_from_a_json_artifact() {
        let artifact = GenerationArtifact::Json(serde_json::json!({
            "scene": {"narration": "n", "choices": []},
            "story_summary": "fled the keep",
            "future_direction": "seek the harbor",
        }));
        let parsed = parse_scene_artifact(artifact).unwrap();
        assert_eq!(parsed.story_summary.as_deref(), Some("fled the keep"));
        assert_eq!(parsed.var_impact_summary, None);
    }

    #[test]
    fn rejects_an_image_url_artifact() {
        let artifact = GenerationArtifact::ImageUrl("https://example.com/x.png".into());
        assert!(parse_scene_artifact(artifact).is_err());
    }

    #[test]
    fn rejects_json_missing_the_scene_key() {
        let artifact = GenerationArtifact::Json(serde_json::json!({"story_summary": "x"}));
        assert!(parse_scene_artifact(artifact).is_err());
    }
}
