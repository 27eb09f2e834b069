//! StoryPack structural validation.
//!
//! Generators call a validator on raw model text; the engine itself only
//! consumes the resulting [`GeneratedOutput`](super::GeneratedOutput).

use super::epic::StoryPack;

/// Errors produced by StoryPack validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("malformed StoryPack JSON: {0}")]
    Malformed(String),

    #[error("StoryPack contains no stories")]
    EmptyStories,

    #[error("story {index} is missing required field: {field}")]
    MissingField { index: usize, field: &'static str },
}

/// Pure `validate(raw) -> Result<StoryPack, ValidationError>` capability.
pub trait OutputValidator: Send + Sync {
    fn validate(&self, raw: &str) -> Result<StoryPack, ValidationError>;
}

/// Extracts the first JSON object from model text and checks that every
/// story has a title and at least one acceptance criterion.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStoryPackValidator;

impl OutputValidator for JsonStoryPackValidator {
    fn validate(&self, raw: &str) -> Result<StoryPack, ValidationError> {
        let text = raw.trim();
        let start = text.find('{').ok_or(ValidationError::NoJson)?;

        let value: serde_json::Value = serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<serde_json::Value>()
            .next()
            .ok_or(ValidationError::NoJson)?
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let pack: StoryPack =
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        if pack.stories.is_empty() {
            return Err(ValidationError::EmptyStories);
        }
        for (index, story) in pack.stories.iter().enumerate() {
            if story.title.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    index,
                    field: "title",
                });
            }
            if story.acceptance_criteria.iter().all(|c| c.trim().is_empty()) {
                return Err(ValidationError::MissingField {
                    index,
                    field: "acceptance_criteria",
                });
            }
        }
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"Here is the pack:
    {"epic_id": "E1", "stories": [
        {"title": "Pay by card", "description": "Card checkout",
         "acceptance_criteria": ["Given a cart When I pay Then I get a receipt"]}
    ]} trailing chatter"#;

    #[test]
    fn extracts_json_from_surrounding_text() {
        let pack = JsonStoryPackValidator.validate(VALID).unwrap();
        assert_eq!(pack.stories.len(), 1);
        assert_eq!(pack.epic_id, "E1");
    }

    #[test]
    fn no_json_is_rejected() {
        assert_eq!(
            JsonStoryPackValidator.validate("sorry, I cannot help"),
            Err(ValidationError::NoJson)
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = JsonStoryPackValidator
            .validate(r#"{"stories": [{"title": }]}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn empty_story_list_is_rejected() {
        assert_eq!(
            JsonStoryPackValidator.validate(r#"{"stories": []}"#),
            Err(ValidationError::EmptyStories)
        );
    }

    #[test]
    fn story_without_criteria_is_rejected() {
        let err = JsonStoryPackValidator
            .validate(r#"{"stories": [{"title": "A", "acceptance_criteria": []}]}"#)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                index: 0,
                field: "acceptance_criteria"
            }
        );
    }
}
