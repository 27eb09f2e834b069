//! Epic input and StoryPack output models.

use serde::{Deserialize, Serialize};

/// Structured high-level requirement. Immutable input to generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub personas: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Epic {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            constraints: Vec::new(),
            personas: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.personas.push(persona.into());
        self
    }

    /// Title, description and constraints joined; the text keyword
    /// coverage is measured against.
    pub fn requirement_text(&self) -> String {
        let mut parts = vec![self.title.as_str(), self.description.as_str()];
        parts.extend(self.constraints.iter().map(String::as_str));
        parts.join("\n")
    }
}

/// One user story inside a StoryPack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// "As a ..." role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_a: Option<String>,
    /// "I want ..." goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_want: Option<String>,
    /// "So that ..." benefit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub so_that: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Story {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            as_a: None,
            i_want: None,
            so_that: None,
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn with_narrative(
        mut self,
        as_a: impl Into<String>,
        i_want: impl Into<String>,
        so_that: impl Into<String>,
    ) -> Self {
        self.as_a = Some(as_a.into());
        self.i_want = Some(i_want.into());
        self.so_that = Some(so_that.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    /// Every textual field of the story, newline separated.
    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.title, &self.description];
        parts.extend(
            [&self.as_a, &self.i_want, &self.so_that]
                .into_iter()
                .flatten()
                .map(String::as_str),
        );
        parts.extend(self.acceptance_criteria.iter().map(String::as_str));
        parts.join("\n")
    }
}

/// Structured set of stories derived from one Epic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPack {
    #[serde(default)]
    pub epic_id: String,
    pub stories: Vec<Story>,
}

impl StoryPack {
    pub fn text(&self) -> String {
        self.stories
            .iter()
            .map(Story::text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Result of one generation call.
///
/// Non-conforming output is represented as `story_pack: None` plus an
/// `error`, never as a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub story_pack: Option<StoryPack>,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratedOutput {
    pub fn valid(pack: StoryPack, raw_text: impl Into<String>) -> Self {
        Self {
            story_pack: Some(pack),
            raw_text: raw_text.into(),
            error: None,
        }
    }

    pub fn invalid(raw_text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            story_pack: None,
            raw_text: raw_text.into(),
            error: Some(error.into()),
        }
    }

    /// Output of a run whose generation call never produced text.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::invalid(String::new(), error)
    }

    pub fn is_valid(&self) -> bool {
        self.story_pack.is_some()
    }

    /// Text used for similarity comparisons between outputs: the
    /// structured content when valid, otherwise the raw model text.
    pub fn comparison_text(&self) -> String {
        match &self.story_pack {
            Some(pack) => pack.text(),
            None => self.raw_text.clone(),
        }
    }
}
