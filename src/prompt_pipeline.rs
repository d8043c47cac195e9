use serde::{Deserialize, Serialize};

use crate::anchors::ANCHOR_TOKEN;
use crate::default_prompts::{
    ANCHOR_PROMPT, HOME_PROMPT, INLINE_SUGGESTION_PROMPT, OBJECTIVE_TONE_DIRECTIVE,
    PERSONALIZATION_PREAMBLE, SUGGESTION_PROMPT, SYSTEM_PROMPT,
};
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKey {
    System,
    Anchor,
    Suggestion,
    InlineSuggestion,
    Home,
}

impl PromptKey {
    pub const ALL: [PromptKey; 5] = [
        PromptKey::System,
        PromptKey::Anchor,
        PromptKey::Suggestion,
        PromptKey::InlineSuggestion,
        PromptKey::Home,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKey::System => "systemPrompt",
            PromptKey::Anchor => "anchorPrompt",
            PromptKey::Suggestion => "suggestionPrompt",
            PromptKey::InlineSuggestion => "inlineSuggestionPrompt",
            PromptKey::Home => "homePrompt",
        }
    }

    pub fn default_text(&self) -> &'static str {
        match self {
            PromptKey::System => SYSTEM_PROMPT,
            PromptKey::Anchor => ANCHOR_PROMPT,
            PromptKey::Suggestion => SUGGESTION_PROMPT,
            PromptKey::InlineSuggestion => INLINE_SUGGESTION_PROMPT,
            PromptKey::Home => HOME_PROMPT,
        }
    }
}

/// User-edited prompt texts. An empty or whitespace-only slot means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOverrides {
    pub system_prompt: String,
    pub anchor_prompt: String,
    pub suggestion_prompt: String,
    pub inline_suggestion_prompt: String,
    pub home_prompt: String,
}

impl PromptOverrides {
    pub fn get(&self, key: PromptKey) -> &str {
        match key {
            PromptKey::System => &self.system_prompt,
            PromptKey::Anchor => &self.anchor_prompt,
            PromptKey::Suggestion => &self.suggestion_prompt,
            PromptKey::InlineSuggestion => &self.inline_suggestion_prompt,
            PromptKey::Home => &self.home_prompt,
        }
    }

    pub fn set(&mut self, key: PromptKey, value: impl Into<String>) {
        let slot = match key {
            PromptKey::System => &mut self.system_prompt,
            PromptKey::Anchor => &mut self.anchor_prompt,
            PromptKey::Suggestion => &mut self.suggestion_prompt,
            PromptKey::InlineSuggestion => &mut self.inline_suggestion_prompt,
            PromptKey::Home => &mut self.home_prompt,
        };
        *slot = value.into();
    }
}

/// Override text when set, otherwise the built-in default.
pub fn resolve_prompt(overrides: Option<&PromptOverrides>, key: PromptKey) -> &str {
    match overrides.map(|o| o.get(key)) {
        Some(value) if !value.trim().is_empty() => value,
        _ => key.default_text(),
    }
}

/// System prompt for the base (objective) call.
pub fn build_chat_system_prompt(
    overrides: Option<&PromptOverrides>,
    inline_suggestions_enabled: bool,
) -> String {
    let mut prompt = resolve_prompt(overrides, PromptKey::System).to_string();
    prompt.push_str("\n\n");
    prompt.push_str(OBJECTIVE_TONE_DIRECTIVE);

    if inline_suggestions_enabled {
        prompt.push_str("\n\n");
        prompt.push_str(resolve_prompt(overrides, PromptKey::Anchor));
    }
    prompt
}

/// What the personalization call is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonalizationRequest {
    pub wants_anchors: bool,
    pub wants_pills: bool,
}

impl PersonalizationRequest {
    pub fn new(
        inline_suggestions_enabled: bool,
        suggestions_enabled: bool,
        has_anchors: bool,
    ) -> Self {
        Self {
            wants_anchors: inline_suggestions_enabled && has_anchors,
            wants_pills: suggestions_enabled,
        }
    }

    pub fn is_needed(&self) -> bool {
        self.wants_anchors || self.wants_pills
    }
}

/// System prompt for the personalization call. The output-format block names
/// exactly the keys that were requested.
pub fn build_personalization_prompt(
    overrides: Option<&PromptOverrides>,
    request: PersonalizationRequest,
    persona_blurb: &str,
) -> String {
    let mut prompt = format!(
        "{}\n\n**User Persona**: {}",
        PERSONALIZATION_PREAMBLE, persona_blurb
    );

    if request.wants_anchors {
        prompt.push_str("\n\n");
        prompt.push_str(resolve_prompt(overrides, PromptKey::InlineSuggestion));
        prompt.push_str(
            "\n\nINSTRUCTION: Return a JSON object where potential keys are the anchor terms \
             and values are the generated questions. Only include keys for anchors you decided to keep.",
        );
    }

    if request.wants_pills {
        prompt.push_str("\n\n");
        prompt.push_str(resolve_prompt(overrides, PromptKey::Suggestion));
        prompt.push_str("\n\nINSTRUCTION: Return a JSON array named \"pills\".");
    }

    let mut shape = Vec::new();
    if request.wants_anchors {
        shape.push(r#"  "anchors": { "Term Name From Text": "Personalized Question", ... }"#);
    }
    if request.wants_pills {
        shape.push(r#"  "pills": ["Question 1", "Question 2", ...]"#);
    }
    prompt.push_str("\n\n**Output Format** (JSON ONLY):\n{\n");
    prompt.push_str(&shape.join(",\n"));
    prompt.push_str("\n}");

    prompt
}

pub fn resolve_home_prompt(overrides: Option<&PromptOverrides>) -> &str {
    resolve_prompt(overrides, PromptKey::Home)
}

/// Reject overrides that would break the pipeline. Blank slots are fine.
pub fn validate_overrides(overrides: &PromptOverrides) -> Result<()> {
    let anchor = overrides.get(PromptKey::Anchor);
    if !anchor.trim().is_empty() && !anchor.contains(ANCHOR_TOKEN) {
        return Err(ChatError::Validation(format!(
            "{} must include at least one {} token",
            PromptKey::Anchor.as_str(),
            ANCHOR_TOKEN
        )));
    }
    Ok(())
}
