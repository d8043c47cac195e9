use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::{ChatMessage, CompletionProvider, CompletionRequest};
use crate::conversation::{Conversation, Role};
use crate::error::{ChatError, Result};
use crate::logging::{log_error, log_hooks};
use crate::prompt_pipeline::{resolve_home_prompt, PromptOverrides};

pub const MAX_CONVERSATIONS: usize = 10;
pub const MAX_HOOKS: usize = 4;
const LAST_MESSAGE_CHARS: usize = 220;
const TRANSCRIPT_MESSAGE_CHARS: usize = 180;
const TRANSCRIPT_WINDOW: usize = 6;

/// Shown on the home screen when there are no hooks.
pub const DEFAULT_CHIPS: [&str; 8] = [
    "Create an image",
    "Recommend a product",
    "Improve writing",
    "Take a quiz",
    "Write a first draft",
    "Draft a text",
    "Write a speech",
    "Say it with care",
];

static CLOSING_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(thanks|thank you|done|found it|goodbye|bye)\b")
        .expect("closing phrase pattern is valid")
});

/// A resumable task suggested for the home screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub title: String,
    pub description: String,
    pub prompt: String,
}

pub fn is_closing_phrase(text: &str) -> bool {
    CLOSING_PHRASE.is_match(text)
}

// Collapse whitespace so each conversation stays on one line, then cap length.
fn truncate_for_summary(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let head: String = flat.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// One summary line describing a conversation to the hook model.
pub fn summarize_conversation(conversation: &Conversation) -> String {
    let last_user = conversation
        .last_message_by(Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let last_assistant = conversation
        .last_message_by(Role::Assistant)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let closing = is_closing_phrase(last_user) || is_closing_phrase(last_assistant);

    let window_start = conversation.messages.len().saturating_sub(TRANSCRIPT_WINDOW);
    let transcript = conversation.messages[window_start..]
        .iter()
        .map(|m| {
            format!(
                "[{}] {}",
                m.role.as_str(),
                truncate_for_summary(&m.content, TRANSCRIPT_MESSAGE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join(" / ");

    format!(
        "- Title: \"{}\" | Messages: {} | Closing detected: {} | Last user: \"{}\" | Last assistant: \"{}\" | Recent: {}",
        truncate_for_summary(&conversation.title, LAST_MESSAGE_CHARS),
        conversation.messages.len(),
        if closing { "yes" } else { "no" },
        truncate_for_summary(last_user, LAST_MESSAGE_CHARS),
        truncate_for_summary(last_assistant, LAST_MESSAGE_CHARS),
        transcript
    )
}

/// Summary of the most recent conversations, newest first.
pub fn build_history_summary(conversations: &[Conversation]) -> String {
    conversations
        .iter()
        .take(MAX_CONVERSATIONS)
        .map(summarize_conversation)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep hooks whose three fields are non-blank strings, up to the limit.
pub fn parse_hooks(raw: &str) -> Result<Vec<Hook>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_end_matches("```")
        .trim();
    let value: Value = serde_json::from_str(cleaned)?;

    let items = value
        .get("hooks")
        .and_then(Value::as_array)
        .ok_or_else(|| ChatError::InvalidResponse("Response has no hooks array".to_string()))?;

    let field = |item: &Value, name: &str| -> Option<String> {
        item.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            Some(Hook {
                title: field(item, "title")?,
                description: field(item, "description")?,
                prompt: field(item, "prompt")?,
            })
        })
        .take(MAX_HOOKS)
        .collect())
}

/// Ask the model for re-engagement hooks. Any failure yields no hooks.
pub async fn generate_hooks(
    provider: &dyn CompletionProvider,
    conversations: &[Conversation],
    overrides: Option<&PromptOverrides>,
) -> Vec<Hook> {
    if conversations.is_empty() {
        return Vec::new();
    }

    let summary = build_history_summary(conversations);
    let request = CompletionRequest::json(vec![
        ChatMessage::system(resolve_home_prompt(overrides)),
        ChatMessage::user(format!(
            "Here is the user's conversation history:\n\n{}",
            summary
        )),
    ]);

    let result = match provider.complete(request).await {
        Ok(raw) => parse_hooks(&raw),
        Err(e) => Err(e),
    };

    match result {
        Ok(hooks) => {
            log_hooks(&format!(
                "Generated {} hooks from {} conversations",
                hooks.len(),
                conversations.len().min(MAX_CONVERSATIONS)
            ));
            hooks
        }
        Err(e) => {
            log_error(None, &format!("Hook generation failed: {}", e));
            Vec::new()
        }
    }
}
