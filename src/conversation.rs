use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};

pub const TITLE_MAX_CHARS: usize = 30;
pub const NEW_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            suggestions: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            suggestions: None,
        }
    }
}

/// Title for a conversation, taken from its first user message.
pub fn derive_title(first_user_message: &str) -> String {
    if first_user_message.chars().count() <= TITLE_MAX_CHARS {
        first_user_message.to_string()
    } else {
        let head: String = first_user_message.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub updated_at: i64, // epoch millis
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn last_message_by(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversations ordered most recently active first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationList {
    conversations: Vec<Conversation>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a persisted list, re-establishing the recency order.
    pub fn from_vec(mut conversations: Vec<Conversation>) -> Self {
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Self { conversations }
    }

    pub fn create(&mut self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Append a message and move the conversation to the front.
    /// The first user message also fixes the title.
    pub fn append_message(&mut self, id: &str, message: Message) -> Result<()> {
        let index = self.index_of(id)?;
        let mut conversation = self.conversations.remove(index);

        if message.role == Role::User && !conversation.has_user_message() {
            conversation.title = derive_title(&message.content);
        }
        conversation.messages.push(message);
        conversation.updated_at = Utc::now().timestamp_millis();

        self.conversations.insert(0, conversation);
        Ok(())
    }

    /// Overwrite the content of the last message, and its pills when given.
    pub fn update_last_message(
        &mut self,
        id: &str,
        content: &str,
        suggestions: Option<Vec<String>>,
    ) -> Result<()> {
        let index = self.index_of(id)?;
        let message = self.conversations[index]
            .messages
            .last_mut()
            .ok_or_else(|| ChatError::NotFound(format!("Last message of conversation {}", id)))?;

        message.content = content.to_string();
        if let Some(suggestions) = suggestions {
            message.suggestions = Some(suggestions);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let index = self.index_of(id).ok()?;
        Some(self.conversations.remove(index))
    }

    pub fn recent(&self, limit: usize) -> &[Conversation] {
        &self.conversations[..limit.min(self.conversations.len())]
    }

    pub fn as_slice(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("Conversation {}", id)))
    }
}
