use thiserror::Error;

/// Errors raised anywhere in the chat pipeline.
///
/// Only `Configuration` and a base-generation `Provider` failure ever reach
/// the user as an error reply; every other stage degrades instead.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::InvalidResponse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
