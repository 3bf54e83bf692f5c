//! Error types for chat and voice turns.

use colloquy_core::error::ColloquyError;

/// Errors from the chat engine.
///
/// Upstream model failures during a turn are not errors: they become
/// fallback replies. These variants cover requests that cannot start a turn
/// at all, and failures of local infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("agent not found: {0}")]
    AgentNotFound(uuid::Uuid),
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("audio file is empty")]
    EmptyAudio,
    #[error("audio file too large: {size} bytes exceeds {limit} bytes")]
    AudioTooLarge { size: usize, limit: usize },
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Whether the error stems from the request rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage
                | ChatError::MessageTooLong(_)
                | ChatError::EmptyAudio
                | ChatError::AudioTooLarge { .. }
                | ChatError::InvalidDescription(_)
        )
    }
}

impl From<ColloquyError> for ChatError {
    fn from(err: ColloquyError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Storage(format!("audio file I/O: {}", err))
    }
}
