//! The chat model abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;

use colloquy_core::types::ChatTurn;

use crate::error::LlmError;

/// Incremental text fragments of one completion, in generation order.
///
/// An `Err` item ends the completion; no items follow it.
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// A chat-completion backend.
///
/// `history` is oldest-first and ends with the newest user turn. The system
/// prompt is sent ahead of it.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Open a token stream for the next assistant turn.
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<TokenStream, LlmError>;

    /// Request the next assistant turn as a single string.
    async fn complete_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, LlmError>;

    /// Model identifier used in logs.
    fn model_name(&self) -> &str;
}
