//! Colloquy LLM crate - chat-completion clients.
//!
//! Defines the [`ChatModel`] trait used by the chat orchestrator, an
//! OpenAI-compatible implementation with server-sent-event token streaming,
//! and a scripted model for tests and offline runs.

pub mod error;
pub mod model;
pub mod openai;
pub mod scripted;
pub mod sse;

pub use error::LlmError;
pub use model::{ChatModel, TokenStream};
pub use openai::OpenAiChatModel;
pub use scripted::{RecordedCall, Script, ScriptedChatModel};
