//! Turns a short description into a full agent system prompt.

use std::sync::Arc;

use tracing::{error, info};

use colloquy_core::types::ChatTurn;
use colloquy_llm::ChatModel;

use crate::error::ChatError;

pub const MIN_DESCRIPTION_CHARS: usize = 5;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

const PROMPT_ENGINEER_SYSTEM: &str = "You write system prompts for AI assistants.

Given a short description of an assistant's purpose, produce a complete system prompt that:
1. States the assistant's role and area of expertise.
2. Describes its tone, style and approach.
3. Sets the limits it must respect.
4. Suggests a response structure where one helps.
5. Fits the intended use case.

Reply with the system prompt only, without explanations or commentary. Aim for 100 to 300 words.";

/// Generates system prompts with a chat model.
#[derive(Clone)]
pub struct PromptRefiner {
    model: Arc<dyn ChatModel>,
}

impl PromptRefiner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Expand `description` into a system prompt.
    pub async fn refine(&self, description: &str) -> Result<String, ChatError> {
        let description = description.trim();
        let len = description.chars().count();
        if !(MIN_DESCRIPTION_CHARS..=MAX_DESCRIPTION_CHARS).contains(&len) {
            return Err(ChatError::InvalidDescription(format!(
                "description must be between {} and {} characters",
                MIN_DESCRIPTION_CHARS, MAX_DESCRIPTION_CHARS
            )));
        }

        let request = ChatTurn::user(format!(
            "Create a system prompt for an AI assistant with this purpose:\n\n{}",
            description
        ));
        let prompt = self
            .model
            .complete_chat(PROMPT_ENGINEER_SYSTEM, &[request])
            .await
            .map_err(|e| {
                error!(error = %e, "Prompt refinement failed");
                ChatError::Llm(format!("Failed to refine prompt: {}", e))
            })?;

        info!(chars = prompt.len(), "System prompt refined");
        Ok(prompt.trim().to_string())
    }
}
