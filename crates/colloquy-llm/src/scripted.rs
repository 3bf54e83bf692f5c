//! Scripted chat model for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use colloquy_core::types::{ChatTurn, MessageRole};

use crate::error::LlmError;
use crate::model::{ChatModel, TokenStream};

/// Planned outcome of one model call.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Succeed, emitting these fragments in order.
    Reply(Vec<String>),
    /// Fail before any fragment is produced.
    Fail(LlmError),
    /// Emit these fragments, then fail mid-stream.
    FailAfter(Vec<String>, LlmError),
}

impl Script {
    /// Reply with `text` split into word-sized fragments.
    pub fn reply(text: &str) -> Self {
        Script::Reply(split_fragments(text))
    }
}

/// Arguments of one call made to a [`ScriptedChatModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub streaming: bool,
}

/// Chat model that plays back queued [`Script`]s.
///
/// When the queue is empty it echoes the latest user turn, which makes it
/// usable as an offline backend.
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_script(&self, system_prompt: &str, history: &[ChatTurn], streaming: bool) -> Script {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                history: history.to_vec(),
                streaming,
            });
        }
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Script::reply(&echo(history)))
    }
}

fn echo(history: &[ChatTurn]) -> String {
    let last_user = history
        .iter()
        .rev()
        .find(|turn| turn.role == MessageRole::User)
        .map(|turn| turn.content.as_str())
        .unwrap_or("");
    format!("You said: {}", last_user)
}

fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<TokenStream, LlmError> {
        let items: Vec<Result<String, LlmError>> = match self.next_script(system_prompt, history, true) {
            Script::Reply(tokens) => tokens.into_iter().map(Ok).collect(),
            Script::Fail(err) => return Err(err),
            Script::FailAfter(tokens, err) => tokens
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(err)))
                .collect(),
        };
        Ok(stream::iter(items).boxed())
    }

    async fn complete_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, LlmError> {
        match self.next_script(system_prompt, history, false) {
            Script::Reply(tokens) => Ok(tokens.concat()),
            Script::Fail(err) | Script::FailAfter(_, err) => Err(err),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
