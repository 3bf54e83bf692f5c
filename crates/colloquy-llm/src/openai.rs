//! OpenAI-compatible `/chat/completions` client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use colloquy_core::config::OpenAiConfig;
use colloquy_core::types::ChatTurn;

use crate::error::LlmError;
use crate::model::{ChatModel, TokenStream};
use crate::sse::{SseEvent, SseParser};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model backed by an OpenAI-compatible HTTP API.
///
/// Non-streaming calls are bounded by the configured request timeout. Streams
/// apply it to connection setup and to each gap between body reads.
#[derive(Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to build HTTP client: {}", e)))?;

        info!(model = %config.chat_model, "Configured OpenAI chat model");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            timeout,
        })
    }

    fn request(&self, system_prompt: &str, history: &[ChatTurn], stream: bool) -> reqwest::RequestBuilder {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system_prompt,
        });
        messages.extend(history.iter().map(|turn| WireMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                stream,
            });
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| LlmError::Timeout(format!("no response within {:?}", self.timeout)))??;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), model = %self.model, "Chat completion rejected");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
    idle_timeout: Duration,
}

impl StreamState {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Token(token) => self.pending.push_back(Ok(token)),
                SseEvent::Done => self.finished = true,
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(LlmError::Stream(message)));
                    self.finished = true;
                }
            }
        }
    }
}

fn token_stream(state: StreamState) -> TokenStream {
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Err(_) => {
                    st.finished = true;
                    let err = LlmError::Timeout(format!("stream idle for {:?}", st.idle_timeout));
                    return Some((Err(err), st));
                }
                Ok(Some(Ok(bytes))) => {
                    let events = st.parser.push(&bytes);
                    st.absorb(events);
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(LlmError::from(e)), st));
                }
                Ok(None) => {
                    let events = st.parser.finish();
                    st.absorb(events);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<TokenStream, LlmError> {
        let resp = self.send(self.request(system_prompt, history, true)).await?;
        debug!(model = %self.model, turns = history.len(), "Chat stream opened");

        let body = resp.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        Ok(token_stream(StreamState {
            body,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
            idle_timeout: self.timeout,
        }))
    }

    async fn complete_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, LlmError> {
        let req = self.request(system_prompt, history, false).timeout(self.timeout);
        let resp = self.send(req).await?;
        let parsed: CompletionResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(model = %self.model, chars = content.len(), "Chat completion received");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
