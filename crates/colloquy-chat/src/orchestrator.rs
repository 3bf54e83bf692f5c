//! Streaming chat orchestrator.
//!
//! A turn persists the user's message, then streams the assistant's reply
//! as [`ChatEvent`]s over a bounded channel while accumulating it, and
//! finally persists either the full reply or a fallback.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use colloquy_core::config::ChatConfig;
use colloquy_core::types::{derive_session_title, ChatTurn, Message, Session};
use colloquy_llm::{ChatModel, LlmError};
use colloquy_storage::{AgentRepository, Database, MessageRepository, SessionRepository};
use colloquy_vector::{wrap_system_prompt, ContextAssembler, ContextOptions};

use crate::error::ChatError;
use crate::fallback::FallbackKind;

/// One server-sent event of a chat turn.
///
/// Serializes to the event's data payload; [`ChatEvent::name`] gives the
/// event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
    Token {
        content: String,
    },
    Done {
        message_id: Uuid,
        full_content: String,
    },
    Error {
        error: String,
        fallback_message: String,
    },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Token { .. } => "token",
            ChatEvent::Done { .. } => "done",
            ChatEvent::Error { .. } => "error",
        }
    }
}

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    /// The persisted user message.
    pub user_message: Message,
    /// Events in emission order. Ends after one `Done` or `Error`.
    pub events: mpsc::Receiver<ChatEvent>,
    /// Completes once the reply or fallback is persisted.
    pub task: JoinHandle<()>,
}

/// Why a turn produced no reply.
#[derive(Debug)]
enum TurnFailure {
    Llm(LlmError),
    Other(String),
}

impl TurnFailure {
    fn kind(&self) -> FallbackKind {
        match self {
            TurnFailure::Llm(err) => FallbackKind::classify_llm(err),
            TurnFailure::Other(description) => FallbackKind::classify(description),
        }
    }

    fn description(&self) -> String {
        match self {
            TurnFailure::Llm(err) => err.to_string(),
            TurnFailure::Other(description) => description.clone(),
        }
    }
}

/// Forwards events until the receiver goes away, then drops them.
struct EventSink {
    tx: mpsc::Sender<ChatEvent>,
    connected: bool,
    session_id: Uuid,
}

impl EventSink {
    async fn send(&mut self, event: ChatEvent) {
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.connected = false;
            info!(session_id = %self.session_id, "Client disconnected, finishing turn without forwarding");
        }
    }
}

/// Central coordinator for text chat turns.
#[derive(Clone)]
pub struct ChatOrchestrator {
    agents: AgentRepository,
    sessions: SessionRepository,
    messages: MessageRepository,
    model: Arc<dyn ChatModel>,
    context: Option<ContextAssembler>,
    context_options: ContextOptions,
    config: ChatConfig,
}

impl ChatOrchestrator {
    /// Create an orchestrator. Without an assembler, turns run without
    /// knowledge-base context.
    pub fn new(
        db: Arc<Database>,
        model: Arc<dyn ChatModel>,
        context: Option<ContextAssembler>,
        context_options: ContextOptions,
        config: ChatConfig,
    ) -> Self {
        Self {
            agents: AgentRepository::new(db.clone()),
            sessions: SessionRepository::new(db.clone()),
            messages: MessageRepository::new(db),
            model,
            context,
            context_options,
            config,
        }
    }

    /// Validate and persist the user's message, then generate the reply in
    /// a background task.
    ///
    /// Errors are returned only when the turn cannot start. Once started, a
    /// turn always ends with exactly one `Done` or `Error` event. If the
    /// receiver is dropped, the task stops forwarding but still drains the
    /// model stream and persists the outcome.
    pub fn start_turn(&self, session_id: Uuid, content: &str) -> Result<TurnHandle, ChatError> {
        validate_content(content, self.config.max_message_chars)?;

        let session = self
            .sessions
            .find_by_id(session_id)?
            .ok_or(ChatError::SessionNotFound(session_id))?;

        let user_message = Message::user_text(session_id, content);
        self.messages.insert(&user_message)?;
        if self
            .sessions
            .set_title_if_absent(session_id, &derive_session_title(content))?
        {
            debug!(session_id = %session_id, "Session title derived from first message");
        }

        let (tx, events) = mpsc::channel(self.config.event_buffer.max(1));
        let sink = EventSink {
            tx,
            connected: true,
            session_id,
        };
        let this = self.clone();
        let query = content.to_string();
        let task = tokio::spawn(async move { this.run_turn(session, query, sink).await });

        Ok(TurnHandle {
            user_message,
            events,
            task,
        })
    }

    async fn run_turn(self, session: Session, query: String, mut sink: EventSink) {
        match self.generate(&session, &query, &mut sink).await {
            Ok(full_content) => {
                let reply = Message::assistant_text(session.id, full_content.clone());
                match self.messages.insert(&reply) {
                    Ok(()) => {
                        info!(session_id = %session.id, chars = full_content.len(), "Chat turn complete");
                        sink.send(ChatEvent::Done {
                            message_id: reply.id,
                            full_content,
                        })
                        .await;
                    }
                    Err(e) => {
                        error!(session_id = %session.id, error = %e, "Failed to persist assistant reply");
                        self.fail_turn(session.id, e.to_string(), FallbackKind::Default, &mut sink)
                            .await;
                    }
                }
            }
            Err(failure) => {
                let kind = failure.kind();
                let description = failure.description();
                error!(
                    session_id = %session.id,
                    error = %description,
                    fallback = kind.as_str(),
                    "Chat turn failed, replying with fallback"
                );
                self.fail_turn(session.id, description, kind, &mut sink).await;
            }
        }
    }

    /// Persist the fallback reply for `kind`, then emit the `Error` event carrying it.
    async fn fail_turn(
        &self,
        session_id: Uuid,
        description: String,
        kind: FallbackKind,
        sink: &mut EventSink,
    ) {
        let fallback = Message::assistant_text(session_id, kind.message());
        if let Err(e) = self.messages.insert(&fallback) {
            error!(
                session_id = %session_id,
                error = %e,
                fallback = kind.as_str(),
                "Failed to persist fallback reply, client receives unsaved text"
            );
        }
        sink.send(ChatEvent::Error {
            error: description,
            fallback_message: kind.message().to_string(),
        })
        .await;
    }

    async fn generate(
        &self,
        session: &Session,
        query: &str,
        sink: &mut EventSink,
    ) -> Result<String, TurnFailure> {
        let history: Vec<ChatTurn> = self
            .messages
            .recent(session.id, self.config.history_limit as u64)
            .map_err(|e| TurnFailure::Other(e.to_string()))?
            .iter()
            .map(ChatTurn::from)
            .collect();

        let agent = self
            .agents
            .find_by_id(session.agent_id)
            .map_err(|e| TurnFailure::Other(e.to_string()))?
            .ok_or_else(|| TurnFailure::Other(format!("agent not found: {}", session.agent_id)))?;

        let context = match &self.context {
            Some(assembler) => match assembler
                .get_context(agent.id, query, &self.context_options)
                .await
            {
                Ok(context) => context,
                Err(e) => {
                    warn!(agent_id = %agent.id, error = %e, "Context retrieval failed, continuing without it");
                    None
                }
            },
            None => None,
        };
        let system_prompt = wrap_system_prompt(&agent.system_prompt, context.as_deref());

        debug!(
            session_id = %session.id,
            model = self.model.model_name(),
            history = history.len(),
            with_context = context.is_some(),
            "Opening chat stream"
        );
        let mut stream = self
            .model
            .stream_chat(&system_prompt, &history)
            .await
            .map_err(TurnFailure::Llm)?;

        let mut full_content = String::new();
        while let Some(item) = stream.next().await {
            let token = item.map_err(TurnFailure::Llm)?;
            full_content.push_str(&token);
            sink.send(ChatEvent::Token { content: token }).await;
        }
        Ok(full_content)
    }
}

/// Reject blank messages and messages over `max_chars` characters.
pub fn validate_content(content: &str, max_chars: usize) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if content.chars().count() > max_chars {
        return Err(ChatError::MessageTooLong(max_chars));
    }
    Ok(())
}
