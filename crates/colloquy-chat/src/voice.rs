//! Voice turns: transcribe a recording, answer it, and speak the answer.
//!
//! Unlike text turns, voice turns are not streamed, use no knowledge-base
//! context, and persist both messages only once the outcome is known.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use colloquy_core::config::ChatConfig;
use colloquy_core::types::{
    derive_session_title, ChatTurn, Message, MessageRole, MessageType, Session,
};
use colloquy_llm::ChatModel;
use colloquy_speech::SpeechService;
use colloquy_storage::{AgentRepository, Database, MessageRepository, SessionRepository};

use crate::audio::{upload_extension, AudioFolder, AudioStore};
use crate::error::ChatError;
use crate::fallback::{FallbackKind, STT_FAILED_PLACEHOLDER};

/// The two messages persisted by a voice turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceTurnResult {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Pipeline for non-streaming voice turns.
#[derive(Clone)]
pub struct VoicePipeline {
    agents: AgentRepository,
    sessions: SessionRepository,
    messages: MessageRepository,
    model: Arc<dyn ChatModel>,
    speech: Arc<dyn SpeechService>,
    audio: AudioStore,
    config: ChatConfig,
}

impl VoicePipeline {
    pub fn new(
        db: Arc<Database>,
        model: Arc<dyn ChatModel>,
        speech: Arc<dyn SpeechService>,
        audio: AudioStore,
        config: ChatConfig,
    ) -> Self {
        Self {
            agents: AgentRepository::new(db.clone()),
            sessions: SessionRepository::new(db.clone()),
            messages: MessageRepository::new(db),
            model,
            speech,
            audio,
            config,
        }
    }

    /// Run a voice turn for an uploaded recording.
    ///
    /// Transcription and completion failures produce fallback replies rather
    /// than errors. A synthesis failure yields a text-only reply.
    pub async fn run(
        &self,
        session_id: Uuid,
        audio: &[u8],
        content_type: Option<&str>,
    ) -> Result<VoiceTurnResult, ChatError> {
        if audio.is_empty() {
            return Err(ChatError::EmptyAudio);
        }
        if audio.len() > self.config.max_audio_bytes {
            return Err(ChatError::AudioTooLarge {
                size: audio.len(),
                limit: self.config.max_audio_bytes,
            });
        }

        let session = self
            .sessions
            .find_by_id(session_id)?
            .ok_or(ChatError::SessionNotFound(session_id))?;

        let ext = upload_extension(content_type);
        let upload = self.audio.save(AudioFolder::Uploads, audio, ext).await?;

        let transcript = match self
            .speech
            .transcribe(audio, &format!("recording.{}", ext))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(session_id = %session_id, "Transcription was empty");
                return self.persist_stt_failure(&session, upload.url);
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Speech-to-text failed");
                return self.persist_stt_failure(&session, upload.url);
            }
        };
        debug!(session_id = %session_id, chars = transcript.len(), "Recording transcribed");

        self.sessions
            .set_title_if_absent(session_id, &derive_session_title(&transcript))?;

        let reply = match self.complete(&session, &transcript).await {
            Ok(reply) => reply,
            Err(description) => {
                error!(session_id = %session_id, error = %description, "Voice completion failed");
                return self.persist_pair(
                    session_id,
                    transcript,
                    Some(upload.url),
                    FallbackKind::Default.message().to_string(),
                    None,
                );
            }
        };

        let tts_url = match self.speech.synthesize(&reply).await {
            Ok(bytes) => match self.audio.save(AudioFolder::Tts, &bytes, "mp3").await {
                Ok(stored) => Some(stored.url),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to store synthesized audio");
                    None
                }
            },
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Text-to-speech failed, replying with text only");
                None
            }
        };

        let result = self.persist_pair(session_id, transcript, Some(upload.url), reply, tts_url)?;
        info!(
            session_id = %session_id,
            with_audio = result.assistant_message.tts_audio_url.is_some(),
            "Voice turn complete"
        );
        Ok(result)
    }

    async fn complete(&self, session: &Session, transcript: &str) -> Result<String, String> {
        let mut history: Vec<ChatTurn> = self
            .messages
            .recent(session.id, self.config.history_limit as u64)
            .map_err(|e| e.to_string())?
            .iter()
            .map(ChatTurn::from)
            .collect();
        history.push(ChatTurn::user(transcript));

        let agent = self
            .agents
            .find_by_id(session.agent_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("agent not found: {}", session.agent_id))?;

        self.model
            .complete_chat(&agent.system_prompt, &history)
            .await
            .map_err(|e| e.to_string())
    }

    fn persist_stt_failure(
        &self,
        session: &Session,
        audio_url: String,
    ) -> Result<VoiceTurnResult, ChatError> {
        self.persist_pair(
            session.id,
            STT_FAILED_PLACEHOLDER.to_string(),
            Some(audio_url),
            FallbackKind::SttFailed.message().to_string(),
            None,
        )
    }

    fn persist_pair(
        &self,
        session_id: Uuid,
        user_content: String,
        audio_url: Option<String>,
        assistant_content: String,
        tts_audio_url: Option<String>,
    ) -> Result<VoiceTurnResult, ChatError> {
        let user_message =
            Message::new(session_id, MessageRole::User, MessageType::Voice, user_content)
                .with_audio_url(audio_url);

        let assistant_message = Message::new(
            session_id,
            MessageRole::Assistant,
            MessageType::Voice,
            assistant_content,
        )
        .with_tts_audio_url(tts_audio_url);
        self.messages.insert_pair(&user_message, &assistant_message)?;

        Ok(VoiceTurnResult {
            user_message,
            assistant_message,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
