//! Application state shared across all route handlers.
//!
//! AppState holds the repositories, the AI-backed services and the audio
//! store. It is passed to handlers via axum's State extractor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use colloquy_chat::{AudioStore, ChatOrchestrator, PromptRefiner, VoicePipeline};
use colloquy_core::config::ColloquyConfig;
use colloquy_core::error::ColloquyError;
use colloquy_llm::{ChatModel, OpenAiChatModel, ScriptedChatModel};
use colloquy_speech::{MockSpeech, OpenAiSpeech, SpeechService};
use colloquy_storage::{
    AgentRepository, Database, DocumentRepository, MessageRepository, SessionRepository,
};
use colloquy_vector::{
    Chunker, ContextAssembler, ContextOptions, DynEmbeddingService, IngestionPipeline,
    MockEmbedding, OpenAiEmbedding, VectorStore,
};

/// The external AI collaborators, injected at startup.
#[derive(Clone)]
pub struct AiServices {
    pub chat: Arc<dyn ChatModel>,
    pub embedding: Arc<dyn DynEmbeddingService>,
    pub speech: Arc<dyn SpeechService>,
}

impl AiServices {
    /// Clients for the OpenAI-compatible API described by `config.openai`.
    pub fn openai(config: &ColloquyConfig) -> Result<Self, ColloquyError> {
        let chat = OpenAiChatModel::from_config(&config.openai)
            .map_err(|e| ColloquyError::Config(e.to_string()))?;
        let embedding = OpenAiEmbedding::from_config(&config.openai)?;
        let speech = OpenAiSpeech::from_config(&config.openai)
            .map_err(|e| ColloquyError::Config(e.to_string()))?;
        Ok(Self {
            chat: Arc::new(chat),
            embedding: Arc::new(embedding),
            speech: Arc::new(speech),
        })
    }

    /// Offline stand-ins: an echoing chat model, hash embeddings and canned speech.
    pub fn mock() -> Self {
        Self {
            chat: Arc::new(ScriptedChatModel::new()),
            embedding: Arc::new(MockEmbedding::new()),
            speech: Arc::new(MockSpeech::default()),
        }
    }
}

/// Shared application state.
///
/// All fields are cheap to clone: repositories and services hold `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed for the process lifetime.
    pub config: Arc<ColloquyConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    pub agents: AgentRepository,
    pub sessions: SessionRepository,
    pub messages: MessageRepository,
    pub documents: DocumentRepository,
    /// Streaming text turns.
    pub orchestrator: ChatOrchestrator,
    /// Non-streaming voice turns.
    pub voice: VoicePipeline,
    /// Document upload pipeline (extract + chunk + embed + store).
    pub ingestion: IngestionPipeline,
    pub refiner: PromptRefiner,
    /// Stored recordings and synthesized replies.
    pub audio: AudioStore,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services together. Audio files live under
    /// `{data_dir}/{chat.audio_dir}` unless `audio_dir` is absolute.
    pub fn new(config: ColloquyConfig, database: Database, services: AiServices) -> Self {
        let audio_root = {
            let dir = PathBuf::from(&config.chat.audio_dir);
            if dir.is_absolute() {
                dir
            } else {
                PathBuf::from(&config.general.data_dir).join(dir)
            }
        };
        Self::with_audio_root(config, database, services, audio_root)
    }

    pub fn with_audio_root(
        config: ColloquyConfig,
        database: Database,
        services: AiServices,
        audio_root: PathBuf,
    ) -> Self {
        let database = Arc::new(database);
        let documents = DocumentRepository::new(database.clone());
        let audio = AudioStore::new(audio_root, audio_url_prefix(&config.general.api_prefix));

        let context = ContextAssembler::new(
            VectorStore::new(documents.clone()),
            services.embedding.clone(),
        );
        let orchestrator = ChatOrchestrator::new(
            database.clone(),
            services.chat.clone(),
            Some(context),
            ContextOptions::from(&config.rag),
            config.chat.clone(),
        );
        let voice = VoicePipeline::new(
            database.clone(),
            services.chat.clone(),
            services.speech.clone(),
            audio.clone(),
            config.chat.clone(),
        );
        let ingestion = IngestionPipeline::new(
            documents.clone(),
            Chunker::from_config(&config.rag),
            services.embedding.clone(),
            config.rag.max_upload_bytes,
        );

        Self {
            agents: AgentRepository::new(database.clone()),
            sessions: SessionRepository::new(database.clone()),
            messages: MessageRepository::new(database.clone()),
            documents,
            orchestrator,
            voice,
            ingestion,
            refiner: PromptRefiner::new(services.chat),
            audio,
            database,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

/// Public URL prefix of the audio route under the API prefix.
pub fn audio_url_prefix(api_prefix: &str) -> String {
    format!("{}/audio", api_prefix.trim_end_matches('/'))
}
