use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ColloquyError, Result};

/// Top-level configuration for the Colloquy backend.
///
/// Loaded from `~/.colloquy/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColloquyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl ColloquyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ColloquyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that would make chunking or retrieval misbehave.
    pub fn validate(&self) -> Result<()> {
        let rag = &self.rag;
        if rag.max_chunk_tokens == 0 {
            return Err(ColloquyError::Config(
                "rag.max_chunk_tokens must be greater than 0".to_string(),
            ));
        }
        if rag.chunk_overlap_tokens >= rag.max_chunk_tokens {
            return Err(ColloquyError::Config(format!(
                "rag.chunk_overlap_tokens ({}) must be smaller than rag.max_chunk_tokens ({})",
                rag.chunk_overlap_tokens, rag.max_chunk_tokens
            )));
        }
        if rag.fallback_chunk_chars == 0 || rag.fallback_overlap_chars >= rag.fallback_chunk_chars
        {
            return Err(ColloquyError::Config(format!(
                "rag.fallback_overlap_chars ({}) must be smaller than rag.fallback_chunk_chars ({})",
                rag.fallback_overlap_chars, rag.fallback_chunk_chars
            )));
        }
        if !(-1.0..=1.0).contains(&rag.similarity_threshold) {
            return Err(ColloquyError::Config(format!(
                "rag.similarity_threshold must be within [-1, 1], got {}",
                rag.similarity_threshold
            )));
        }
        if self.chat.history_limit == 0 {
            return Err(ColloquyError::Config(
                "chat.history_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// General server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and audio artifacts.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Interface the HTTP server binds to.
    pub host: String,
    /// API server port.
    pub port: u16,
    /// Path prefix for every API route.
    pub api_prefix: String,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.colloquy/data".to_string(),
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_prefix: "/api".to_string(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Settings for the OpenAI-compatible upstream used for chat, embeddings and speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key. The `OPENAI_API_KEY` environment variable takes precedence.
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub whisper_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            whisper_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl OpenAiConfig {
    /// Whether an API key is available.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Retrieval-augmented generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum tokens per chunk when a tokenizer is available.
    pub max_chunk_tokens: usize,
    /// Tokens shared between consecutive chunks.
    pub chunk_overlap_tokens: usize,
    /// Characters per chunk when no tokenizer is available.
    pub fallback_chunk_chars: usize,
    /// Characters shared between consecutive fallback chunks.
    pub fallback_overlap_chars: usize,
    /// Path to a HuggingFace `tokenizer.json` that replaces the built-in
    /// cl100k encoding. Empty keeps cl100k.
    pub tokenizer_path: String,
    /// Number of chunks retrieved per query.
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to enter the context block.
    pub similarity_threshold: f64,
    /// Character budget for the assembled context block.
    pub max_context_chars: usize,
    /// Maximum accepted document upload size in bytes.
    pub max_upload_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 500,
            chunk_overlap_tokens: 50,
            fallback_chunk_chars: 2000,
            fallback_overlap_chars: 200,
            tokenizer_path: String::new(),
            top_k: 5,
            similarity_threshold: 0.15,
            max_context_chars: 4000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Chat and voice turn settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages loaded as conversation history per turn.
    pub history_limit: usize,
    /// Maximum characters in a user message.
    pub max_message_chars: usize,
    /// Maximum accepted voice upload size in bytes.
    pub max_audio_bytes: usize,
    /// Directory (relative to `data_dir` unless absolute) for stored audio.
    pub audio_dir: String,
    /// Capacity of the per-turn event channel.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            max_message_chars: 10_000,
            max_audio_bytes: 5 * 1024 * 1024,
            audio_dir: "audio_files".to_string(),
            event_buffer: 64,
        }
    }
}
