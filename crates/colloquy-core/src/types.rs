use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest title derived automatically from a first message.
pub const MAX_DERIVED_TITLE_CHARS: usize = 100;

// =============================================================================
// Enums
// =============================================================================

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// How a message was produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Voice,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Voice => "voice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "voice" => Some(MessageType::Voice),
            _ => None,
        }
    }
}

/// Supported knowledge-base document formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Pdf,
    Txt,
    Md,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Txt => "txt",
            DocumentType::Md => "md",
        }
    }

    /// Map a file extension (without the dot, any case) to a document type.
    ///
    /// `markdown` is accepted as an alias of `md`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentType::Pdf),
            "txt" => Some(DocumentType::Txt),
            "md" | "markdown" => Some(DocumentType::Md),
            _ => None,
        }
    }

    /// Determine the document type from a filename's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// A persona with a system prompt. Owns sessions and documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A conversation with one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: Uuid, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive a session title from the first user message.
///
/// Messages of up to 100 characters are used verbatim; longer ones are cut
/// to 97 characters and suffixed with `...`.
pub fn derive_session_title(content: &str) -> String {
    if content.chars().count() <= MAX_DERIVED_TITLE_CHARS {
        content.to_string()
    } else {
        let head: String = content.chars().take(MAX_DERIVED_TITLE_CHARS - 3).collect();
        format!("{}...", head)
    }
}

/// One append-only entry in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
    /// Stored user recording.
    pub audio_url: Option<String>,
    /// Synthesized assistant reply.
    pub tts_audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        session_id: Uuid,
        role: MessageRole,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            message_type,
            content: content.into(),
            audio_url: None,
            tts_audio_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(session_id, MessageRole::User, MessageType::Text, content)
    }

    pub fn assistant_text(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(session_id, MessageRole::Assistant, MessageType::Text, content)
    }

    pub fn with_audio_url(mut self, url: Option<String>) -> Self {
        self.audio_url = url;
        self
    }

    pub fn with_tts_audio_url(mut self, url: Option<String>) -> Self {
        self.tts_audio_url = url;
        self
    }
}

/// A knowledge-base file owned by an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub filename: String,
    pub file_type: DocumentType,
    /// Size of the uploaded file in bytes.
    pub file_size: u64,
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A retrievable span of a document with its embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    #[serde(skip_serializing, default)]
    pub embedding: Vec<f32>,
    /// Zero-based position within the document.
    pub chunk_index: u32,
    /// Whitespace-separated word count.
    pub token_count: u32,
}

/// Role-tagged entry of the conversation passed to a language model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}
