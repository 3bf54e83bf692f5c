//! Conversational engine for Colloquy.
//!
//! Provides the streaming chat orchestrator, the voice turn pipeline,
//! fallback classification for failed model calls, on-disk audio storage
//! and system-prompt refinement.

pub mod audio;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod refine;
pub mod voice;

pub use audio::{audio_content_type, upload_extension, AudioFolder, AudioStore, StoredAudio};
pub use error::ChatError;
pub use fallback::FallbackKind;
pub use orchestrator::{validate_content, ChatEvent, ChatOrchestrator, TurnHandle};
pub use refine::PromptRefiner;
pub use voice::{VoicePipeline, VoiceTurnResult};
