//! Colloquy Speech crate - speech-to-text and text-to-speech services.
//!
//! Provides a trait-based abstraction over transcription and synthesis, an
//! OpenAI-backed implementation, and a mock implementation for testing
//! without network access.

pub mod openai_service;

use async_trait::async_trait;

pub use openai_service::OpenAiSpeech;

// =============================================================================
// Errors
// =============================================================================

/// Errors from speech services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SpeechError::Timeout(err.to_string())
        } else {
            SpeechError::Http(err.to_string())
        }
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Speech-to-text and text-to-speech for voice turns.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Transcribe an encoded recording. `filename` carries the container
    /// extension (e.g. `clip.webm`), which the backend uses to pick a decoder.
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, SpeechError>;

    /// Synthesize `text` into MP3 audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Bytes returned by [`MockSpeech::synthesize`].
pub const MOCK_TTS_AUDIO: &[u8] = b"ID3mock-tts-audio";

/// Mock speech service with configurable outcomes.
#[derive(Debug, Clone)]
pub struct MockSpeech {
    transcript: Result<String, SpeechError>,
    synthesis_error: Option<SpeechError>,
}

impl Default for MockSpeech {
    fn default() -> Self {
        Self::new("[mock transcription]")
    }
}

impl MockSpeech {
    /// Transcribe every recording as `transcript`; synthesis succeeds.
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: Ok(transcript.into()),
            synthesis_error: None,
        }
    }

    /// Fail every transcription with `error`.
    pub fn failing_transcription(error: SpeechError) -> Self {
        Self {
            transcript: Err(error),
            synthesis_error: None,
        }
    }

    /// Fail every synthesis with `error`.
    pub fn with_synthesis_error(mut self, error: SpeechError) -> Self {
        self.synthesis_error = Some(error);
        self
    }
}

#[async_trait]
impl SpeechService for MockSpeech {
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::InvalidInput(
                "Cannot transcribe empty audio data".to_string(),
            ));
        }
        tracing::debug!(bytes = audio.len(), filename, "Mock transcription generated");
        self.transcript.clone()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        if let Some(err) = &self.synthesis_error {
            return Err(err.clone());
        }
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Cannot synthesize empty text".to_string()));
        }
        Ok(MOCK_TTS_AUDIO.to_vec())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transcription_basic() {
        let service = MockSpeech::new("hello there");
        let text = service.transcribe(b"RIFF....", "clip.webm").await.unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn test_mock_transcription_empty_audio() {
        let service = MockSpeech::default();
        let result = service.transcribe(&[], "clip.webm").await;
        assert!(matches!(result, Err(SpeechError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_mock_transcription_failure() {
        let service = MockSpeech::failing_transcription(SpeechError::Api {
            status: 400,
            message: "unsupported format".to_string(),
        });
        let err = service.transcribe(b"x", "clip.mp3").await.unwrap_err();
        assert_eq!(err.to_string(), "API error (400): unsupported format");
    }

    #[tokio::test]
    async fn test_mock_synthesis() {
        let service = MockSpeech::default();
        assert_eq!(service.synthesize("hi").await.unwrap(), MOCK_TTS_AUDIO);

        let failing = MockSpeech::default()
            .with_synthesis_error(SpeechError::Timeout("tts".to_string()));
        assert!(failing.synthesize("hi").await.is_err());
    }
}
