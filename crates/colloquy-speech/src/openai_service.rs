//! OpenAI speech service: Whisper transcription and TTS synthesis.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use colloquy_core::config::OpenAiConfig;

use crate::{SpeechError, SpeechService};

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Speech service backed by the OpenAI audio endpoints.
#[derive(Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    whisper_model: String,
    tts_model: String,
    tts_voice: String,
}

impl std::fmt::Debug for OpenAiSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSpeech")
            .field("base_url", &self.base_url)
            .field("whisper_model", &self.whisper_model)
            .field("tts_model", &self.tts_model)
            .field("tts_voice", &self.tts_voice)
            .finish()
    }
}

impl OpenAiSpeech {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SpeechError::Http(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            whisper_model = %config.whisper_model,
            tts_model = %config.tts_model,
            voice = %config.tts_voice,
            "Configured OpenAI speech service"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            whisper_model: config.whisper_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, SpeechError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), what, "Speech request rejected");
        Err(SpeechError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// MIME type for an uploaded recording, from its extension.
fn audio_mime(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "webm" => "audio/webm",
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "ogg" => "audio/ogg",
        Some(ext) if ext == "m4a" => "audio/mp4",
        _ => "audio/mpeg",
    }
}

#[async_trait]
impl SpeechService for OpenAiSpeech {
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::InvalidInput(
                "Cannot transcribe empty audio data".to_string(),
            ));
        }

        let part = Part::bytes(audio.to_vec())
            .file_name(filename.to_string())
            .mime_str(audio_mime(filename))
            .map_err(|e| SpeechError::InvalidInput(e.to_string()))?;
        let form = Form::new()
            .text("model", self.whisper_model.clone())
            .part("file", part);

        let req = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        let resp = Self::check(self.authorized(req).send().await?, "transcription").await?;

        let parsed: TranscriptionResponse = resp.json().await?;
        debug!(bytes = audio.len(), chars = parsed.text.len(), "Audio transcribed");
        Ok(parsed.text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Cannot synthesize empty text".to_string()));
        }

        let req = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&SpeechRequest {
                model: &self.tts_model,
                voice: &self.tts_voice,
                input: text,
                response_format: "mp3",
            });
        let resp = Self::check(self.authorized(req).send().await?, "synthesis").await?;

        let audio = resp.bytes().await?.to_vec();
        debug!(chars = text.len(), bytes = audio.len(), "Speech synthesized");
        Ok(audio)
    }
}
