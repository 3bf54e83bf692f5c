//! On-disk storage for voice recordings and synthesized replies.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::ChatError;

/// Subdirectory of the audio root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFolder {
    /// Recordings uploaded by users.
    Uploads,
    /// Replies synthesized by text-to-speech.
    Tts,
}

impl AudioFolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFolder::Uploads => "uploads",
            AudioFolder::Tts => "tts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploads" => Some(AudioFolder::Uploads),
            "tts" => Some(AudioFolder::Tts),
            _ => None,
        }
    }
}

/// A file written by [`AudioStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAudio {
    pub path: PathBuf,
    /// Public URL, e.g. `/api/audio/uploads/<uuid>.webm`.
    pub url: String,
}

/// Writes audio files under a root directory and maps them to URLs.
#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
    url_prefix: String,
}

impl AudioStore {
    /// `url_prefix` is the route audio is served from, e.g. `/api/audio`.
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save `bytes` under a fresh UUID file name with extension `ext`.
    pub async fn save(
        &self,
        folder: AudioFolder,
        bytes: &[u8],
        ext: &str,
    ) -> Result<StoredAudio, ChatError> {
        let dir = self.root.join(folder.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let path = dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Audio file saved");
        Ok(StoredAudio {
            url: format!("{}/{}/{}", self.url_prefix, folder.as_str(), filename),
            path,
        })
    }

    /// Path of a stored file, if `folder` and `filename` name one safely.
    ///
    /// Only the known folders are served, and file names containing path
    /// separators or parent references are rejected.
    pub fn resolve(&self, folder: &str, filename: &str) -> Option<PathBuf> {
        let folder = AudioFolder::parse(folder)?;
        if filename.is_empty()
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            return None;
        }
        let path = self.root.join(folder.as_str()).join(filename);
        path.is_file().then_some(path)
    }
}

/// Extension for an uploaded recording, from its declared content type.
pub fn upload_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("webm") => "webm",
        _ => "mp3",
    }
}

/// Content type served for a stored audio file.
pub fn audio_content_type(filename: &str) -> &'static str {
    if filename.ends_with(".webm") {
        "audio/webm"
    } else {
        "audio/mpeg"
    }
}
