//! Error types for document ingestion.

use colloquy_core::error::ColloquyError;

/// Errors from the document ingestion pipeline.
///
/// Validation variants (`UnsupportedFileType`, `EmptyFile`, `FileTooLarge`,
/// `EmptyDocument`) carry a reason suitable for the caller. Nothing is
/// persisted when any variant is returned.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Empty file")]
    EmptyFile,
    #[error("File too large: {size} bytes exceeds {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },
    #[error("Could not extract any text from the document")]
    EmptyDocument,
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("agent not found: {0}")]
    AgentNotFound(uuid::Uuid),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IngestError {
    /// Whether the error stems from the uploaded content rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedFileType(_)
                | IngestError::EmptyFile
                | IngestError::FileTooLarge { .. }
                | IngestError::EmptyDocument
                | IngestError::Extraction(_)
        )
    }
}

impl From<ColloquyError> for IngestError {
    fn from(err: ColloquyError) -> Self {
        match err {
            ColloquyError::Upstream(msg) => IngestError::Embedding(msg),
            other => IngestError::Storage(other.to_string()),
        }
    }
}
