//! Document ingestion pipeline.
//!
//! The IngestionPipeline turns an uploaded file into a stored Document and
//! its embedded chunks: validate, extract, chunk, embed, persist. Nothing is
//! written unless every stage succeeds.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use colloquy_core::error::ColloquyError;
use colloquy_core::types::{Document, DocumentChunk, DocumentType};
use colloquy_storage::DocumentRepository;

use crate::chunker::{Chunker, WhitespaceTokenizer};
use crate::embedding::DynEmbeddingService;
use crate::error::IngestError;
use crate::extract::extract_text;

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub document: Document,
    /// Characters of text extracted before chunking.
    pub extracted_chars: usize,
}

/// Parse, chunk, embed and persist uploaded documents.
#[derive(Clone)]
pub struct IngestionPipeline {
    documents: DocumentRepository,
    chunker: Chunker,
    embedder: Arc<dyn DynEmbeddingService>,
    max_upload_bytes: usize,
}

impl IngestionPipeline {
    pub fn new(
        documents: DocumentRepository,
        chunker: Chunker,
        embedder: Arc<dyn DynEmbeddingService>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            documents,
            chunker,
            embedder,
            max_upload_bytes,
        }
    }

    /// Ingest `bytes` uploaded as `filename` into the agent's knowledge base.
    ///
    /// Re-ingesting identical content creates a new, independent document.
    pub async fn ingest(
        &self,
        agent_id: Uuid,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let file_type = self.validate(&bytes, filename)?;
        let file_size = bytes.len() as u64;

        // PDF parsing is CPU-bound and may panic on malformed input.
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, file_type))
            .await
            .map_err(|e| IngestError::Extraction(format!("Extraction task failed: {}", e)))??;
        let extracted_chars = text.chars().count();

        let pieces = self.chunker.chunk(&text);
        if pieces.is_empty() {
            warn!(agent_id = %agent_id, filename, "No extractable text in upload");
            return Err(IngestError::EmptyDocument);
        }
        debug!(filename, chunks = pieces.len(), extracted_chars, "Document chunked");

        let embeddings = self
            .embedder
            .embed_batch_boxed(&pieces)
            .await
            .map_err(|e| IngestError::Embedding(e.to_string()))?;
        if embeddings.len() != pieces.len() {
            return Err(IngestError::Embedding(format!(
                "Expected {} embeddings, received {}",
                pieces.len(),
                embeddings.len()
            )));
        }

        let document = Document {
            id: Uuid::new_v4(),
            agent_id,
            filename: filename.to_string(),
            file_type,
            file_size,
            chunk_count: 0,
            created_at: Utc::now(),
        };

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (content, embedding))| DocumentChunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                token_count: WhitespaceTokenizer::count(&content) as u32,
                content,
                embedding,
                chunk_index: index as u32,
            })
            .collect();

        let document = self
            .documents
            .insert_with_chunks(document, &chunks)
            .map_err(|e| match e {
                ColloquyError::NotFound(_) => IngestError::AgentNotFound(agent_id),
                other => IngestError::from(other),
            })?;

        info!(
            document_id = %document.id,
            agent_id = %agent_id,
            filename,
            chunks = document.chunk_count,
            "Document ingested"
        );

        Ok(IngestOutcome {
            document,
            extracted_chars,
        })
    }

    fn validate(&self, bytes: &[u8], filename: &str) -> Result<DocumentType, IngestError> {
        let file_type = DocumentType::from_filename(filename).ok_or_else(|| {
            let ext = filename
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default();
            IngestError::UnsupportedFileType(ext)
        })?;

        if bytes.is_empty() {
            return Err(IngestError::EmptyFile);
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(IngestError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }
        Ok(file_type)
    }
}

#[cfg(test)]
mod tests {
    use colloquy_core::types::Agent;
    use colloquy_storage::{AgentRepository, Database};

    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::embedding::MockEmbedding;

    struct Fixture {
        pipeline: IngestionPipeline,
        documents: DocumentRepository,
        agent_id: Uuid,
    }

    fn fixture_with(embedder: MockEmbedding, max_tokens: usize) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let agent = Agent::new("Archivist", "Answer from the archive.");
        AgentRepository::new(db.clone()).create(&agent).unwrap();
        let documents = DocumentRepository::new(db);
        let chunker = Chunker::new(
            ChunkerConfig {
                max_tokens,
                overlap_tokens: 2,
                ..ChunkerConfig::default()
            },
            Some(Arc::new(WhitespaceTokenizer)),
        );
        let pipeline = IngestionPipeline::new(
            documents.clone(),
            chunker,
            Arc::new(embedder),
            1024,
        );
        Fixture {
            pipeline,
            documents,
            agent_id: agent.id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockEmbedding::with_dimensions(8), 10)
    }

    fn words(n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes()
    }

    #[tokio::test]
    async fn test_ingest_text_document() {
        let f = fixture();
        let outcome = f.pipeline.ingest(f.agent_id, words(25), "notes.txt").await.unwrap();

        let doc = &outcome.document;
        assert_eq!(doc.file_type, DocumentType::Txt);
        assert_eq!(doc.filename, "notes.txt");
        assert!(doc.chunk_count > 1);

        let chunks = f.documents.chunks_for_document(doc.id).unwrap();
        assert_eq!(chunks.len() as u32, doc.chunk_count);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert_eq!(chunk.embedding.len(), 8);
            assert!(chunk.token_count <= 10);
        }
    }

    #[tokio::test]
    async fn test_embeds_in_one_batch() {
        let embedder = MockEmbedding::with_dimensions(4);
        let f = fixture_with(embedder.clone(), 5);
        f.pipeline.ingest(f.agent_id, words(40), "a.md").await.unwrap();
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let f = fixture();
        let err = f.pipeline.ingest(f.agent_id, words(3), "slides.pptx").await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType(ref ext) if ext == "pptx"));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_empty_and_oversize_uploads() {
        let f = fixture();
        let err = f.pipeline.ingest(f.agent_id, Vec::new(), "a.txt").await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyFile));

        let err = f.pipeline.ingest(f.agent_id, vec![b'a'; 2048], "a.txt").await.unwrap_err();
        assert!(matches!(err, IngestError::FileTooLarge { size: 2048, limit: 1024 }));
    }

    #[tokio::test]
    async fn test_whitespace_document_is_empty() {
        let f = fixture();
        let err = f
            .pipeline
            .ingest(f.agent_id, b"  \n\n\t  ".to_vec(), "blank.md")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyDocument));
        assert!(f.documents.list_for_agent(f.agent_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_persists_nothing() {
        let f = fixture_with(MockEmbedding::failing("quota exceeded"), 10);
        let err = f.pipeline.ingest(f.agent_id, words(30), "a.txt").await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(ref msg) if msg.contains("quota")));
        assert!(f.documents.list_for_agent(f.agent_id).unwrap().is_empty());
        assert_eq!(f.documents.chunk_count_for_agent(f.agent_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let f = fixture();
        let missing = Uuid::new_v4();
        let err = f.pipeline.ingest(missing, words(5), "a.txt").await.unwrap_err();
        assert!(matches!(err, IngestError::AgentNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_reingest_creates_independent_document() {
        let f = fixture();
        let first = f.pipeline.ingest(f.agent_id, words(12), "a.txt").await.unwrap();
        let second = f.pipeline.ingest(f.agent_id, words(12), "a.txt").await.unwrap();
        assert_ne!(first.document.id, second.document.id);
        assert_eq!(f.documents.list_for_agent(f.agent_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_tolerated() {
        let f = fixture();
        let mut bytes = b"valid start ".to_vec();
        bytes.extend_from_slice(&[0xC3, 0x28, 0xFF]);
        bytes.extend_from_slice(b" valid end");
        let outcome = f.pipeline.ingest(f.agent_id, bytes, "mixed.txt").await.unwrap();
        assert_eq!(outcome.document.chunk_count, 1);
    }
}
