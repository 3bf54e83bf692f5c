//! Colloquy Vector crate - the retrieval-augmented generation subsystem.
//!
//! Provides text extraction, token-window chunking, an embedding service
//! trait with OpenAI and mock implementations, cosine similarity search
//! over an agent's chunks, the document ingestion pipeline, and the
//! context assembler that builds the grounded system prompt.

pub mod chunker;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod pipeline;

pub use chunker::{
    Chunker, ChunkerConfig, Cl100kSplitter, HfTokenizer, TokenSplitter, WhitespaceTokenizer,
};
pub use context::{wrap_system_prompt, ContextAssembler, ContextOptions, CONTEXT_DELIMITER};
pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OpenAiEmbedding};
pub use error::IngestError;
pub use extract::extract_text;
pub use index::{cosine_similarity, SearchHit, VectorStore};
pub use pipeline::{IngestOutcome, IngestionPipeline};
