//! Brute-force cosine similarity search over an agent's stored chunks.
//!
//! Every search scans the agent's full chunk set. Scores are computed
//! independently per chunk, so the ranking depends only on the stored
//! order of chunks for equal scores.

use std::cmp::Ordering;

use tracing::{debug, warn};
use uuid::Uuid;

use colloquy_core::error::ColloquyError;
use colloquy_core::types::DocumentChunk;
use colloquy_storage::DocumentRepository;

/// A single chunk returned from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
}

/// Similarity search over the chunks persisted for each agent.
#[derive(Clone)]
pub struct VectorStore {
    documents: DocumentRepository,
}

impl VectorStore {
    pub fn new(documents: DocumentRepository) -> Self {
        Self { documents }
    }

    /// Rank the agent's chunks against `query` and keep the best `top_k`.
    ///
    /// Results are sorted by descending score. Equal scores keep storage
    /// order (document creation, then chunk index). Chunks whose embedding
    /// dimension differs from the query are skipped.
    pub fn search(
        &self,
        agent_id: Uuid,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ColloquyError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let chunks = self.documents.chunks_for_agent(agent_id)?;
        let hits = rank_chunks(chunks, query, top_k);
        debug!(agent_id = %agent_id, hits = hits.len(), "Vector search complete");
        Ok(hits)
    }
}

/// Score `chunks` against `query` and keep the best `top_k`, stably.
pub fn rank_chunks(chunks: Vec<DocumentChunk>, query: &[f32], top_k: usize) -> Vec<SearchHit> {
    let mut skipped = 0usize;
    let mut scored: Vec<SearchHit> = chunks
        .into_iter()
        .filter_map(|chunk| {
            if chunk.embedding.len() != query.len() {
                skipped += 1;
                return None;
            }
            let score = cosine_similarity(query, &chunk.embedding);
            Some(SearchHit {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content,
                score,
            })
        })
        .collect();

    if skipped > 0 {
        warn!(skipped, dimensions = query.len(), "Skipped chunks with mismatched embedding dimensions");
    }

    // `sort_by` is stable, so ties keep storage order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(top_k);
    scored
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use colloquy_core::types::{Agent, Document, DocumentType};
    use colloquy_storage::{AgentRepository, Database};

    use super::*;

    fn chunk(document_id: Uuid, index: u32, content: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: Uuid::new_v4(),
            document_id,
            content: content.to_string(),
            embedding,
            chunk_index: index,
            token_count: 1,
        }
    }

    fn setup() -> (VectorStore, DocumentRepository, Uuid) {
        let db = Arc::new(Database::in_memory().unwrap());
        let agent = Agent::new("Librarian", "You answer from documents.");
        AgentRepository::new(db.clone()).create(&agent).unwrap();
        let docs = DocumentRepository::new(db);
        (VectorStore::new(docs.clone()), docs, agent.id)
    }

    fn store_doc(docs: &DocumentRepository, agent_id: Uuid, vectors: &[(&str, Vec<f32>)]) -> Uuid {
        let document = Document {
            id: Uuid::new_v4(),
            agent_id,
            filename: "notes.txt".to_string(),
            file_type: DocumentType::Txt,
            file_size: 10,
            chunk_count: 0,
            created_at: Utc::now(),
        };
        let chunks: Vec<DocumentChunk> = vectors
            .iter()
            .enumerate()
            .map(|(i, (content, v))| chunk(document.id, i as u32, content, v.clone()))
            .collect();
        docs.insert_with_chunks(document, &chunks).unwrap().id
    }

    // ---- cosine_similarity ----

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0f32; 100];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let mut a = vec![0.0f32; 100];
        let mut b = vec![0.0f32; 100];
        a[0] = 1.0;
        b[1] = 1.0;
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0f32, 2.0];
        let b = vec![-1.0f32, -2.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0f32; 100];
        let b = vec![1.0f32; 100];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0f32; 10];
        let b = vec![1.0f32; 20];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_scale_invariant() {
        let a = vec![0.3f32, 0.4];
        let b = vec![3.0f32, 4.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    // ---- rank_chunks ----

    #[test]
    fn test_rank_orders_descending_and_truncates() {
        let doc = Uuid::new_v4();
        let chunks = vec![
            chunk(doc, 0, "far", vec![-1.0, 0.0]),
            chunk(doc, 1, "close", vec![1.0, 0.1]),
            chunk(doc, 2, "middle", vec![0.5, 0.5]),
        ];
        let hits = rank_chunks(chunks, &[1.0, 0.0], 2);
        let names: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(names, vec!["close", "middle"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let doc = Uuid::new_v4();
        let chunks = vec![
            chunk(doc, 0, "first", vec![1.0, 0.0]),
            chunk(doc, 1, "second", vec![2.0, 0.0]),
            chunk(doc, 2, "third", vec![3.0, 0.0]),
        ];
        let hits = rank_chunks(chunks, &[1.0, 0.0], 3);
        let names: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rank_skips_mismatched_dimensions() {
        let doc = Uuid::new_v4();
        let chunks = vec![
            chunk(doc, 0, "wrong", vec![1.0, 0.0, 0.0]),
            chunk(doc, 1, "right", vec![1.0, 0.0]),
        ];
        let hits = rank_chunks(chunks, &[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "right");
    }

    // ---- VectorStore ----

    #[test]
    fn test_search_empty_agent() {
        let (store, _, agent_id) = setup();
        assert!(store.search(agent_id, &[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_across_documents() {
        let (store, docs, agent_id) = setup();
        let d1 = store_doc(&docs, agent_id, &[("apples", vec![1.0, 0.0]), ("pears", vec![0.0, 1.0])]);
        let d2 = store_doc(&docs, agent_id, &[("apple pie", vec![0.9, 0.1])]);

        let hits = store.search(agent_id, &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "apples");
        assert_eq!(hits[0].document_id, d1);
        assert_eq!(hits[1].document_id, d2);
    }

    #[test]
    fn test_search_is_scoped_to_agent() {
        let (store, docs, agent_id) = setup();
        store_doc(&docs, agent_id, &[("mine", vec![1.0, 0.0])]);
        let other = Uuid::new_v4();
        assert!(store.search(other, &[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_top_k_zero() {
        let (store, docs, agent_id) = setup();
        store_doc(&docs, agent_id, &[("x", vec![1.0, 0.0])]);
        assert!(store.search(agent_id, &[1.0, 0.0], 0).unwrap().is_empty());
    }
}
