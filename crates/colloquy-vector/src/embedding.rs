//! Embedding service trait and implementations.
//!
//! - `OpenAiEmbedding` calls an OpenAI-compatible `/embeddings` endpoint.
//!   This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colloquy_core::config::OpenAiConfig;
use colloquy_core::error::ColloquyError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Service for generating text embeddings.
///
/// Implementations convert an ordered batch of texts into fixed-dimensional
/// vectors, one per input and in input order. Used for both ingestion
/// (indexing) and search (query).
pub trait EmbeddingService: Send + Sync {
    /// Embed every text in `texts`, preserving order.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, ColloquyError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

type BoxedEmbedFuture<'a> = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>, ColloquyError>> + Send + 'a>,
>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    /// Embed a batch of texts (boxed future).
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedEmbedFuture<'a>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedEmbedFuture<'a> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

impl dyn DynEmbeddingService {
    /// Embed a single text, e.g. a search query.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ColloquyError> {
        let texts = [text.to_string()];
        self.embed_batch_boxed(&texts)
            .await?
            .pop()
            .ok_or_else(|| ColloquyError::Upstream("Embedding service returned no vectors".into()))
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - OpenAI-compatible HTTP API
// ---------------------------------------------------------------------------

/// Largest number of inputs sent in one HTTP request.
const MAX_INPUTS_PER_REQUEST: usize = 256;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding service backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// Large batches are split into several requests; the combined result keeps
/// input order. Failures surface as [`ColloquyError::Upstream`] carrying the
/// HTTP status and response body.
#[derive(Clone)]
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiEmbedding {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, ColloquyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ColloquyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            model = %config.embedding_model,
            dimensions = config.embedding_dimensions,
            "Configured OpenAI embedding service"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, ColloquyError> {
        let mut req = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            });
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ColloquyError::Upstream(format!("Embedding request timeout: {}", e))
            } else {
                ColloquyError::Upstream(format!("Embedding request failed: {}", e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ColloquyError::Upstream(format!(
                "Embedding API error ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            ColloquyError::Upstream(format!("Invalid embedding response: {}", e))
        })?;

        if parsed.data.len() != input.len() {
            return Err(ColloquyError::Upstream(format!(
                "Embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                input.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingService for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ColloquyError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            vectors.extend(self.request(batch).await?);
        }
        debug!(count = vectors.len(), model = %self.model, "Embedded batch");
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Individual texts can be pinned to a
/// fixed vector, and the whole service can be switched into a failing mode.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    overrides: HashMap<String, Vec<f32>>,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            overrides: HashMap::new(),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    /// Fail every call with an upstream error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new()
        }
    }

    /// Number of `embed_batch` calls made so far, across clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ColloquyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ColloquyError::Upstream(message.clone()));
        }

        texts
            .iter()
            .map(|text| {
                if text.is_empty() {
                    return Err(ColloquyError::Upstream("Cannot embed empty text".to_string()));
                }
                Ok(self
                    .overrides
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.hash_to_vector(text)))
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
