//! Token-window chunking of extracted document text.
//!
//! A [`TokenSplitter`] maps text to token byte spans. The [`Chunker`] slides
//! a window of `max_tokens` over those spans, stepping back `overlap_tokens`
//! between windows. The default splitter is the cl100k BPE encoding; a
//! HuggingFace `tokenizer.json` can replace it. Without a usable splitter the
//! chunker windows over characters instead, with the same overlap semantics.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use colloquy_core::config::RagConfig;
use colloquy_core::error::ColloquyError;
use tiktoken_rs::CoreBPE;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Splits text into token spans expressed as byte ranges into the input.
pub trait TokenSplitter: Send + Sync {
    /// Byte ranges of consecutive tokens, in text order.
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>, ColloquyError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// cl100k BPE
// ---------------------------------------------------------------------------

/// Token splitter over the `cl100k_base` encoding bundled with tiktoken-rs.
pub struct Cl100kSplitter {
    bpe: CoreBPE,
}

impl Cl100kSplitter {
    pub fn new() -> Result<Self, ColloquyError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ColloquyError::Config(format!("Failed to load cl100k_base: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl TokenSplitter for Cl100kSplitter {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>, ColloquyError> {
        let tokens = self.bpe.encode_ordinary(text);

        // Ordinary tokens decode to exactly the input bytes, so lengths accumulate to offsets.
        let mut spans = Vec::with_capacity(tokens.len());
        let mut offset = 0;
        for bytes in self.bpe._decode_native_and_split(tokens) {
            let end = offset + bytes.len();
            let span = floor_boundary(text, offset)..ceil_boundary(text, end);
            if !span.is_empty() {
                spans.push(span);
            }
            offset = end;
        }
        Ok(spans)
    }

    fn name(&self) -> &str {
        "cl100k"
    }
}

// ---------------------------------------------------------------------------
// HuggingFace tokenizer
// ---------------------------------------------------------------------------

/// Token splitter backed by a HuggingFace `tokenizer.json`.
///
/// Truncation and padding stored in the file are cleared on load so every
/// token of the input is windowed.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, ColloquyError> {
        if !path.exists() {
            return Err(ColloquyError::Config(format!(
                "Tokenizer not found at {}",
                path.display()
            )));
        }
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| ColloquyError::Config(format!("Failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(None)
            .map_err(|e| ColloquyError::Config(format!("Failed to disable truncation: {}", e)))?;
        tokenizer.with_padding(None);
        info!(path = %path.display(), "Loaded chunking tokenizer");
        Ok(Self { tokenizer })
    }
}

impl TokenSplitter for HfTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>, ColloquyError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ColloquyError::Validation(format!("Tokenization failed: {}", e)))?;

        // Byte-level tokens may split a multi-byte character; widen to char boundaries.
        Ok(encoding
            .get_offsets()
            .iter()
            .map(|&(start, end)| floor_boundary(text, start)..ceil_boundary(text, end))
            .filter(|span| !span.is_empty())
            .collect())
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Whitespace tokenizer
// ---------------------------------------------------------------------------

/// Treats every maximal run of non-whitespace as one token.
///
/// Also defines the approximate `token_count` stored with each chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    pub fn count(text: &str) -> usize {
        text.split_whitespace().count()
    }
}

impl TokenSplitter for WhitespaceTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>, ColloquyError> {
        let mut spans = Vec::new();
        let mut start: Option<usize> = None;
        for (idx, ch) in text.char_indices() {
            match (ch.is_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push(s..idx);
                    start = None;
                }
                (false, None) => start = Some(idx),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(s..text.len());
        }
        Ok(spans)
    }

    fn name(&self) -> &str {
        "whitespace"
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Window sizes for token and character chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub fallback_chars: usize,
    pub fallback_overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 50,
            fallback_chars: 2000,
            fallback_overlap_chars: 200,
        }
    }
}

impl From<&RagConfig> for ChunkerConfig {
    fn from(rag: &RagConfig) -> Self {
        Self {
            max_tokens: rag.max_chunk_tokens,
            overlap_tokens: rag.chunk_overlap_tokens,
            fallback_chars: rag.fallback_chunk_chars,
            fallback_overlap_chars: rag.fallback_overlap_chars,
        }
    }
}

/// Splits text into ordered, overlapping, trimmed, non-empty chunks.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    splitter: Option<Arc<dyn TokenSplitter>>,
}

impl Chunker {
    /// Create a chunker. `None` selects character windowing.
    pub fn new(config: ChunkerConfig, splitter: Option<Arc<dyn TokenSplitter>>) -> Self {
        Self { config, splitter }
    }

    /// Build a chunker from RAG settings.
    ///
    /// A configured `tokenizer.json` takes precedence over cl100k. If it
    /// cannot be loaded the chunker logs a warning and uses cl100k, and if
    /// cl100k is unavailable too it windows over characters.
    pub fn from_config(rag: &RagConfig) -> Self {
        let custom: Option<Arc<dyn TokenSplitter>> = if rag.tokenizer_path.trim().is_empty() {
            None
        } else {
            match HfTokenizer::from_file(Path::new(&rag.tokenizer_path)) {
                Ok(tokenizer) => Some(Arc::new(tokenizer)),
                Err(e) => {
                    warn!(error = %e, "Configured tokenizer unavailable, using cl100k");
                    None
                }
            }
        };
        let splitter = custom.or_else(|| match Cl100kSplitter::new() {
            Ok(bpe) => Some(Arc::new(bpe) as Arc<dyn TokenSplitter>),
            Err(e) => {
                warn!(error = %e, "Tokenizer unavailable, chunking by characters");
                None
            }
        });
        Self::new(ChunkerConfig::from(rag), splitter)
    }

    /// Name of the active token splitter, or `"characters"`.
    pub fn splitter_name(&self) -> &str {
        self.splitter.as_ref().map_or("characters", |s| s.name())
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. Empty input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        if let Some(splitter) = &self.splitter {
            match splitter.token_spans(text) {
                Ok(spans) => {
                    let chunks = window_spans(
                        text,
                        &spans,
                        self.config.max_tokens,
                        self.config.overlap_tokens,
                    );
                    debug!(
                        tokenizer = splitter.name(),
                        tokens = spans.len(),
                        chunks = chunks.len(),
                        "Chunked by tokens"
                    );
                    return chunks;
                }
                Err(e) => {
                    warn!(error = %e, "Tokenization failed, chunking by characters");
                }
            }
        }

        let spans: Vec<Range<usize>> = text
            .char_indices()
            .map(|(idx, ch)| idx..idx + ch.len_utf8())
            .collect();
        let chunks = window_spans(
            text,
            &spans,
            self.config.fallback_chars,
            self.config.fallback_overlap_chars,
        );
        debug!(chars = spans.len(), chunks = chunks.len(), "Chunked by characters");
        chunks
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .field("splitter", &self.splitter.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Slide a window of `size` units over `spans`, advancing by `size - overlap`.
///
/// Each window covers the source text from its first span's start to its
/// last span's end. Windows are trimmed and dropped when empty.
fn window_spans(text: &str, spans: &[Range<usize>], size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < spans.len() {
        let end = (start + size).min(spans.len());
        let window = &text[spans[start].start..spans[end - 1].end];
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end >= spans.len() {
            break;
        }
        start = end - overlap;
    }
    chunks
}
