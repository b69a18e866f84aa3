//! Embedding backends and vector utilities.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI `/v1/embeddings` API.
//! - **`LocalEmbedder`**: runs a pre-fetched model in-process via fastembed
//!   (requires the `local-embeddings` feature).
//!
//! Callers normally go through [`LazyEmbedder`], which reads the backend
//! choice from configuration and builds the backend on the first non-empty
//! `embed` call. A run where every note is unchanged never loads a model or
//! opens a connection.
//!
//! Also provides vector utilities for SQLite BLOB storage:
//! - [`cosine_similarity`] computes similarity between two vectors
//! - [`vec_to_blob`] encodes a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] decodes a BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The remote backends share one retry loop:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use remote::{OllamaEmbedder, OpenAiEmbedder};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::error::{NotesError, Result};

/// A text-to-vector backend.
///
/// `embed` returns one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"all-minilm"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    vectors.pop().ok_or_else(|| NotesError::EmbeddingUnavailable {
        backend: embedder.model_name().to_string(),
        reason: "empty embedding response".to_string(),
    })
}

/// Configuration-selected backend, constructed once on first use.
///
/// `model_name()` and `dims()` are answered from configuration, so the
/// startup dimension check does not initialise the backend. The backend
/// handle is read-only once built and is shared by indexing and queries.
pub struct LazyEmbedder {
    config: EmbeddingConfig,
    collection: String,
    model: String,
    dims: usize,
    backend: OnceCell<Box<dyn Embedder>>,
}

impl LazyEmbedder {
    /// `collection` only labels dimension errors.
    pub fn new(config: &EmbeddingConfig, collection: &str) -> Result<Self> {
        let dims = config
            .resolved_dims()
            .ok_or_else(|| NotesError::invalid_config("embedding.dims", "not set"))?;
        Ok(Self {
            config: config.clone(),
            collection: collection.to_string(),
            model: config.model_name(),
            dims,
            backend: OnceCell::new(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    async fn backend(&self) -> Result<&dyn Embedder> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                info!(
                    provider = %self.config.provider,
                    model = %self.model,
                    "Initializing embedding backend"
                );
                create_backend(&self.config).await
            })
            .await?;
        Ok(backend.as_ref())
    }
}

#[async_trait]
impl Embedder for LazyEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let backend = self.backend().await?;
        let vectors = backend.embed(texts).await?;

        if vectors.len() != texts.len() {
            return Err(NotesError::EmbeddingUnavailable {
                backend: self.config.provider.clone(),
                reason: format!(
                    "backend returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(NotesError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: self.dims,
                actual: bad.len(),
            });
        }
        debug!(count = vectors.len(), "Embedded batch");
        Ok(vectors)
    }
}

/// Build the backend named by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"local"` | `LocalEmbedder` (`local-embeddings` feature) |
pub async fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalEmbedder::new(config).await?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(NotesError::invalid_config(
            "embedding.provider",
            "the local provider requires building with --features local-embeddings",
        )),
        other => Err(NotesError::invalid_config(
            "embedding.provider",
            format!("unknown provider '{}'", other),
        )),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use notes_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
