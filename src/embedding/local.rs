//! In-process embedding via fastembed.
//!
//! The model is loaded from (or downloaded once into) `embedding.model_dir`;
//! after that no network calls are made. ORT is bundled.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{NotesError, Result};

pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    /// Load the model. Runs on the blocking pool; loading can take seconds.
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config.model_name();
        let fastembed_model = to_fastembed_model(&model_name)?;
        let mut options = InitOptions::new(fastembed_model).with_show_download_progress(false);
        if let Some(dir) = &config.model_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .map_err(|e| unavailable(format!("failed to load model: {}", e)))?;

        Ok(Self {
            dims: config.resolved_dims().unwrap_or_default(),
            batch_size: config.batch_size,
            model_name,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| unavailable("model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| unavailable(format!("inference failed: {}", e)))
        })
        .await
        .map_err(|e| unavailable(e.to_string()))?
    }
}

fn unavailable(reason: impl Into<String>) -> NotesError {
    NotesError::EmbeddingUnavailable {
        backend: "local".to_string(),
        reason: reason.into(),
    }
}

fn to_fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" | "all-MiniLM-L6-v2" | "all-minilm" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => Err(NotesError::invalid_config(
            "embedding.model",
            format!(
                "unknown local model '{}'; supported: all-minilm-l6-v2, bge-small-en-v1.5, \
                 bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
                 multilingual-e5-large",
                other
            ),
        )),
    }
}
