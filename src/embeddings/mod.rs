// Embedding generation
// Turns text into fixed-dimension vectors through an external service

pub mod ollama;
pub mod openai;
pub mod transport;


use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::{IndexError, Result};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use transport::RetryPolicy;

/// A remote (or fake) text embedding model
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text. An empty vector means the service produced nothing
    /// for this input; an error means the service itself failed.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Build the service selected by `config.provider`
#[inline]
pub fn create_service(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingService>> {
    let service: Arc<dyn EmbeddingService> = match config.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaClient::new(config)?),
        EmbeddingProvider::OpenAi => Arc::new(OpenAiClient::new(config)?),
    };
    info!("Using embedding service: {}", service.describe());
    Ok(service)
}

/// True for the all-zero vector that stands in for a missing embedding
#[inline]
pub fn is_sentinel(vector: &[f32]) -> bool {
    vector.iter().all(|&value| value == 0.0)
}

/// Embeds batches of texts, keeping output aligned with input
#[derive(Clone)]
pub struct EmbeddingGenerator {
    service: Arc<dyn EmbeddingService>,
    concurrency: usize,
    fallback_dimension: usize,
}

impl EmbeddingGenerator {
    #[inline]
    pub fn new(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
        Self {
            service,
            concurrency: config.concurrency.max(1) as usize,
            fallback_dimension: config.embedding_dimension as usize,
        }
    }

    #[inline]
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(create_service(config)?, config))
    }

    #[inline]
    pub fn service(&self) -> &dyn EmbeddingService {
        self.service.as_ref()
    }

    /// Embed every text, in order.
    ///
    /// Blank inputs and empty service responses become all-zero vectors whose
    /// length is that of the first real embedding in the batch, or the
    /// configured dimension when there is none. Any service error fails the
    /// whole batch.
    #[inline]
    pub async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with concurrency {}",
            texts.len(),
            self.concurrency
        );

        let outcomes: Vec<Option<Vec<f32>>> = stream::iter(texts.iter().enumerate())
            .map(|(position, text)| self.embed_one(position, text, cancel))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let dimension = outcomes
            .iter()
            .flatten()
            .map(Vec::len)
            .next()
            .unwrap_or(self.fallback_dimension);

        let mut missing = 0_usize;
        let vectors: Vec<Vec<f32>> = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    missing += 1;
                    vec![0.0; dimension]
                })
            })
            .collect();

        info!(
            "Embedded {} texts ({} without an embedding, dimension {})",
            vectors.len(),
            missing,
            dimension
        );
        Ok(vectors)
    }

    async fn embed_one(
        &self,
        position: usize,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        if text.trim().is_empty() {
            debug!("Text {} is blank, using zero vector", position);
            return Ok(None);
        }

        let embedding = tokio::select! {
            () = cancel.cancelled() => return Err(IndexError::Cancelled),
            result = self.service.embed_text(text) => result?,
        };

        if embedding.is_empty() {
            warn!(
                "Embedding service returned no embedding for text {}, using zero vector",
                position
            );
            return Ok(None);
        }

        Ok(Some(embedding))
    }
}

impl std::fmt::Debug for EmbeddingGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGenerator")
            .field("service", &self.service.describe())
            .field("concurrency", &self.concurrency)
            .field("fallback_dimension", &self.fallback_dimension)
            .finish()
    }
}
