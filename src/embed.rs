//! Embedding providers and the contract-enforcing wrapper around them.
//!
//! Providers only turn text into raw vectors; [`Embedder`] owns the contract:
//! empty input rejected, long input deterministically truncated to the shared
//! chunk bound, output dimension checked post-hoc (a mismatch is a bug, not a
//! user error), and every vector L2-normalized before it leaves this module.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::types::{AssistError, CHUNK_MAX_CHARS, EMBEDDING_DIM};

/// Raw text-to-vector backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of inputs, one vector per input, in order.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AssistError>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, AssistError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.trim().is_empty() {
            let auth = format!("Bearer {}", api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|err| AssistError::Embedding(err.to_string()))?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| AssistError::Embedding(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }
}

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
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AssistError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| AssistError::Embedding(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(AssistError::Embedding(format!(
                "embeddings endpoint returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| AssistError::Embedding(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(AssistError::Embedding(format!(
                "endpoint returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Deterministic bag-of-words provider for tests: every whitespace token is
/// hashed onto a dimension, so texts sharing vocabulary really are more
/// similar under cosine than unrelated texts.
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddingProvider {
    dim: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dim: EMBEDDING_DIM }
    }

    /// Mismatched-dimension provider, for exercising the post-hoc check.
    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let slot = (hasher.finish() as usize) % self.dim.max(1);
            vector[slot] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AssistError> {
        Ok(inputs.iter().map(|input| self.encode(input)).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// The embedder the rest of the pipeline talks to.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dim: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            dim: EMBEDDING_DIM,
        }
    }

    /// Embeds one text span into a unit vector of the configured dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AssistError> {
        let inputs = [text.to_string()];
        let mut vectors = self.embed_batch(&inputs).await?;
        // embed_batch guarantees one output per input.
        vectors
            .pop()
            .ok_or_else(|| AssistError::Embedding("provider returned no vector".to_string()))
    }

    /// Batched variant; callers embedding many chunks per page should prefer
    /// this. Any empty/whitespace-only input rejects the whole batch.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AssistError> {
        if inputs.iter().any(|input| input.trim().is_empty()) {
            return Err(AssistError::EmptyInput);
        }
        let truncated: Vec<String> = inputs
            .iter()
            .map(|input| truncate_chars(input, CHUNK_MAX_CHARS))
            .collect();

        let vectors = self.provider.embed_batch(&truncated).await?;
        let mut normalized = Vec::with_capacity(vectors.len());
        for vector in vectors {
            if vector.len() != self.dim {
                error!(
                    provider = self.provider.name(),
                    expected = self.dim,
                    got = vector.len(),
                    "embedding dimension mismatch"
                );
                return Err(AssistError::DimensionMismatch {
                    expected: self.dim,
                    got: vector.len(),
                });
            }
            normalized.push(l2_normalize(vector));
        }
        Ok(normalized)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Scales a vector to unit length; zero vectors pass through unchanged.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
