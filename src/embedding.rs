//! Embedding port and provider implementations.
//!
//! The engine treats embedding as a black box: [`Embedder::embed`] maps a
//! text string to a fixed-length vector, deterministically for identical
//! input. Three providers are built in:
//!
//! - **[`HashEmbedder`]** — deterministic local feature hashing; no network,
//!   no model download. The default, and what the test suite uses.
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible `/embeddings`
//!   endpoint with retry and exponential backoff.
//! - **[`DisabledEmbedder`]** — always fails; used when embeddings are not
//!   configured.
//!
//! Also provides vector utilities shared with the index backends:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].
//!
//! # Retry Strategy (OpenAI provider)
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::EmbeddingConfig;

/// Errors from the embedding port.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Backend unreachable or exhausted retries. Retriable later.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    /// The backend rejected this request. Not retriable.
    #[error("embedding request failed: {0}")]
    Failed(String),
}

/// Maps text to a fixed-length vector. Pure and deterministic for
/// identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Instantiate the provider named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Hash Provider ============

/// Deterministic local embedding via feature hashing.
///
/// Word and character-trigram features are hashed into `dims` buckets and
/// the result is L2-normalized. Not a learned model — but deterministic,
/// offline, and good enough for texts that share vocabulary to land near
/// each other under cosine distance.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        HashEmbedder { dims: dims.max(1) }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dims];

        for term in text.split_whitespace() {
            let term = term.to_lowercase();
            let bucket = (fnv1a(term.as_bytes()) as usize) % self.dims;
            vector[bucket] += 1.0;

            // Character trigrams give partial credit to word variants.
            let chars: Vec<char> = term.chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                let bucket = (fnv1a(gram.as_bytes()) as usize) % self.dims;
                vector[bucket] += 0.5;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Reads the API key from the `OPENAI_API_KEY` environment variable at
/// request time; the base URL comes from the configuration so local
/// OpenAI-compatible servers work too.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model is required for provider 'openai'"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(OpenAiEmbedder {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn request_once(&self, text: &str) -> Result<Vec<f32>, RequestFailure> {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let url = format!("{}/embeddings", self.endpoint);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestFailure::Retriable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RequestFailure::Retriable(format!("HTTP {}", status)));
        }
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RequestFailure::Fatal(format!("HTTP {}: {}", status, detail)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Fatal(format!("invalid response body: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RequestFailure::Fatal("empty embedding response".to_string()))
    }
}

enum RequestFailure {
    Retriable(String),
    Fatal(String),
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = 2u64.pow((attempt - 1).min(5));
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            match self.request_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(RequestFailure::Fatal(msg)) => return Err(EmbedError::Failed(msg)),
                Err(RequestFailure::Retriable(msg)) => {
                    warn!(attempt, error = %msg, "embedding request failed, will retry");
                    last_error = msg;
                }
            }
        }
        Err(EmbedError::Unavailable(format!(
            "retries exhausted: {}",
            last_error
        )))
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
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

/// Cosine similarity between two vectors; 0.0 for empty or mismatched
/// lengths.
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
