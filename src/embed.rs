//! Text-to-vector collaborators.
//!
//! The store never loads a model itself. It is handed an [`Embedder`] at
//! construction and calls it inline; there is no timeout or retry around the
//! call beyond what the embedder implements.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, StoreError};

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimensionality, when known up front.
    fn dimensions(&self) -> Option<usize> {
        None
    }
}

/// Plain functions and closures are embedders too.
impl<F> Embedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self(text)
    }
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint, such as a
/// llama.cpp server started with `--embedding`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(endpoint = %self.endpoint, chars = text.len(), "requesting embedding");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "input": text, "model": self.model }))
            .send()
            .map_err(|e| StoreError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Embedding(format!("{} returned {status}: {body}", self.endpoint)));
        }

        let value: Value = response.json().map_err(|e| StoreError::Embedding(e.to_string()))?;
        parse_embedding_response(&value)
    }
}

/// Pull the vector out of an embeddings response.
///
/// Accepts the OpenAI shape `{"data": [{"embedding": [...]}]}` and the
/// llama.cpp native shapes `{"embedding": [...]}` / `[{"embedding": [[...]]}]`.
pub fn parse_embedding_response(value: &Value) -> Result<Vec<f32>> {
    let embedding = value
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .or_else(|| value.get("embedding"))
        .or_else(|| value.get(0).and_then(|d| d.get("embedding")))
        .ok_or_else(|| StoreError::Embedding("response carries no embedding".into()))?;

    // Pooled-per-token responses nest one level deeper.
    let embedding = match embedding.get(0) {
        Some(inner @ Value::Array(_)) => inner,
        _ => embedding,
    };

    let items = embedding
        .as_array()
        .ok_or_else(|| StoreError::Embedding("embedding is not an array".into()))?;
    items
        .iter()
        .map(|x| {
            x.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| StoreError::Embedding(format!("non-numeric embedding value {x}")))
        })
        .collect()
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimensions` slots;
/// the counts are L2-normalised. Texts sharing words score above zero, the same
/// text always scores 1.0 against itself. Useful offline and in tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::with_dimensions(crate::config::DEFAULT_DIMENSIONS)
    }
}

impl HashEmbedder {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let token = token.to_lowercase();
            let slot = (seahash::hash(token.as_bytes()) % self.dimensions as u64) as usize;
            v[slot] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}
