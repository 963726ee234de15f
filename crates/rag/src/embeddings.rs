//! Query embeddings via Ollama
//!
//! Each vector source owns one embedding model; the model must match the one
//! the collection was indexed with.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::RagError;

/// Embedding model interface
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one query string
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Model identifier
    fn model(&self) -> &str;
}

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// L2-normalise returned vectors
    pub normalize: bool,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: docent_config::constants::endpoints::OLLAMA_DEFAULT.to_string(),
            model: docent_config::constants::models::GEMINI_EMBEDDING.to_string(),
            normalize: true,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaEmbeddingConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaEmbeddingConfig {
        &self.config
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));
        let request = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        let mut embeddings = body.embeddings;
        if self.config.normalize {
            embeddings.iter_mut().for_each(|v| l2_normalize(v));
        }
        Ok(embeddings)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Normalise a vector to unit length in place; zero vectors are left as-is
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
