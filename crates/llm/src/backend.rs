//! Generation backends

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use docent_config::GenerationConfig;

use crate::LlmError;

/// Generator configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model name/ID
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Default temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Retries for transient failures
    pub max_retries: u32,
    /// Initial backoff, doubled after each retry
    pub initial_backoff: Duration,
    /// How long Ollama keeps the model loaded ("5m", "-1", ...)
    pub keep_alive: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: docent_config::constants::models::GENERATION.to_string(),
            endpoint: docent_config::constants::endpoints::OLLAMA_DEFAULT.to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            keep_alive: "5m".to_string(),
        }
    }
}

impl From<&GenerationConfig> for GeneratorConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            ..Default::default()
        }
    }
}

/// One generated answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_time_ms: u64,
}

/// Text generation service
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt`; `temperature` overrides the default
    async fn generate(&self, prompt: &str, temperature: Option<f32>) -> Result<Generation, LlmError>;

    /// Check if the model is reachable
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;

    /// Rough token count for services that do not report usage
    ///
    /// Hangul packs roughly two graphemes per token, Latin text about four.
    fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    use unicode_segmentation::UnicodeSegmentation;

    let graphemes = text.graphemes(true).count();
    let hangul = text
        .chars()
        .filter(|c| ('\u{AC00}'..='\u{D7A3}').contains(c))
        .count();

    if hangul > graphemes / 3 {
        graphemes.max(1) / 2
    } else {
        graphemes.max(1) / 4
    }
}

/// Ollama `/api/generate` backend
#[derive(Clone)]
pub struct OllamaGenerator {
    client: Client,
    config: GeneratorConfig,
}

impl OllamaGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    async fn execute_request(&self, request: &GenerateRequest<'_>) -> Result<GenerateResponse, LlmError> {
        let response = self
            .client
            .post(self.api_url("/generate"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            // 5xx is retryable, 4xx is not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("Server error {}: {}", status, error)));
            }
            return Err(LlmError::Api(format!("{}: {}", status, error)));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, temperature: Option<f32>) -> Result<Generation, LlmError> {
        let start = std::time::Instant::now();
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: temperature.unwrap_or(self.config.temperature),
                num_predict: self.config.max_tokens as i32,
            },
            keep_alive: &self.config.keep_alive,
        };

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Generation request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(&request).await {
                Ok(response) => {
                    let text = response.response.trim().to_string();
                    if text.is_empty() {
                        return Err(LlmError::Generation("empty response".to_string()));
                    }
                    let prompt_tokens = response
                        .prompt_eval_count
                        .map(|n| n as usize)
                        .unwrap_or_else(|| estimate_tokens(prompt));
                    let response_tokens = response
                        .eval_count
                        .map(|n| n as usize)
                        .unwrap_or_else(|| estimate_tokens(&text));
                    return Ok(Generation {
                        text,
                        prompt_tokens,
                        response_tokens,
                        total_time_ms: start.elapsed().as_millis() as u64,
                    });
                },
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn is_available(&self) -> bool {
        match self.client.get(self.api_url("/tags")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Ollama not reachable");
                false
            },
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    keep_alive: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let settings = GenerationConfig::default();
        let config = GeneratorConfig::from(&settings);
        assert_eq!(config.model, settings.model);
        assert_eq!(config.timeout, Duration::from_secs(settings.timeout_secs));
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            model: "qwen2.5:7b-instruct",
            prompt: "hello",
            stream: false,
            options: GenerateOptions {
                temperature: 0.2,
                num_predict: 64,
            },
            keep_alive: "5m",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 64);
    }

    #[test]
    fn test_response_parsing_tolerates_missing_counts() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"response": "왕건", "done": true}"#).unwrap();
        assert_eq!(response.response, "왕건");
        assert!(response.eval_count.is_none());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("고려왕조"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let generator = OllamaGenerator::new(GeneratorConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        assert!(!generator.is_available().await);
    }
}
