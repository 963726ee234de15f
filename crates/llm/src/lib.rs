//! Answer generation
//!
//! Features:
//! - `Generator` interface over a text-generation service
//! - Ollama backend with retry on transient failures
//! - Prompt styles (baseline, chain-of-thought, citation) around a rendered
//!   context block

pub mod backend;
pub mod prompt;

pub use backend::{Generation, Generator, GeneratorConfig, OllamaGenerator};
pub use prompt::{build_prompt, PromptStyle};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
