//! Configuration management for the history docent backend
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default.*`, `config/{env}.*` or an explicit file)
//! - Environment variables (`DOCENT__` prefix, `__` separator)
//!
//! Model selection for the shared reranker is resolved once at startup via
//! [`ModelSelection`].

pub mod constants;
pub mod models;
pub mod settings;

pub use models::ModelSelection;
pub use settings::{
    load_settings, load_settings_file, load_settings_from, DistanceMetric, EvaluationConfig,
    GenerationConfig, ObservabilityConfig, RerankerConfig, RetrievalConfig, ServerConfig,
    Settings, SourceConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
