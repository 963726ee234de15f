//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::{endpoints, models, retrieval, sources};
use crate::{ConfigError, ModelSelection};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Vector sources queried by the fan-out, in configuration order
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Shared cross-encoder reranker
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Live retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Batch evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Generation service settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            reranker: RerankerConfig::default(),
            retrieval: RetrievalConfig::default(),
            evaluation: EvaluationConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new(sources::GEMINI, "history_gemini", models::GEMINI_EMBEDDING),
        SourceConfig::new(sources::HJ, "history_hj", models::HJ_EMBEDDING),
    ]
}

/// Distance metric of a k-NN collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

/// One vector source: an embedding model plus a k-NN collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Tag written into each candidate's `source_db`
    pub tag: String,

    /// Embedding service endpoint
    #[serde(default = "default_ollama_endpoint")]
    pub embedding_endpoint: String,

    /// Embedding model name
    pub embedding_model: String,

    /// L2-normalise embeddings (required for cosine collections)
    #[serde(default = "default_true")]
    pub normalize_embeddings: bool,

    /// Qdrant endpoint
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,

    /// Qdrant collection name
    pub collection: String,

    /// Qdrant API key (optional)
    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    /// Collection distance metric
    #[serde(default)]
    pub distance: DistanceMetric,

    /// Default number of candidates fetched per query
    #[serde(default = "default_retrieve_k")]
    pub retrieve_k: usize,

    /// Per-source timeout applied around one fetch
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn new(
        tag: impl Into<String>,
        collection: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            embedding_endpoint: default_ollama_endpoint(),
            embedding_model: embedding_model.into(),
            normalize_embeddings: true,
            qdrant_endpoint: default_qdrant_endpoint(),
            collection: collection.into(),
            qdrant_api_key: None,
            distance: DistanceMetric::Cosine,
            retrieve_k: default_retrieve_k(),
            timeout_ms: None,
        }
    }
}

/// Cross-encoder reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Local directory of the fine-tuned model (optional)
    #[serde(default = "default_finetuned_reranker")]
    pub finetuned_model_path: Option<PathBuf>,

    /// Hub name of the fallback model
    #[serde(default = "default_baseline_reranker")]
    pub baseline_model: String,

    /// Maximum sequence length for (query, document) pairs
    #[serde(default = "default_reranker_max_length")]
    pub max_length: usize,

    /// ONNX file name inside the model directory
    #[serde(default = "default_onnx_file")]
    pub onnx_file: String,

    /// Tokenizer file name inside the model directory
    #[serde(default = "default_tokenizer_file")]
    pub tokenizer_file: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            finetuned_model_path: default_finetuned_reranker(),
            baseline_model: default_baseline_reranker(),
            max_length: default_reranker_max_length(),
            onnx_file: default_onnx_file(),
            tokenizer_file: default_tokenizer_file(),
        }
    }
}

impl RerankerConfig {
    /// Resolve the fine-tuned/baseline choice. Call once at startup.
    pub fn resolve_model(&self) -> ModelSelection {
        ModelSelection::resolve(self.finetuned_model_path.as_deref(), &self.baseline_model)
    }
}

/// Live retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Final context size after reranking
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    /// Sort fused candidates by (source_db, chunk_id) before reranking
    #[serde(default)]
    pub canonical_order: bool,

    /// Timeout around the whole fan-out call
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_top_k: default_final_top_k(),
            canonical_order: false,
            request_timeout_ms: None,
        }
    }
}

/// Batch evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Candidates fetched per source
    #[serde(default = "default_eval_retrieve_k")]
    pub retrieve_k: usize,

    /// Length of the reranked list
    #[serde(default = "default_eval_rerank_k")]
    pub rerank_k: usize,

    /// Metric cutoff
    #[serde(default = "default_eval_top_k")]
    pub top_k: usize,

    /// Parent directory of quantitative run artifacts
    #[serde(default = "default_eval_output_dir")]
    pub output_dir: PathBuf,

    /// Parent directory of qualitative run artifacts
    #[serde(default = "default_qualitative_output_dir")]
    pub qualitative_output_dir: PathBuf,

    /// Contexts handed to the generator in the qualitative batch
    #[serde(default = "default_qualitative_rerank_k")]
    pub qualitative_rerank_k: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            retrieve_k: default_eval_retrieve_k(),
            rerank_k: default_eval_rerank_k(),
            top_k: default_eval_top_k(),
            output_dir: default_eval_output_dir(),
            qualitative_output_dir: default_qualitative_output_dir(),
            qualitative_rerank_k: default_qualitative_rerank_k(),
        }
    }
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature for the baseline and citation prompt styles
    #[serde(default)]
    pub temperature: f32,

    /// Sampling temperature for the chain-of-thought prompt style
    #[serde(default = "default_cot_temperature")]
    pub cot_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            model: default_generation_model(),
            temperature: 0.0,
            cot_temperature: default_cot_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: false,
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ollama_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}

fn default_retrieve_k() -> usize {
    retrieval::RETRIEVE_K
}

fn default_finetuned_reranker() -> Option<PathBuf> {
    Some(PathBuf::from(models::FINETUNED_RERANKER_PATH))
}

fn default_baseline_reranker() -> String {
    models::BASELINE_RERANKER.to_string()
}

fn default_reranker_max_length() -> usize {
    retrieval::RERANKER_MAX_LENGTH
}

fn default_onnx_file() -> String {
    "onnx/model.onnx".to_string()
}

fn default_tokenizer_file() -> String {
    "tokenizer.json".to_string()
}

fn default_final_top_k() -> usize {
    retrieval::FINAL_TOP_K
}

fn default_eval_retrieve_k() -> usize {
    retrieval::EVAL_RETRIEVE_K
}

fn default_eval_rerank_k() -> usize {
    retrieval::EVAL_RERANK_K
}

fn default_eval_top_k() -> usize {
    retrieval::EVAL_TOP_K
}

fn default_eval_output_dir() -> PathBuf {
    PathBuf::from("evaluation/output")
}

fn default_qualitative_output_dir() -> PathBuf {
    PathBuf::from("evaluation/results")
}

fn default_qualitative_rerank_k() -> usize {
    retrieval::QUALITATIVE_RERANK_K
}

fn default_generation_model() -> String {
    models::GENERATION.to_string()
}

fn default_cot_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> usize {
    1024
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a source by tag
    pub fn source(&self, tag: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.tag == tag)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sources()?;
        self.validate_reranker()?;
        self.validate_sizes()?;
        self.validate_generation()?;
        Ok(())
    }

    fn validate_sources(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::MissingField("sources".to_string()));
        }

        let mut seen = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            if source.tag.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("sources[{}].tag", idx)));
            }
            if !seen.insert(source.tag.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources[{}].tag", idx),
                    message: format!("Duplicate source tag '{}'", source.tag),
                });
            }
            if source.collection.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "sources[{}].collection",
                    idx
                )));
            }
            if source.embedding_model.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "sources[{}].embedding_model",
                    idx
                )));
            }
            if source.retrieve_k == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources[{}].retrieve_k", idx),
                    message: "Must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    fn validate_reranker(&self) -> Result<(), ConfigError> {
        if self.reranker.baseline_model.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "reranker.baseline_model".to_string(),
            ));
        }
        if self.reranker.max_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reranker.max_length".to_string(),
                message: "Must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_sizes(&self) -> Result<(), ConfigError> {
        let checks = [
            ("evaluation.retrieve_k", self.evaluation.retrieve_k),
            ("evaluation.rerank_k", self.evaluation.rerank_k),
            ("evaluation.top_k", self.evaluation.top_k),
            (
                "evaluation.qualitative_rerank_k",
                self.evaluation.qualitative_rerank_k,
            ),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    fn validate_generation(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("generation.temperature", self.generation.temperature),
            ("generation.cot_temperature", self.generation.cot_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 2.0, got {}", value),
                });
            }
        }
        Ok(())
    }
}

fn environment_source() -> Environment {
    Environment::with_prefix("DOCENT")
        .separator("__")
        .try_parsing(true)
}

/// Load settings from `config/default.*`, `config/{env}.*` and the environment.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory.
///
/// Priority: env vars > `{dir}/{env}.*` > `{dir}/default.*` > defaults
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(environment_source());

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

/// Load settings from an explicit file, with environment overrides.
///
/// A missing file is an error.
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config = Config::builder()
        .add_source(File::from(path.to_path_buf()))
        .add_source(environment_source())
        .build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.sources.len(), 2);
        assert_eq!(settings.sources[0].tag, sources::GEMINI);
        assert_eq!(settings.sources[1].tag, sources::HJ);
        assert_eq!(settings.retrieval.final_top_k, retrieval::FINAL_TOP_K);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_duplicate_source_tags_rejected() {
        let mut settings = Settings::default();
        settings.sources[1].tag = sources::GEMINI.to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_sources_rejected() {
        let mut settings = Settings::default();
        settings.sources.clear();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut settings = Settings::default();
        settings.sources[0].retrieve_k = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.evaluation.top_k = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_temperature_validation() {
        let mut settings = Settings::default();
        settings.generation.temperature = 3.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_settings_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docent.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
sources:
  - tag: gemini
    collection: gemini_chunks
    embedding_model: bge-m3
    retrieve_k: 30
  - tag: hj
    collection: hj_scripts
    embedding_model: nomic-embed-text
    timeout_ms: 1500
reranker:
  baseline_model: cross-encoder/test
retrieval:
  final_top_k: 3
  canonical_order: true
"#
        )
        .unwrap();

        let settings = load_settings_file(&path).unwrap();
        assert_eq!(settings.sources.len(), 2);
        assert_eq!(settings.sources[0].retrieve_k, 30);
        assert_eq!(settings.sources[1].retrieve_k, retrieval::RETRIEVE_K);
        assert_eq!(settings.sources[1].timeout_ms, Some(1500));
        assert_eq!(settings.reranker.baseline_model, "cross-encoder/test");
        assert_eq!(settings.retrieval.final_top_k, 3);
        assert!(settings.retrieval.canonical_order);
        assert!(settings.source("hj").is_some());
    }

    #[test]
    fn test_load_settings_file_missing() {
        let result = load_settings_file(Path::new("/nonexistent/docent.yaml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_settings_from_empty_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(dir.path(), Some("test")).unwrap();
        assert_eq!(settings.sources.len(), 2);
    }
}
