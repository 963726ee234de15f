//! Cross-encoder reranking
//!
//! One scoring model is shared by every request. It scores (query, passage)
//! pairs jointly; higher means more relevant. With the `onnx` feature the
//! model is an ONNX Runtime cross-encoder, fine-tuned from a local directory
//! or a baseline pulled from the Hugging Face hub. Without it a lexical
//! overlap scorer stands in.

use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use parking_lot::Mutex;
#[cfg(feature = "onnx")]
use std::path::Path;
#[cfg(feature = "onnx")]
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use crate::candidate::Candidate;
use crate::shared::SharedResource;
use crate::RagError;

/// Pairwise relevance model
///
/// `predict` is blocking and CPU/GPU-bound; callers run it off the async
/// executor.
pub trait CrossEncoder: Send + Sync {
    /// One score per pair, same order as the input
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RagError>;

    fn model_id(&self) -> &str;
}

/// Shared reranker
pub struct Reranker {
    model: SharedResource<dyn CrossEncoder>,
}

impl Reranker {
    pub fn new(model: SharedResource<dyn CrossEncoder>) -> Self {
        Self { model }
    }

    /// Wrap an already-loaded encoder
    pub fn from_encoder(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self::new(SharedResource::ready("reranker", encoder))
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_initialized()
    }

    /// Score every candidate against `query` in one batch
    ///
    /// Returns one score per candidate. Any model failure, including a
    /// failure to load it, is a [`RagError::RerankFailure`].
    pub async fn score(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<f32>, RagError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.get().await.map_err(rerank_failure)?;
        let query = query.to_string();
        let passages: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let expected = passages.len();

        let start = std::time::Instant::now();
        let scores = tokio::task::spawn_blocking(move || {
            let pairs: Vec<(&str, &str)> = passages
                .iter()
                .map(|p| (query.as_str(), p.as_str()))
                .collect();
            model.predict(&pairs)
        })
        .await
        .map_err(|e| RagError::RerankFailure(format!("scoring task failed: {}", e)))?
        .map_err(rerank_failure)?;

        if scores.len() != expected {
            return Err(RagError::RerankFailure(format!(
                "model returned {} scores for {} pairs",
                scores.len(),
                expected
            )));
        }

        metrics::histogram!("docent_rerank_seconds").record(start.elapsed().as_secs_f64());
        tracing::debug!(
            pairs = expected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reranked candidates"
        );
        Ok(scores)
    }
}

fn rerank_failure(err: RagError) -> RagError {
    match err {
        RagError::RerankFailure(_) => err,
        other => RagError::RerankFailure(other.to_string()),
    }
}

/// ONNX Runtime cross-encoder
#[cfg(feature = "onnx")]
pub struct OnnxCrossEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
}

#[cfg(feature = "onnx")]
impl OnnxCrossEncoder {
    /// Load from an exported model and its tokenizer
    pub fn from_files(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        max_length: usize,
        model_id: impl Into<String>,
    ) -> Result<Self, RagError> {
        let session = Session::builder()
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RagError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::Model(e.to_string()))?;

        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| RagError::Model(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| RagError::Model(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: model_id.into(),
        })
    }

    /// Load the selected model; baselines are fetched from the hub
    ///
    /// Blocking: downloads and session construction happen inline.
    pub fn load(
        selection: &docent_config::ModelSelection,
        config: &docent_config::RerankerConfig,
    ) -> Result<Self, RagError> {
        use docent_config::ModelSelection;

        let (model_path, tokenizer_path) = match selection {
            ModelSelection::Finetuned(dir) => {
                (dir.join(&config.onnx_file), dir.join(&config.tokenizer_file))
            },
            ModelSelection::Baseline(name) => {
                let api = hf_hub::api::sync::Api::new()
                    .map_err(|e| RagError::Model(format!("hub unavailable: {}", e)))?;
                let repo = api.model(name.clone());
                let model = repo
                    .get(&config.onnx_file)
                    .map_err(|e| RagError::Model(format!("{}: {}", config.onnx_file, e)))?;
                let tokenizer = repo
                    .get(&config.tokenizer_file)
                    .map_err(|e| RagError::Model(format!("{}: {}", config.tokenizer_file, e)))?;
                (model, tokenizer)
            },
        };

        tracing::info!(
            kind = selection.kind(),
            model = %model_path.display(),
            "Loading cross-encoder"
        );
        Self::from_files(model_path, tokenizer_path, config.max_length, selection.identifier())
    }
}

#[cfg(feature = "onnx")]
impl CrossEncoder for OnnxCrossEncoder {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RagError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(pairs.to_vec(), true)
            .map_err(|e| RagError::Model(e.to_string()))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let input_ids = Array2::from_shape_vec((batch, seq_len), ids)
            .map_err(|e| RagError::Model(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((batch, seq_len), mask)
            .map_err(|e| RagError::Model(e.to_string()))?;

        let input_ids = Tensor::from_array(input_ids).map_err(|e| RagError::Model(e.to_string()))?;
        let attention_mask =
            Tensor::from_array(attention_mask).map_err(|e| RagError::Model(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
            .map_err(|e| RagError::Model(e.to_string()))?;

        let (shape, logits) = outputs
            .get("logits")
            .ok_or_else(|| RagError::Model("Missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RagError::Model(e.to_string()))?;

        let labels = shape.last().map(|&d| d.max(1) as usize).unwrap_or(1);
        if logits.len() != batch * labels {
            return Err(RagError::Model(format!(
                "unexpected logits shape {:?} for batch of {}",
                shape, batch
            )));
        }

        Ok(logits.chunks(labels).map(relevance_from_logits).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Relevance from one row of logits
///
/// Single-label heads go through a sigmoid; two-label heads use the softmax
/// probability of the positive label.
pub fn relevance_from_logits(row: &[f32]) -> f32 {
    match row {
        [] => 0.0,
        [logit] => 1.0 / (1.0 + (-logit).exp()),
        _ => {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp_sum: f32 = row.iter().map(|&x| (x - max).exp()).sum();
            (row[1] - max).exp() / exp_sum
        },
    }
}

/// Lexical overlap scorer
///
/// Stand-in when no neural model is compiled in. Scores term overlap with
/// sqrt term frequency, a length-based specificity weight and a coverage
/// bonus, squashed into [0, 1).
pub struct LexicalScorer {
    stopwords: HashSet<&'static str>,
}

impl LexicalScorer {
    pub const MODEL_ID: &'static str = "lexical-overlap";

    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "in", "for",
        "on", "with", "at", "by", "from", "as", "and", "or", "but", "did", "do", "does", "what",
        "which", "who", "whom", "when", "where", "why", "how", "this", "that", "these", "those",
        "it", "its", "he", "she", "they", "their", "about",
        "무엇", "누구", "언제", "어디", "어떻게", "왜", "그", "이", "저", "것", "수", "등",
        "및", "또는", "있다", "있는", "했다", "하는", "대해", "대한",
    ];

    /// Particles stripped from the end of Korean tokens
    const PARTICLES: &'static [&'static str] = &[
        "에서", "으로", "에게", "까지", "부터", "은", "는", "이", "가", "을", "를", "의", "에",
        "로", "와", "과", "도", "만",
    ];

    pub fn new() -> Self {
        Self {
            stopwords: Self::STOPWORDS.iter().copied().collect(),
        }
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .map(strip_particle)
            .filter(|t| t.chars().count() > 1 && !self.stopwords.contains(*t))
            .map(str::to_string)
            .collect()
    }

    pub fn score(&self, query: &str, document: &str) -> f32 {
        let query_terms = self.tokens(query);
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_terms = self.tokens(document);
        let doc_len = doc_terms.len().max(1) as f32;
        let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

        let mut total = 0.0f32;
        let mut matched = 0usize;
        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_terms.iter().filter(|t| *t == term).count() as f32;
            if tf > 0.0 {
                matched += 1;
                let specificity = (1.0 + term.chars().count() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                total += tf.sqrt() * specificity * position_weight * length_norm;
            }
        }

        let coverage = matched as f32 / query_terms.len() as f32;
        let raw = total + coverage * 0.3;
        (raw / (raw + 1.0)).min(1.0)
    }
}

fn strip_particle(token: &str) -> &str {
    for particle in LexicalScorer::PARTICLES {
        if let Some(stem) = token.strip_suffix(particle) {
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }
    token
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossEncoder for LexicalScorer {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RagError> {
        Ok(pairs.iter().map(|(q, d)| self.score(q, d)).collect())
    }

    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }
}
