//! Offline evaluation of the retrieval pipeline
//!
//! Features:
//! - Query-set loading (YAML or JSON)
//! - Hit rate, MRR and nDCG before and after reranking
//! - Timestamped, write-once run artifacts
//! - Qualitative batches that generate answers over the selected context

pub mod artifact;
pub mod evaluator;
pub mod metrics;
pub mod qualitative;
pub mod queries;

pub use artifact::{run_key, ArtifactWriter, PerQueryMetrics, RunArtifact, RunMeta};
pub use evaluator::{EvaluationParams, Evaluator, QueryEvaluation, RunOptions, RunReport, RunState};
pub use metrics::{aggregate, calculate_metrics, RankingMetrics};
pub use qualitative::{
    temperature_for, QualitativeOptions, QualitativeRecord, QualitativeReport, QualitativeRunner,
};
pub use queries::{load_queries, QuerySpec};

use thiserror::Error;

/// Evaluation errors
#[derive(Error, Debug)]
pub enum EvalError {
    /// Missing, malformed or empty query set; fatal before any query runs
    #[error("Query set error: {0}")]
    QuerySet(String),

    /// A single query failed; the run continues without it
    #[error("Query '{id}' failed: {reason}")]
    PerQuery { id: String, reason: String },

    #[error("Run directory already exists: {0}")]
    ArtifactExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for EvalError {
    fn from(err: csv::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}
