//! Multi-source retrieval with shared cross-encoder reranking
//!
//! Features:
//! - Per-corpus vector sources (embedding model + Qdrant collection)
//! - Concurrent fan-out with per-source failure isolation
//! - Batched cross-encoder reranking (ONNX Runtime behind the `onnx` feature)
//! - Stable top-k selection and prompt-ready context rendering
//! - Lazily-initialised, process-wide model and collection handles

pub mod candidate;
pub mod embeddings;
pub mod factory;
pub mod fanout;
pub mod pipeline;
pub mod reranker;
pub mod selector;
pub mod shared;
pub mod source;
pub mod vector_store;

pub use candidate::{Candidate, CandidateMetadata};
pub use embeddings::{Embedder, OllamaEmbedder, OllamaEmbeddingConfig};
pub use factory::{build_pipeline, build_reranker, build_source};
pub use fanout::{FusionFanOut, SourceOutcome};
pub use pipeline::{canonical_order, ContextOutcome, RetrievalPipeline};
#[cfg(feature = "onnx")]
pub use reranker::OnnxCrossEncoder;
pub use reranker::{CrossEncoder, LexicalScorer, Reranker};
pub use selector::{rank_by_scores, render, Selector};
pub use shared::SharedResource;
pub use source::{candidates_from_response, EmbeddedSource, VectorSource};
pub use vector_store::{KnnCollection, KnnResponse, QdrantCollection, QdrantCollectionConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    /// One source's model or collection could not be reached or initialised
    #[error("Source '{source_id}' unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// The shared scoring model failed on a batch
    #[error("Rerank failure: {0}")]
    RerankFailure(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Model error: {0}")]
    Model(String),

    /// Missing or invalid configuration for a component
    #[error("Configuration error: {0}")]
    Configuration(String),
}
