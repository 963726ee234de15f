//! Centralized defaults for the docent backend
//!
//! Single source of truth for endpoints, model names and retrieval sizes so
//! that settings defaults, factories and tests agree.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama endpoint (embeddings and generation)
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant vector store endpoint
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6334";
}

/// Source tags of the two history corpora
pub mod sources {
    /// Original curated history corpus
    pub const GEMINI: &str = "gemini";

    /// YouTube lecture script corpus
    pub const HJ: &str = "hj";

    /// Tag used when a candidate reaches the renderer without one
    pub const UNKNOWN: &str = "unknown";
}

/// Model identifiers
pub mod models {
    /// Embedding model for the curated corpus
    pub const GEMINI_EMBEDDING: &str = "bge-m3";

    /// Embedding model for the lecture script corpus
    pub const HJ_EMBEDDING: &str = "nomic-embed-text";

    /// Baseline cross-encoder used when no fine-tuned reranker is on disk
    pub const BASELINE_RERANKER: &str = "BAAI/bge-reranker-v2-m3";

    /// Default location of the fine-tuned reranker
    pub const FINETUNED_RERANKER_PATH: &str = "models/finetuned-reranker";

    /// Generation model
    pub const GENERATION: &str = "qwen2.5:7b-instruct";
}

/// Retrieval and evaluation sizes
pub mod retrieval {
    /// Candidates fetched per source when nothing else is configured
    pub const RETRIEVE_K: usize = 20;

    /// Final context size after reranking
    pub const FINAL_TOP_K: usize = 5;

    /// Cross-encoder max sequence length
    pub const RERANKER_MAX_LENGTH: usize = 512;

    /// Evaluation: per-source fetch size
    pub const EVAL_RETRIEVE_K: usize = 50;

    /// Evaluation: reranked list length
    pub const EVAL_RERANK_K: usize = 10;

    /// Evaluation: metric cutoff
    pub const EVAL_TOP_K: usize = 10;

    /// Qualitative batch: contexts handed to the generator
    pub const QUALITATIVE_RERANK_K: usize = 5;
}
