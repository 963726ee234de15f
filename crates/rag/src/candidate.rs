//! Retrieved candidate passages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candidate metadata
///
/// `source_db` and `chunk_id` are always present; anything else a source
/// reports is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    /// Tag of the vector source that produced the candidate
    pub source_db: String,
    /// Stable chunk identifier
    pub chunk_id: String,
    /// Source-specific metadata
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CandidateMetadata {
    pub fn new(source_db: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            source_db: source_db.into(),
            chunk_id: chunk_id.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One retrieved passage scoped to a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Chunk text (never empty)
    pub content: String,
    pub metadata: CandidateMetadata,
    /// Distance reported by the k-NN service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Cross-encoder score, set by the selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn new(content: impl Into<String>, metadata: CandidateMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
            distance: None,
            rerank_score: None,
        }
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn source_db(&self) -> &str {
        &self.metadata.source_db
    }

    pub fn chunk_id(&self) -> &str {
        &self.metadata.chunk_id
    }
}
