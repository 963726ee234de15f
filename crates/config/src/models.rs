//! Model selection
//!
//! The reranker prefers a fine-tuned model at a configured local path and
//! falls back to a named baseline. The decision is made once at startup.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resolved model choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "model", rename_all = "lowercase")]
pub enum ModelSelection {
    /// Fine-tuned model directory found on disk
    Finetuned(PathBuf),
    /// Named baseline model
    Baseline(String),
}

impl ModelSelection {
    /// Pick the fine-tuned model if its directory exists, else the baseline.
    ///
    /// Emits a warning when the fallback triggers.
    pub fn resolve(finetuned: Option<&Path>, baseline: &str) -> Self {
        match finetuned {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Using fine-tuned reranker");
                Self::Finetuned(path.to_path_buf())
            },
            Some(path) => {
                tracing::warn!(
                    path = %path.display(),
                    baseline = baseline,
                    "Fine-tuned reranker not found, falling back to baseline"
                );
                Self::Baseline(baseline.to_string())
            },
            None => {
                tracing::info!(baseline = baseline, "No fine-tuned reranker configured");
                Self::Baseline(baseline.to_string())
            },
        }
    }

    /// `finetuned` or `baseline`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Finetuned(_) => "finetuned",
            Self::Baseline(_) => "baseline",
        }
    }

    /// Human-readable model identifier (path or hub name)
    pub fn identifier(&self) -> String {
        match self {
            Self::Finetuned(path) => path.display().to_string(),
            Self::Baseline(name) => name.clone(),
        }
    }

    pub fn is_finetuned(&self) -> bool {
        matches!(self, Self::Finetuned(_))
    }
}
