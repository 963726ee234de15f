//! Top-k selection over reranked candidates and context rendering

use std::cmp::Ordering;
use std::sync::Arc;

use docent_config::constants::sources;

use crate::candidate::Candidate;
use crate::reranker::Reranker;
use crate::RagError;

/// Reranks a fused candidate list and keeps the best `top_k`
#[derive(Clone)]
pub struct Selector {
    reranker: Arc<Reranker>,
}

impl Selector {
    pub fn new(reranker: Arc<Reranker>) -> Self {
        Self { reranker }
    }

    pub fn reranker(&self) -> &Arc<Reranker> {
        &self.reranker
    }

    /// Score, sort by descending score and truncate to `top_k`
    ///
    /// Ties keep their input order. Empty input or `top_k == 0` returns an
    /// empty list without touching the model.
    pub async fn select(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<Candidate>, RagError> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let scores = self.reranker.score(query, &candidates).await?;
        Ok(rank_by_scores(candidates, &scores, top_k))
    }
}

/// Attach scores and keep the `top_k` highest, stable on ties
///
/// NaN scores rank last.
pub fn rank_by_scores(candidates: Vec<Candidate>, scores: &[f32], top_k: usize) -> Vec<Candidate> {
    let mut scored: Vec<Candidate> = candidates
        .into_iter()
        .zip(scores.iter().copied())
        .map(|(mut candidate, score)| {
            candidate.rerank_score = Some(score);
            candidate
        })
        .collect();

    scored.sort_by(|a, b| sort_key(b).partial_cmp(&sort_key(a)).unwrap_or(Ordering::Equal));
    scored.truncate(top_k);
    scored
}

fn sort_key(candidate: &Candidate) -> f32 {
    match candidate.rerank_score {
        Some(score) if !score.is_nan() => score,
        _ => f32::NEG_INFINITY,
    }
}

/// Render selected candidates as a numbered context block
///
/// Each entry is a header line `[i] (source_db) chunk_id | score=0.1234`
/// (score omitted when unset) followed by the passage and a blank line.
/// Indices start at 1 and trailing whitespace is trimmed.
pub fn render(candidates: &[Candidate]) -> String {
    let mut lines = Vec::with_capacity(candidates.len() * 3);
    for (i, candidate) in candidates.iter().enumerate() {
        let idx = i + 1;
        let source_db = if candidate.source_db().is_empty() {
            sources::UNKNOWN
        } else {
            candidate.source_db()
        };
        let chunk_id = if candidate.chunk_id().is_empty() {
            format!("chunk_{}", idx)
        } else {
            candidate.chunk_id().to_string()
        };

        let mut header = format!("[{}] ({}) {}", idx, source_db, chunk_id);
        if let Some(score) = candidate.rerank_score {
            header.push_str(&format!(" | score={:.4}", score));
        }

        lines.push(header);
        lines.push(candidate.content.clone());
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}
