//! Retrieval pipeline: fan-out, rerank, select, render

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use docent_config::RetrievalConfig;

use crate::candidate::Candidate;
use crate::fanout::FusionFanOut;
use crate::selector::{render, Selector};
use crate::RagError;

/// What a query produced for the answer generator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextOutcome {
    /// Selected candidates and their rendered context block
    #[serde(rename = "ok")]
    Evidence {
        candidates: Vec<Candidate>,
        context: String,
    },
    /// No source returned anything usable
    NoEvidence,
    /// Candidates existed but the reranker failed
    RerankUnavailable { reason: String },
}

impl ContextOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Evidence { .. } => "ok",
            Self::NoEvidence => "no_evidence",
            Self::RerankUnavailable { .. } => "rerank_unavailable",
        }
    }
}

/// Shared retrieval pipeline
#[derive(Clone)]
pub struct RetrievalPipeline {
    fanout: FusionFanOut,
    selector: Selector,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(fanout: FusionFanOut, selector: Selector, config: RetrievalConfig) -> Self {
        Self {
            fanout,
            selector,
            config,
        }
    }

    pub fn fanout(&self) -> &FusionFanOut {
        &self.fanout
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Fused candidates from every source, before reranking
    ///
    /// Sources keep configuration order and each keeps its closest-first
    /// order. A request timeout yields an empty list.
    pub async fn retrieve(&self, query: &str, per_source_k: &HashMap<String, usize>) -> Vec<Candidate> {
        let gather = self.fanout.gather(query, per_source_k);
        match self.config.request_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), gather).await {
                Ok(candidates) => candidates,
                Err(_) => {
                    tracing::warn!(timeout_ms = ms, "Fan-out timed out, returning no candidates");
                    Vec::new()
                },
            },
            None => gather.await,
        }
    }

    /// Rerank `candidates` and keep `top_k`
    ///
    /// With `canonical_order` set, candidates are put in (source_db, chunk_id)
    /// order before scoring so ties break the same way on every run.
    pub async fn select(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<Candidate>, RagError> {
        if self.config.canonical_order {
            canonical_order(&mut candidates);
        }
        self.selector.select(query, candidates, top_k).await
    }

    /// Full path from question to context
    ///
    /// `top_k` defaults to the configured final size.
    pub async fn answer_context(
        &self,
        query: &str,
        per_source_k: &HashMap<String, usize>,
        top_k: Option<usize>,
    ) -> ContextOutcome {
        let start = Instant::now();
        let top_k = top_k.unwrap_or(self.config.final_top_k);

        let candidates = self.retrieve(query, per_source_k).await;
        if candidates.is_empty() {
            tracing::info!("No candidates from any source");
            metrics::counter!("docent_queries_total", "status" => "no_evidence").increment(1);
            return ContextOutcome::NoEvidence;
        }

        let fused = candidates.len();
        let outcome = match self.select(query, candidates, top_k).await {
            Ok(selected) if selected.is_empty() => ContextOutcome::NoEvidence,
            Ok(selected) => {
                let context = render(&selected);
                ContextOutcome::Evidence {
                    candidates: selected,
                    context,
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Reranking failed");
                ContextOutcome::RerankUnavailable {
                    reason: e.to_string(),
                }
            },
        };

        metrics::counter!("docent_queries_total", "status" => outcome.status()).increment(1);
        metrics::histogram!("docent_query_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            fused,
            top_k,
            status = outcome.status(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Context assembled"
        );
        outcome
    }
}

/// Sort by (source_db, chunk_id) so fused order does not depend on which
/// source answered first
pub fn canonical_order(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.source_db()
            .cmp(b.source_db())
            .then_with(|| a.chunk_id().cmp(b.chunk_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateMetadata;

    #[test]
    fn test_canonical_order() {
        let mut cands = vec![
            Candidate::new("x", CandidateMetadata::new("hj", "h2")),
            Candidate::new("x", CandidateMetadata::new("gemini", "g9")),
            Candidate::new("x", CandidateMetadata::new("hj", "h1")),
        ];
        canonical_order(&mut cands);
        let keys: Vec<_> = cands.iter().map(|c| (c.source_db(), c.chunk_id())).collect();
        assert_eq!(keys, vec![("gemini", "g9"), ("hj", "h1"), ("hj", "h2")]);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(ContextOutcome::NoEvidence.status(), "no_evidence");
        let unavailable = ContextOutcome::RerankUnavailable {
            reason: "oom".to_string(),
        };
        assert_eq!(unavailable.status(), "rerank_unavailable");
        let json = serde_json::to_value(&unavailable).unwrap();
        assert_eq!(json["status"], "rerank_unavailable");
        assert_eq!(json["reason"], "oom");

        let evidence = ContextOutcome::Evidence {
            candidates: Vec::new(),
            context: String::new(),
        };
        assert_eq!(serde_json::to_value(&evidence).unwrap()["status"], evidence.status());
    }
}
