//! Fusion fan-out across vector sources
//!
//! Every source is queried concurrently, one task per source. A failing
//! source is logged and contributes nothing; the rest still return.
//! Successful results are concatenated in configuration order, each keeping
//! its own closest-first order.

use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::candidate::Candidate;
use crate::source::VectorSource;
use crate::RagError;

/// Result of querying one source
#[derive(Debug)]
pub struct SourceOutcome {
    pub tag: String,
    pub result: Result<Vec<Candidate>, RagError>,
    pub elapsed: Duration,
}

/// Concurrent fan-out over a fixed set of sources
#[derive(Clone)]
pub struct FusionFanOut {
    sources: Vec<Arc<dyn VectorSource>>,
}

impl FusionFanOut {
    pub fn new(sources: Vec<Arc<dyn VectorSource>>) -> Self {
        Self { sources }
    }

    pub fn source_tags(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.tag()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Query every source and report each outcome, in configuration order
    ///
    /// `per_source_k` overrides a source's default fetch size by tag. The
    /// per-source tasks belong to this call: dropping the returned future
    /// aborts any fetch still running.
    pub async fn gather_outcomes(
        &self,
        query: &str,
        per_source_k: &HashMap<String, usize>,
    ) -> Vec<SourceOutcome> {
        let mut tasks = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let query = query.to_string();
            let k = per_source_k
                .get(source.tag())
                .copied()
                .unwrap_or_else(|| source.default_k());
            tasks.spawn(async move {
                let start = Instant::now();
                let result = source.fetch(&query, k).await;
                (idx, result, start.elapsed())
            });
        }

        let mut slots: Vec<Option<(Result<Vec<Candidate>, RagError>, Duration)>> =
            self.sources.iter().map(|_| None).collect();
        let mut task_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result, elapsed)) => slots[idx] = Some((result, elapsed)),
                Err(e) => {
                    tracing::error!(error = %e, "Source task failed");
                    task_error = Some(e.to_string());
                },
            }
        }

        self.sources
            .iter()
            .zip(slots)
            .map(|(source, slot)| {
                let tag = source.tag().to_string();
                let (result, elapsed) = slot.unwrap_or_else(|| {
                    (
                        Err(RagError::SourceUnavailable {
                            source_id: tag.clone(),
                            reason: format!(
                                "task failed: {}",
                                task_error.as_deref().unwrap_or("aborted")
                            ),
                        }),
                        Duration::ZERO,
                    )
                });
                SourceOutcome {
                    tag,
                    result,
                    elapsed,
                }
            })
            .collect()
    }

    /// Fused candidate list; failed sources are logged and skipped
    pub async fn gather(
        &self,
        query: &str,
        per_source_k: &HashMap<String, usize>,
    ) -> Vec<Candidate> {
        let outcomes = self.gather_outcomes(query, per_source_k).await;

        let mut fused = Vec::new();
        for outcome in outcomes {
            histogram!("docent_source_fetch_seconds", "source" => outcome.tag.clone())
                .record(outcome.elapsed.as_secs_f64());

            match outcome.result {
                Ok(candidates) => {
                    counter!(
                        "docent_source_fetch_total",
                        "source" => outcome.tag.clone(),
                        "outcome" => "ok"
                    )
                    .increment(1);
                    tracing::debug!(
                        source = %outcome.tag,
                        candidates = candidates.len(),
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Source returned candidates"
                    );
                    fused.extend(candidates);
                },
                Err(e) => {
                    counter!(
                        "docent_source_fetch_total",
                        "source" => outcome.tag.clone(),
                        "outcome" => "error"
                    )
                    .increment(1);
                    tracing::warn!(
                        source = %outcome.tag,
                        error = %e,
                        "Source failed, excluding it from fused candidates"
                    );
                },
            }
        }

        tracing::debug!(fused = fused.len(), "Fan-out complete");
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        tag: String,
        hits: usize,
        delay: Duration,
        fail: bool,
    }

    impl StaticSource {
        fn ok(tag: &str, hits: usize) -> Arc<dyn VectorSource> {
            Arc::new(Self {
                tag: tag.to_string(),
                hits,
                delay: Duration::ZERO,
                fail: false,
            })
        }

        fn failing(tag: &str) -> Arc<dyn VectorSource> {
            Arc::new(Self {
                tag: tag.to_string(),
                hits: 0,
                delay: Duration::ZERO,
                fail: true,
            })
        }
    }

    #[async_trait]
    impl VectorSource for StaticSource {
        fn tag(&self) -> &str {
            &self.tag
        }

        fn default_k(&self) -> usize {
            20
        }

        async fn fetch(&self, _query: &str, k: usize) -> Result<Vec<Candidate>, RagError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(RagError::SourceUnavailable {
                    source_id: self.tag.clone(),
                    reason: "collection missing".to_string(),
                });
            }
            Ok((0..self.hits.min(k))
                .map(|i| {
                    Candidate::new(
                        format!("{} passage {}", self.tag, i),
                        CandidateMetadata::new(&self.tag, format!("{}_{}", self.tag, i)),
                    )
                    .with_distance(i as f32)
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_failed_source_is_isolated() {
        let fanout = FusionFanOut::new(vec![
            StaticSource::failing("gemini"),
            StaticSource::ok("hj", 3),
        ]);

        let fused = fanout.gather("q", &HashMap::new()).await;
        assert_eq!(fused.len(), 3);
        assert!(fused.iter().all(|c| c.source_db() == "hj"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_empty() {
        let fanout = FusionFanOut::new(vec![
            StaticSource::failing("gemini"),
            StaticSource::failing("hj"),
        ]);

        assert!(fanout.gather("q", &HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_configuration_order_is_kept() {
        let slow_first: Arc<dyn VectorSource> = Arc::new(StaticSource {
            tag: "gemini".to_string(),
            hits: 2,
            delay: Duration::from_millis(30),
            fail: false,
        });
        let fanout = FusionFanOut::new(vec![slow_first, StaticSource::ok("hj", 2)]);

        let fused = fanout.gather("q", &HashMap::new()).await;
        let ids: Vec<_> = fused.iter().map(|c| c.chunk_id()).collect();
        assert_eq!(ids, vec!["gemini_0", "gemini_1", "hj_0", "hj_1"]);
    }

    #[tokio::test]
    async fn test_per_source_k_override() {
        let fanout = FusionFanOut::new(vec![
            StaticSource::ok("gemini", 10),
            StaticSource::ok("hj", 10),
        ]);
        let mut k = HashMap::new();
        k.insert("gemini".to_string(), 2);

        let outcomes = fanout.gather_outcomes("q", &k).await;
        assert_eq!(outcomes[0].tag, "gemini");
        assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 2);
        assert_eq!(outcomes[1].result.as_ref().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_outcomes_report_failures() {
        let fanout = FusionFanOut::new(vec![
            StaticSource::ok("gemini", 1),
            StaticSource::failing("hj"),
        ]);

        let outcomes = fanout.gather_outcomes("q", &HashMap::new()).await;
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(RagError::SourceUnavailable { ref source_id, .. }) if source_id == "hj"
        ));
    }

    struct HangingSource {
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VectorSource for HangingSource {
        fn tag(&self) -> &str {
            "hj"
        }

        fn default_k(&self) -> usize {
            5
        }

        async fn fetch(&self, _query: &str, _k: usize) -> Result<Vec<Candidate>, RagError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_dropped_gather_aborts_pending_fetches() {
        let completed = Arc::new(AtomicUsize::new(0));
        let hanging: Arc<dyn VectorSource> = Arc::new(HangingSource {
            completed: Arc::clone(&completed),
        });
        let fanout = FusionFanOut::new(vec![StaticSource::ok("gemini", 1), hanging]);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            fanout.gather("q", &HashMap::new()),
        )
        .await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }
}
