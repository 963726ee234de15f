//! Vector sources
//!
//! A source pairs one embedding model with one k-NN collection and tags every
//! candidate it returns with its `source_db`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::candidate::{Candidate, CandidateMetadata};
use crate::embeddings::Embedder;
use crate::shared::SharedResource;
use crate::vector_store::{KnnCollection, KnnResponse};
use crate::RagError;

/// One retrievable corpus
#[async_trait]
pub trait VectorSource: Send + Sync {
    /// Tag written into `source_db`
    fn tag(&self) -> &str;

    /// Fetch size used when the caller gives none
    fn default_k(&self) -> usize;

    /// Up to `k` candidates, closest first
    ///
    /// Failures of the model or collection surface as
    /// [`RagError::SourceUnavailable`].
    async fn fetch(&self, query: &str, k: usize) -> Result<Vec<Candidate>, RagError>;
}

/// Source backed by an embedder and a collection, both shared and lazy
pub struct EmbeddedSource {
    tag: String,
    default_k: usize,
    timeout: Option<Duration>,
    embedder: Arc<SharedResource<dyn Embedder>>,
    collection: Arc<SharedResource<dyn KnnCollection>>,
}

impl EmbeddedSource {
    pub fn new(
        tag: impl Into<String>,
        default_k: usize,
        embedder: Arc<SharedResource<dyn Embedder>>,
        collection: Arc<SharedResource<dyn KnnCollection>>,
    ) -> Self {
        Self {
            tag: tag.into(),
            default_k,
            timeout: None,
            embedder,
            collection,
        }
    }

    /// Bound one fetch; exceeding it counts as a source failure
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn unavailable(&self, reason: impl ToString) -> RagError {
        RagError::SourceUnavailable {
            source_id: self.tag.clone(),
            reason: reason.to_string(),
        }
    }

    async fn fetch_inner(&self, query: &str, k: usize) -> Result<Vec<Candidate>, RagError> {
        let embedder = self.embedder.get().await.map_err(|e| self.unavailable(e))?;
        let collection = self.collection.get().await.map_err(|e| self.unavailable(e))?;

        let embedding = embedder
            .embed_query(query)
            .await
            .map_err(|e| self.unavailable(e))?;
        let response = collection
            .query(&embedding, k)
            .await
            .map_err(|e| self.unavailable(e))?;

        Ok(candidates_from_response(&self.tag, response))
    }
}

#[async_trait]
impl VectorSource for EmbeddedSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn default_k(&self) -> usize {
        self.default_k
    }

    async fn fetch(&self, query: &str, k: usize) -> Result<Vec<Candidate>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetch_inner(query, k))
                .await
                .map_err(|_| self.unavailable(format!("timed out after {} ms", limit.as_millis())))?,
            None => self.fetch_inner(query, k).await,
        }
    }
}

/// Turn a raw k-NN answer into tagged candidates
///
/// Ragged arrays are tolerated: missing metadata becomes empty, missing
/// distances stay unset. Entries without text are dropped. `source_db` and
/// `chunk_id` already present in metadata are kept; otherwise `source_db` is
/// the tag and `chunk_id` falls back to the point id, then `{tag}_{index}`.
pub fn candidates_from_response(tag: &str, response: KnnResponse) -> Vec<Candidate> {
    let KnnResponse {
        ids,
        documents,
        metadatas,
        distances,
    } = response;
    let mut metadatas = metadatas.into_iter();

    let mut candidates = Vec::with_capacity(documents.len());
    for (idx, document) in documents.into_iter().enumerate() {
        let mut extra = metadatas.next().flatten().unwrap_or_default();

        let content = match document {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                tracing::debug!(source = tag, index = idx, "Skipping entry without text");
                continue;
            },
        };

        let source_db = match extra.remove("source_db") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => tag.to_string(),
        };
        let chunk_id = match extra.remove("chunk_id") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => ids
                .get(idx)
                .filter(|id| !id.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("{}_{}", tag, idx)),
        };

        let mut metadata = CandidateMetadata::new(source_db, chunk_id);
        metadata.extra = extra.into_iter().collect();

        let mut candidate = Candidate::new(content, metadata);
        if let Some(&distance) = distances.get(idx) {
            candidate = candidate.with_distance(distance);
        }
        candidates.push(candidate);
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    struct ThreeHits {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KnnCollection for ThreeHits {
        async fn query(&self, _embedding: &[f32], n: usize) -> Result<KnnResponse, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = KnnResponse::default();
            for i in 0..n.min(3) {
                response.ids.push(format!("p{}", i));
                response.documents.push(Some(format!("passage {}", i)));
                response.metadatas.push(None);
                response.distances.push(i as f32 * 0.1);
            }
            Ok(response)
        }

        fn name(&self) -> &str {
            "three"
        }
    }

    fn source(collection: Arc<SharedResource<dyn KnnCollection>>) -> EmbeddedSource {
        let embedder: Arc<SharedResource<dyn Embedder>> = Arc::new(SharedResource::ready(
            "embedder",
            Arc::new(FixedEmbedder) as Arc<dyn Embedder>,
        ));
        EmbeddedSource::new("gemini", 20, embedder, collection)
    }

    #[test]
    fn test_ragged_response_is_tolerated() {
        let mut meta = Map::new();
        meta.insert("chunk_id".to_string(), json!("goryeo_00001"));
        meta.insert("title".to_string(), json!("Goryeo"));

        let response = KnnResponse {
            ids: vec!["a".to_string(), "b".to_string(), String::new()],
            documents: vec![
                Some("first".to_string()),
                Some("second".to_string()),
                Some("third".to_string()),
            ],
            metadatas: vec![Some(meta)],
            distances: vec![0.1, 0.2],
        };

        let candidates = candidates_from_response("gemini", response);
        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].chunk_id(), "goryeo_00001");
        assert_eq!(candidates[0].metadata.extra["title"], "Goryeo");
        assert_eq!(candidates[0].distance, Some(0.1));

        assert_eq!(candidates[1].chunk_id(), "b");
        assert_eq!(candidates[1].distance, Some(0.2));

        assert_eq!(candidates[2].chunk_id(), "gemini_2");
        assert_eq!(candidates[2].distance, None);

        assert!(candidates.iter().all(|c| c.source_db() == "gemini"));
    }

    #[test]
    fn test_entries_without_text_are_dropped() {
        let response = KnnResponse {
            ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            documents: vec![None, Some("   ".to_string()), Some("kept".to_string())],
            metadatas: vec![None, None, None],
            distances: vec![0.1, 0.2, 0.3],
        };

        let candidates = candidates_from_response("hj", response);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].content, "kept");
        assert_eq!(candidates[0].distance, Some(0.3));
    }

    #[test]
    fn test_existing_source_db_is_kept() {
        let mut meta = Map::new();
        meta.insert("source_db".to_string(), json!("hj"));
        let response = KnnResponse {
            ids: vec!["x".to_string()],
            documents: vec![Some("text".to_string())],
            metadatas: vec![Some(meta)],
            distances: vec![0.0],
        };

        let candidates = candidates_from_response("gemini", response);
        assert_eq!(candidates[0].source_db(), "hj");
    }

    #[tokio::test]
    async fn test_fetch_respects_k() {
        let collection: Arc<SharedResource<dyn KnnCollection>> = Arc::new(SharedResource::ready(
            "collection",
            Arc::new(ThreeHits {
                calls: AtomicUsize::new(0),
            }) as Arc<dyn KnnCollection>,
        ));
        let source = source(collection);

        assert_eq!(source.fetch("query", 2).await.unwrap().len(), 2);
        assert_eq!(source.fetch("query", 10).await.unwrap().len(), 3);
        assert!(source.fetch("query", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_is_source_unavailable() {
        let collection: Arc<SharedResource<dyn KnnCollection>> =
            Arc::new(SharedResource::lazy("collection", || async {
                Err::<Arc<dyn KnnCollection>, _>(RagError::Connection("refused".to_string()))
            }));
        let source = source(collection);

        match source.fetch("query", 5).await {
            Err(RagError::SourceUnavailable { source_id, reason }) => {
                assert_eq!(source_id, "gemini");
                assert!(reason.contains("refused"));
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
