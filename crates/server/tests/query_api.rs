//! Query API over in-memory sources

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use docent_config::{ModelSelection, Settings};
use docent_rag::{
    Candidate, CandidateMetadata, CrossEncoder, FusionFanOut, LexicalScorer, RagError, Reranker,
    RetrievalPipeline, Selector, VectorSource,
};
use docent_server::{create_router, AppState};

struct MemorySource {
    tag: &'static str,
    passages: Vec<(&'static str, &'static str)>,
    fail: bool,
}

#[async_trait]
impl VectorSource for MemorySource {
    fn tag(&self) -> &str {
        self.tag
    }

    fn default_k(&self) -> usize {
        10
    }

    async fn fetch(&self, _query: &str, k: usize) -> Result<Vec<Candidate>, RagError> {
        if self.fail {
            return Err(RagError::SourceUnavailable {
                source_id: self.tag.to_string(),
                reason: "collection missing".to_string(),
            });
        }
        Ok(self
            .passages
            .iter()
            .take(k)
            .map(|(id, text)| Candidate::new(*text, CandidateMetadata::new(self.tag, *id)))
            .collect())
    }
}

fn app(fail: bool) -> axum::Router {
    let gemini: Arc<dyn VectorSource> = Arc::new(MemorySource {
        tag: "gemini",
        passages: vec![
            ("g1", "Wang Geon founded the Goryeo dynasty in 918."),
            ("g2", "The Joseon navy won at Myeongnyang."),
        ],
        fail,
    });
    let hj: Arc<dyn VectorSource> = Arc::new(MemorySource {
        tag: "hj",
        passages: vec![("h1", "Kaesong was the capital of Goryeo.")],
        fail,
    });
    let encoder: Arc<dyn CrossEncoder> = Arc::new(LexicalScorer::new());
    let pipeline = RetrievalPipeline::new(
        FusionFanOut::new(vec![gemini, hj]),
        Selector::new(Arc::new(Reranker::from_encoder(encoder))),
        Settings::default().retrieval,
    );
    let state = AppState::new(
        Settings::default(),
        pipeline,
        ModelSelection::Baseline(LexicalScorer::MODEL_ID.to_string()),
    );
    create_router(state)
}

async fn post(app: axum::Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/query")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_query_returns_ranked_context() {
    let (status, json) = post(
        app(false),
        serde_json::json!({"question": "Who founded the Goryeo dynasty?", "top_k": 2}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    let candidates = json["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0]["metadata"]["chunk_id"], "g1");
    assert!(json["context"].as_str().unwrap().starts_with("[1] (gemini) g1 | score="));
}

#[tokio::test]
async fn test_per_source_k_limits_fetch() {
    let (status, json) = post(
        app(false),
        serde_json::json!({
            "question": "Goryeo",
            "top_k": 10,
            "per_source_k": {"gemini": 1, "hj": 0}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["candidates"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_all_sources_down_is_no_evidence() {
    let (status, json) = post(app(true), serde_json::json!({"question": "Goryeo"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "no_evidence");
    assert_eq!(json["context"], "");
    assert!(json["candidates"].as_array().unwrap().is_empty());
}
