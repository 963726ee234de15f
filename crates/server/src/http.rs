//! HTTP Endpoints
//!
//! REST API over the retrieval pipeline.

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use docent_rag::{Candidate, ContextOutcome};

use crate::state::AppState;
use crate::ServerError;

const FALLBACK_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/api/query", post(query))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - If cors_enabled is false, returns permissive layer (for dev)
/// - If no configured origin parses, defaults to localhost:3000
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if parsed_origins.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to {}", FALLBACK_ORIGIN);
        return layer.allow_origin(HeaderValue::from_static(FALLBACK_ORIGIN));
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    layer.allow_origin(parsed_origins)
}

/// Query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// Final context size; defaults to `retrieval.final_top_k`
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Per-source fetch sizes keyed by source tag
    #[serde(default)]
    pub per_source_k: HashMap<String, usize>,
}

/// Query response
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    /// `ok`, `no_evidence` or `rerank_unavailable`
    pub status: &'static str,
    /// Prompt-ready context block, empty unless `ok`
    pub context: String,
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

impl QueryResponse {
    fn from_outcome(outcome: ContextOutcome, elapsed_ms: u64) -> Self {
        let status = outcome.status();
        match outcome {
            ContextOutcome::Evidence { candidates, context } => Self {
                status,
                context,
                candidates,
                reason: None,
                elapsed_ms,
            },
            ContextOutcome::NoEvidence => Self {
                status,
                context: String::new(),
                candidates: Vec::new(),
                reason: None,
                elapsed_ms,
            },
            ContextOutcome::RerankUnavailable { reason } => Self {
                status,
                context: String::new(),
                candidates: Vec::new(),
                reason: Some(reason),
                elapsed_ms,
            },
        }
    }
}

/// POST /api/query
///
/// "No answer possible" conditions are 200 responses with a non-`ok` status.
async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ServerError> {
    let start = Instant::now();

    let question = request.question.trim();
    if question.is_empty() {
        metrics::counter!("docent_http_requests_total", "status" => "invalid").increment(1);
        return Err(ServerError::InvalidRequest("question must not be empty".to_string()));
    }

    let tags = state.pipeline.fanout().source_tags();
    if let Some(unknown) = request
        .per_source_k
        .keys()
        .find(|tag| !tags.contains(&tag.as_str()))
    {
        metrics::counter!("docent_http_requests_total", "status" => "invalid").increment(1);
        return Err(ServerError::InvalidRequest(format!("unknown source '{}'", unknown)));
    }

    let outcome = state
        .pipeline
        .answer_context(question, &request.per_source_k, request.top_k)
        .await;

    let response = QueryResponse::from_outcome(outcome, start.elapsed().as_millis() as u64);
    metrics::counter!("docent_http_requests_total", "status" => response.status).increment(1);
    tracing::info!(
        status = response.status,
        candidates = response.candidates.len(),
        elapsed_ms = response.elapsed_ms,
        "Query served"
    );
    Ok(Json(response))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let reranker = state.pipeline.selector().reranker();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": state.pipeline.fanout().source_tags(),
        "reranker": {
            "kind": state.selection.kind(),
            "model": state.selection.identifier(),
            "loaded": reranker.is_loaded(),
        },
    }))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let handle = state.metrics.as_ref().ok_or(ServerError::MetricsDisabled)?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
