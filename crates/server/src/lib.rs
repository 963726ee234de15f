//! History docent server
//!
//! HTTP query API over the shared retrieval pipeline, plus the process
//! setup (tracing, Prometheus recorder) shared with the batch subcommands.

pub mod http;
pub mod observability;
pub mod state;

pub use http::create_router;
pub use observability::{init_metrics, init_tracing};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Metrics recorder not installed")]
    MetricsDisabled,
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::MetricsDisabled => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
