//! Application State
//!
//! Shared state across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use docent_config::{ModelSelection, Settings};
use docent_rag::RetrievalPipeline;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Shared pipeline; models and collections load on first request
    pub pipeline: RetrievalPipeline,
    /// Reranker choice resolved at startup
    pub selection: ModelSelection,
    /// Renders `/metrics`; `None` when the recorder is not installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(settings: Settings, pipeline: RetrievalPipeline, selection: ModelSelection) -> Self {
        Self {
            settings: Arc::new(settings),
            pipeline,
            selection,
            metrics: None,
        }
    }

    /// Build the pipeline from settings
    pub fn from_settings(settings: Settings) -> Self {
        let selection = settings.reranker.resolve_model();
        let pipeline = docent_rag::build_pipeline(&settings, selection.clone());
        Self::new(settings, pipeline, selection)
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}
