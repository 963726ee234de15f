//! Tracing subscriber and Prometheus recorder setup

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use docent_config::ObservabilityConfig;

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        format!("docent={level},docent_rag={level},docent_eval={level},docent_llm={level},docent_config={level},docent_server={level},tower_http=info")
            .into()
    });

    let fmt_layer = if config.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        eprintln!("Tracing already initialised: {}", e);
    }
}

/// Install the Prometheus recorder behind the `metrics` facade
///
/// Returns `None` when disabled or when a recorder is already installed.
pub fn init_metrics(config: &ObservabilityConfig) -> Option<PrometheusHandle> {
    if !config.metrics_enabled {
        tracing::info!("Metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_metrics();
            Some(handle)
        },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        },
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "docent_source_fetch_total",
        "Vector source fetches by source and outcome"
    );
    metrics::describe_histogram!(
        "docent_source_fetch_seconds",
        metrics::Unit::Seconds,
        "Vector source fetch latency"
    );
    metrics::describe_histogram!(
        "docent_rerank_seconds",
        metrics::Unit::Seconds,
        "Cross-encoder batch latency"
    );
    metrics::describe_counter!("docent_queries_total", "Pipeline queries by outcome status");
    metrics::describe_histogram!(
        "docent_query_seconds",
        metrics::Unit::Seconds,
        "End-to-end context assembly latency"
    );
    metrics::describe_counter!("docent_http_requests_total", "HTTP query requests by status");
}
