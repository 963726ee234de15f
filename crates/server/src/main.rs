//! History docent entry point
//!
//! `serve` runs the HTTP query API; `evaluate` and `qualitative` run batches
//! over the same pipeline construction.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use docent_config::{load_settings, load_settings_file, ModelSelection, Settings};
use docent_eval::{
    temperature_for, EvaluationParams, Evaluator, QualitativeOptions, QualitativeRunner, RunOptions,
};
use docent_llm::{Generator, GeneratorConfig, OllamaGenerator, PromptStyle};
use docent_server::{create_router, init_metrics, init_tracing, AppState};

#[derive(Debug, Parser)]
#[command(name = "docent")]
#[command(about = "Korean history Q&A retrieval service", version)]
struct Cli {
    /// Settings file; defaults to config/default.* plus config/{DOCENT_ENV}.*
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP query API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Score retrieval before and after reranking over a query set
    Evaluate {
        #[command(flatten)]
        batch: BatchArgs,
        /// Metric cutoff
        #[arg(long)]
        top_k: Option<usize>,
        /// Length of the reranked list
        #[arg(long)]
        rerank_k: Option<usize>,
        /// Ignore the fine-tuned reranker
        #[arg(long)]
        baseline: bool,
    },
    /// Generate answers for the qualitative queries of a set
    Qualitative {
        #[command(flatten)]
        batch: BatchArgs,
        /// baseline, cot or citation
        #[arg(long, default_value = "baseline")]
        style: PromptStyle,
        /// Contexts handed to the generator
        #[arg(long)]
        rerank_k: Option<usize>,
        /// Use only the first N qualitative queries
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Query set (YAML or JSON)
    #[arg(long)]
    queries: PathBuf,
    /// Suffix of the run directory name
    #[arg(long)]
    run_name: Option<String>,
    /// Parent directory of the run directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Candidates fetched per source
    #[arg(long)]
    retrieve_k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    init_tracing(&settings.observability);
    tracing::info!("Starting docent v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { host, port } => serve(settings, host, port).await,
        Commands::Evaluate {
            batch,
            top_k,
            rerank_k,
            baseline,
        } => {
            let params = EvaluationParams {
                retrieve_k: batch.retrieve_k.unwrap_or(settings.evaluation.retrieve_k),
                rerank_k: rerank_k.unwrap_or(settings.evaluation.rerank_k),
                top_k: top_k.unwrap_or(settings.evaluation.top_k),
            };
            evaluate(&settings, cli.config, batch, params, baseline).await
        },
        Commands::Qualitative {
            batch,
            style,
            rerank_k,
            limit,
        } => qualitative(&settings, cli.config, batch, style, rerank_k, limit).await,
    }
}

/// Explicit file, or layered `config/` directory; errors are fatal
fn load(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => load_settings_file(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => {
            let env = std::env::var("DOCENT_ENV").ok();
            load_settings(env.as_deref()).context("loading settings from config/")
        },
    }
}

async fn serve(settings: Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let metrics = init_metrics(&settings.observability);
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let state = AppState::from_settings(settings).with_metrics(metrics);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn evaluate(
    settings: &Settings,
    config_path: Option<PathBuf>,
    batch: BatchArgs,
    params: EvaluationParams,
    baseline: bool,
) -> Result<()> {
    let selection = if baseline {
        ModelSelection::Baseline(settings.reranker.baseline_model.clone())
    } else {
        settings.reranker.resolve_model()
    };
    let pipeline = docent_rag::build_pipeline(settings, selection.clone());
    let evaluator = Evaluator::new(pipeline)
        .with_model_version("reranker", selection.identifier())
        .with_model_version("reranker_kind", selection.kind());
    let evaluator = settings.sources.iter().fold(evaluator, |evaluator, source| {
        evaluator.with_model_version(format!("{}_embedding", source.tag), source.embedding_model.clone())
    });

    let report = evaluator
        .run(&RunOptions {
            queries_path: batch.queries,
            config_path,
            output_dir: batch
                .output_dir
                .unwrap_or_else(|| settings.evaluation.output_dir.clone()),
            run_name: batch.run_name,
            params,
        })
        .await?;

    println!("Run directory: {}", report.run_dir.display());
    for (key, value) in &report.aggregate {
        println!("  {}: {:.4}", key, value);
    }
    if !report.failed_query_ids.is_empty() {
        println!("  failed: {}", report.failed_query_ids.join(", "));
    }
    Ok(())
}

async fn qualitative(
    settings: &Settings,
    config_path: Option<PathBuf>,
    batch: BatchArgs,
    style: PromptStyle,
    rerank_k: Option<usize>,
    limit: Option<usize>,
) -> Result<()> {
    let selection = settings.reranker.resolve_model();
    let pipeline = docent_rag::build_pipeline(settings, selection);
    let generator = OllamaGenerator::new(GeneratorConfig::from(&settings.generation))?;
    if !generator.is_available().await {
        tracing::warn!(
            endpoint = %settings.generation.endpoint,
            "Generation service not reachable, answers will record errors"
        );
    }

    let runner = QualitativeRunner::new(pipeline, Arc::new(generator));
    let report = runner
        .run(&QualitativeOptions {
            queries_path: batch.queries,
            config_path,
            output_dir: batch
                .output_dir
                .unwrap_or_else(|| settings.evaluation.qualitative_output_dir.clone()),
            run_name: batch.run_name,
            limit,
            style,
            retrieve_k: batch.retrieve_k.unwrap_or(settings.evaluation.retrieve_k),
            rerank_k: rerank_k.unwrap_or(settings.evaluation.qualitative_rerank_k),
            temperature: temperature_for(style, &settings.generation),
        })
        .await?;

    println!("Run directory: {}", report.run_dir.display());
    println!(
        "  answers: {}, prompt tokens: {}, response tokens: {}",
        report.records.len(),
        report.total_prompt_tokens,
        report.total_response_tokens
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
