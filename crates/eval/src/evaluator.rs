//! Quantitative evaluation runs
//!
//! A run loads a query set, retrieves and reranks every query through the
//! shared pipeline, scores both orderings against the ground-truth chunk and
//! writes one artifact directory. Per-query failures are recorded and skipped;
//! query-set errors abort before any directory is created.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use docent_config::EvaluationConfig;
use docent_rag::{Candidate, RetrievalPipeline};

use crate::artifact::{create_run_dir, run_key, ArtifactWriter, PerQueryMetrics, RunArtifact, RunMeta};
use crate::metrics::{aggregate, calculate_metrics};
use crate::queries::{load_queries, QuerySpec};
use crate::EvalError;

/// Lifecycle of one evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    LoadedQueries,
    PerQuery,
    Aggregated,
    Written,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::LoadedQueries => "loaded_queries",
            Self::PerQuery => "per_query",
            Self::Aggregated => "aggregated",
            Self::Written => "written",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Retrieval depths and metric cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationParams {
    /// Candidates fetched per source
    pub retrieve_k: usize,
    /// Length of the reranked list
    pub rerank_k: usize,
    /// Metric cutoff
    pub top_k: usize,
}

impl From<&EvaluationConfig> for EvaluationParams {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            retrieve_k: config.retrieve_k,
            rerank_k: config.rerank_k,
            top_k: config.top_k,
        }
    }
}

/// Inputs of one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub queries_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub run_name: Option<String>,
    pub params: EvaluationParams,
}

/// Result of evaluating one query
#[derive(Debug, Clone)]
pub struct QueryEvaluation {
    pub id: String,
    pub question: String,
    pub ground_truth_id: String,
    /// Fused order, before reranking
    pub retrieved_ids: Vec<String>,
    /// Reranked order, `rerank_k` long at most
    pub reranked_ids: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    /// `ok`, or `no_evidence` when every source came back empty
    pub status: &'static str,
}

impl QueryEvaluation {
    fn detail_row(&self, params: &EvaluationParams) -> BTreeMap<String, String> {
        let mut row = base_row(&self.id, &self.question, &self.ground_truth_id, params);
        row.insert("retrieved_ids".into(), join_ids(&self.retrieved_ids, params.top_k));
        row.insert("reranked_ids".into(), join_ids(&self.reranked_ids, params.top_k));
        row.insert("status".into(), self.status.to_string());
        row
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub aggregate: BTreeMap<String, f64>,
    pub num_queries: usize,
    pub num_succeeded: usize,
    pub failed_query_ids: Vec<String>,
}

/// Batch evaluator over a shared retrieval pipeline
pub struct Evaluator {
    pipeline: RetrievalPipeline,
    model_versions: BTreeMap<String, String>,
}

impl Evaluator {
    pub fn new(pipeline: RetrievalPipeline) -> Self {
        Self {
            pipeline,
            model_versions: BTreeMap::new(),
        }
    }

    /// Record a model identifier in `meta.json`
    pub fn with_model_version(mut self, component: impl Into<String>, version: impl Into<String>) -> Self {
        self.model_versions.insert(component.into(), version.into());
        self
    }

    pub fn model_versions(&self) -> &BTreeMap<String, String> {
        &self.model_versions
    }

    /// Retrieve, rerank and score a single query
    pub async fn evaluate_query(
        &self,
        query: &QuerySpec,
        params: &EvaluationParams,
    ) -> Result<QueryEvaluation, EvalError> {
        let per_source_k: HashMap<String, usize> = self
            .pipeline
            .fanout()
            .source_tags()
            .into_iter()
            .map(|tag| (tag.to_string(), params.retrieve_k))
            .collect();

        let fused = self.pipeline.retrieve(&query.question, &per_source_k).await;
        let retrieved_ids = chunk_ids(&fused);

        let status = if fused.is_empty() {
            tracing::warn!(query_id = %query.id, "No candidates from any source");
            "no_evidence"
        } else {
            "ok"
        };

        let reranked = self
            .pipeline
            .select(&query.question, fused, params.rerank_k)
            .await
            .map_err(|e| EvalError::PerQuery {
                id: query.id.clone(),
                reason: e.to_string(),
            })?;
        let reranked_ids = chunk_ids(&reranked);

        let gt = &query.ground_truth_context_id;
        let mut metrics = BTreeMap::new();
        calculate_metrics(&retrieved_ids, gt, params.top_k).insert_prefixed("retrieval", &mut metrics);
        calculate_metrics(&reranked_ids, gt, params.top_k).insert_prefixed("rerank", &mut metrics);

        Ok(QueryEvaluation {
            id: query.id.clone(),
            question: query.question.clone(),
            ground_truth_id: gt.clone(),
            retrieved_ids,
            reranked_ids,
            metrics,
            status,
        })
    }

    /// Run a whole query set and write its artifact directory
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, EvalError> {
        let started = Utc::now();
        let clock = Instant::now();
        let mut state = RunState::Init;
        tracing::info!(state = %state, queries = %options.queries_path.display(), "Evaluation run starting");

        let queries = load_queries(&options.queries_path)?;
        let key = run_key(started, options.run_name.as_deref());
        let run_dir = create_run_dir(&options.output_dir, &key)?;
        transition(&mut state, RunState::LoadedQueries);

        transition(&mut state, RunState::PerQuery);
        let params = options.params;
        let mut per_query = Vec::new();
        let mut details = Vec::with_capacity(queries.len());
        let mut failed_query_ids = Vec::new();

        for query in &queries {
            match self.evaluate_query(query, &params).await {
                Ok(evaluation) => {
                    tracing::debug!(
                        query_id = %evaluation.id,
                        status = evaluation.status,
                        metrics = ?evaluation.metrics,
                        "Query evaluated"
                    );
                    metrics::counter!("docent_eval_queries_total", "outcome" => "ok").increment(1);
                    details.push(evaluation.detail_row(&params));
                    per_query.push(PerQueryMetrics {
                        id: evaluation.id,
                        metrics: evaluation.metrics,
                    });
                },
                Err(e) => {
                    tracing::warn!(query_id = %query.id, error = %e, "Query failed, excluded from aggregate");
                    metrics::counter!("docent_eval_queries_total", "outcome" => "failed").increment(1);
                    let mut row = base_row(&query.id, &query.question, &query.ground_truth_context_id, &params);
                    row.insert("status".into(), "failed".into());
                    row.insert("error".into(), e.to_string());
                    details.push(row);
                    failed_query_ids.push(query.id.clone());
                },
            }
        }

        let records: Vec<_> = per_query.iter().map(|r| r.metrics.clone()).collect();
        let aggregate = aggregate(&records);
        transition(&mut state, RunState::Aggregated);

        let artifact = RunArtifact {
            aggregate: aggregate.clone(),
            per_query,
            details,
            meta: RunMeta {
                run_key: key,
                timestamp: started.to_rfc3339(),
                config_path: options.config_path.as_ref().map(|p| p.display().to_string()),
                queries_path: options.queries_path.display().to_string(),
                model_versions: self.model_versions.clone(),
                parameters: params,
                num_queries: queries.len(),
                num_succeeded: queries.len() - failed_query_ids.len(),
                failed_query_ids: failed_query_ids.clone(),
            },
        };
        ArtifactWriter::new(&run_dir).write(&artifact)?;
        transition(&mut state, RunState::Written);

        transition(&mut state, RunState::Done);
        tracing::info!(
            run_dir = %run_dir.display(),
            queries = queries.len(),
            failed = failed_query_ids.len(),
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Evaluation run finished"
        );

        Ok(RunReport {
            run_dir,
            aggregate,
            num_queries: queries.len(),
            num_succeeded: artifact.meta.num_succeeded,
            failed_query_ids,
        })
    }
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::info!(from = %state, to = %next, "Evaluation state");
    *state = next;
}

fn chunk_ids(candidates: &[Candidate]) -> Vec<String> {
    candidates.iter().map(|c| c.chunk_id().to_string()).collect()
}

fn join_ids(ids: &[String], top_k: usize) -> String {
    ids.iter()
        .take(top_k)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("|")
}

fn base_row(id: &str, question: &str, ground_truth: &str, params: &EvaluationParams) -> BTreeMap<String, String> {
    let mut row = BTreeMap::new();
    row.insert("id".to_string(), id.to_string());
    row.insert("question".to_string(), question.to_string());
    row.insert("ground_truth_id".to_string(), ground_truth.to_string());
    row.insert("retrieve_k".to_string(), params.retrieve_k.to_string());
    row.insert("rerank_k".to_string(), params.rerank_k.to_string());
    row
}
