//! Evaluation run artifacts
//!
//! One directory per run, named `<UTC %Y%m%d_%H%M%S>[_<run_name>]`, holding
//! `metrics.json`, `retrieval_detail.csv`, `meta.json` and `summary.md`.
//! Directories are never reused.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::evaluator::EvaluationParams;
use crate::EvalError;

/// Run key from its start time and optional name
pub fn run_key(timestamp: DateTime<Utc>, run_name: Option<&str>) -> String {
    let stamp = timestamp.format("%Y%m%d_%H%M%S").to_string();
    match run_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{}_{}", stamp, name),
        None => stamp,
    }
}

/// Create `<base>/<run_key>`; fails if it already exists
pub fn create_run_dir(base: &Path, run_key: &str) -> Result<PathBuf, EvalError> {
    fs::create_dir_all(base)?;
    let dir = base.join(run_key);
    match fs::create_dir(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(EvalError::ArtifactExists(dir.display().to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

/// Metrics of one successful query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerQueryMetrics {
    pub id: String,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
}

/// Run parameters and provenance
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_key: String,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub config_path: Option<String>,
    pub queries_path: String,
    pub model_versions: BTreeMap<String, String>,
    pub parameters: EvaluationParams,
    pub num_queries: usize,
    pub num_succeeded: usize,
    pub failed_query_ids: Vec<String>,
}

/// Everything one evaluation run writes
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub aggregate: BTreeMap<String, f64>,
    pub per_query: Vec<PerQueryMetrics>,
    pub details: Vec<BTreeMap<String, String>>,
    pub meta: RunMeta,
}

#[derive(Serialize)]
struct MetricsFile<'a> {
    aggregate: &'a BTreeMap<String, f64>,
    per_query: &'a [PerQueryMetrics],
}

/// Writes a [`RunArtifact`] into a run directory
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, artifact: &RunArtifact) -> Result<(), EvalError> {
        self.write_metrics(artifact)?;
        self.write_detail_csv(&artifact.details)?;
        self.write_json("meta.json", &artifact.meta)?;
        fs::write(self.dir.join("summary.md"), render_summary(artifact))?;
        tracing::info!(dir = %self.dir.display(), "Wrote run artifacts");
        Ok(())
    }

    fn write_metrics(&self, artifact: &RunArtifact) -> Result<(), EvalError> {
        self.write_json(
            "metrics.json",
            &MetricsFile {
                aggregate: &artifact.aggregate,
                per_query: &artifact.per_query,
            },
        )
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), EvalError> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(name), json)?;
        Ok(())
    }

    /// Header is the sorted union of every row's keys; missing cells are empty
    fn write_detail_csv(&self, rows: &[BTreeMap<String, String>]) -> Result<(), EvalError> {
        let header: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();

        let mut writer = csv::Writer::from_path(self.dir.join("retrieval_detail.csv"))?;
        writer.write_record(&header)?;
        for row in rows {
            writer.write_record(
                header
                    .iter()
                    .map(|key| row.get(*key).map(String::as_str).unwrap_or("")),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Markdown summary: aggregate bullets and a per-query table
pub fn render_summary(artifact: &RunArtifact) -> String {
    let meta = &artifact.meta;
    let versions = meta
        .model_versions
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        "# Batch Evaluation Summary".to_string(),
        String::new(),
        format!("- Run: {}", meta.run_key),
        format!("- Timestamp: {}", meta.timestamp),
        format!("- Model versions: {}", versions),
        format!(
            "- Parameters: retrieve_k={}, rerank_k={}, top_k={}",
            meta.parameters.retrieve_k, meta.parameters.rerank_k, meta.parameters.top_k
        ),
        format!("- Queries: {} ({} succeeded)", meta.num_queries, meta.num_succeeded),
    ];
    if !meta.failed_query_ids.is_empty() {
        lines.push(format!("- Failed: {}", meta.failed_query_ids.join(", ")));
    }

    lines.push(String::new());
    lines.push("## Aggregated Metrics".to_string());
    for (key, value) in &artifact.aggregate {
        lines.push(format!("- **{}**: {:.4}", key, value));
    }

    lines.extend([
        String::new(),
        "## Per-query Metrics".to_string(),
        "| id | retrieval_hit_rate | rerank_hit_rate | retrieval_mrr | rerank_mrr | retrieval_ndcg | rerank_ndcg |"
            .to_string(),
        "| --- | --- | --- | --- | --- | --- | --- |".to_string(),
    ]);
    for record in &artifact.per_query {
        let cell = |key: &str| record.metrics.get(key).copied().unwrap_or(0.0);
        lines.push(format!(
            "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |",
            record.id,
            cell("retrieval_hit_rate"),
            cell("rerank_hit_rate"),
            cell("retrieval_mrr"),
            cell("rerank_mrr"),
            cell("retrieval_ndcg"),
            cell("rerank_ndcg"),
        ));
    }

    lines.join("\n")
}
