//! Qualitative batches: generate answers over selected context
//!
//! Artifacts per run: `answers/<id>.md`, `meta.json`, `summary.md`.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use docent_config::GenerationConfig;
use docent_llm::{build_prompt, Generator, PromptStyle};
use docent_rag::{ContextOutcome, RetrievalPipeline};

use crate::artifact::{create_run_dir, run_key};
use crate::queries::{load_queries, QuerySpec};
use crate::EvalError;

const SUMMARY_ANSWER_CHARS: usize = 60;

/// Inputs of one qualitative batch
#[derive(Debug, Clone)]
pub struct QualitativeOptions {
    pub queries_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub run_name: Option<String>,
    /// Use only the first `limit` qualitative queries
    pub limit: Option<usize>,
    pub style: PromptStyle,
    pub retrieve_k: usize,
    /// Contexts handed to the generator
    pub rerank_k: usize,
    pub temperature: f32,
}

/// Sampling temperature configured for a prompt style
pub fn temperature_for(style: PromptStyle, config: &GenerationConfig) -> f32 {
    match style {
        PromptStyle::Cot => config.cot_temperature,
        PromptStyle::Baseline | PromptStyle::Citation => config.temperature,
    }
}

/// One answered (or unanswerable) query
#[derive(Debug, Clone, Serialize)]
pub struct QualitativeRecord {
    pub id: String,
    pub question: String,
    /// Pipeline outcome: `ok`, `no_evidence` or `rerank_unavailable`
    pub status: String,
    pub contexts: Vec<String>,
    pub answer: String,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub error: Option<String>,
}

/// Outcome of a finished batch
#[derive(Debug, Clone)]
pub struct QualitativeReport {
    pub run_dir: PathBuf,
    pub records: Vec<QualitativeRecord>,
    pub total_prompt_tokens: usize,
    pub total_response_tokens: usize,
}

#[derive(Serialize)]
struct QualitativeMeta<'a> {
    run_key: &'a str,
    timestamp: String,
    config_path: Option<String>,
    queries_path: String,
    num_queries: usize,
    llm_model: &'a str,
    prompt_style: &'a str,
    parameters: QualitativeParameters,
    usage: Usage,
}

#[derive(Serialize)]
struct QualitativeParameters {
    retrieve_k: usize,
    rerank_k: usize,
    temperature: f32,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct Usage {
    total_prompt_tokens: usize,
    total_response_tokens: usize,
}

/// Runs the generation batch over the shared pipeline
pub struct QualitativeRunner {
    pipeline: RetrievalPipeline,
    generator: Arc<dyn Generator>,
}

impl QualitativeRunner {
    pub fn new(pipeline: RetrievalPipeline, generator: Arc<dyn Generator>) -> Self {
        Self { pipeline, generator }
    }

    pub async fn run(&self, options: &QualitativeOptions) -> Result<QualitativeReport, EvalError> {
        let started = Utc::now();
        let queries = select_queries(load_queries(&options.queries_path)?, options.limit)?;
        let key = run_key(started, options.run_name.as_deref());
        let run_dir = create_run_dir(&options.output_dir, &key)?;
        let answers_dir = run_dir.join("answers");
        fs::create_dir(&answers_dir)?;

        tracing::info!(
            queries = queries.len(),
            style = %options.style,
            model = self.generator.model_name(),
            run_dir = %run_dir.display(),
            "Qualitative batch starting"
        );

        let mut records = Vec::with_capacity(queries.len());
        let mut stems = HashSet::new();
        for query in &queries {
            let record = self.answer(query, options).await;
            let stem = unique_file_stem(&record.id, &mut stems);
            fs::write(answers_dir.join(format!("{}.md", stem)), render_answer(&record))?;
            records.push(record);
        }

        let total_prompt_tokens: usize = records.iter().map(|r| r.prompt_tokens).sum();
        let total_response_tokens: usize = records.iter().map(|r| r.response_tokens).sum();

        let meta = QualitativeMeta {
            run_key: &key,
            timestamp: started.to_rfc3339(),
            config_path: options.config_path.as_ref().map(|p| p.display().to_string()),
            queries_path: options.queries_path.display().to_string(),
            num_queries: records.len(),
            llm_model: self.generator.model_name(),
            prompt_style: options.style.as_str(),
            parameters: QualitativeParameters {
                retrieve_k: options.retrieve_k,
                rerank_k: options.rerank_k,
                temperature: options.temperature,
                limit: options.limit,
            },
            usage: Usage {
                total_prompt_tokens,
                total_response_tokens,
            },
        };
        fs::write(run_dir.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;
        fs::write(run_dir.join("summary.md"), render_summary(&meta, &records))?;

        tracing::info!(
            run_dir = %run_dir.display(),
            failed = records.iter().filter(|r| r.error.is_some()).count(),
            total_prompt_tokens,
            total_response_tokens,
            "Qualitative batch finished"
        );

        Ok(QualitativeReport {
            run_dir,
            records,
            total_prompt_tokens,
            total_response_tokens,
        })
    }

    async fn answer(&self, query: &QuerySpec, options: &QualitativeOptions) -> QualitativeRecord {
        let per_source_k: HashMap<String, usize> = self
            .pipeline
            .fanout()
            .source_tags()
            .into_iter()
            .map(|tag| (tag.to_string(), options.retrieve_k))
            .collect();

        let outcome = self
            .pipeline
            .answer_context(&query.question, &per_source_k, Some(options.rerank_k))
            .await;

        let mut record = QualitativeRecord {
            id: query.id.clone(),
            question: query.question.clone(),
            status: outcome.status().to_string(),
            contexts: Vec::new(),
            answer: String::new(),
            prompt_tokens: 0,
            response_tokens: 0,
            error: None,
        };

        let (candidates, context) = match outcome {
            ContextOutcome::Evidence { candidates, context } => (candidates, context),
            ContextOutcome::NoEvidence => {
                record.answer = "답변할 수 있는 근거 자료를 찾지 못했습니다.".to_string();
                return record;
            },
            ContextOutcome::RerankUnavailable { reason } => {
                record.answer = "재정렬 모델을 사용할 수 없어 답변을 생성하지 못했습니다.".to_string();
                record.error = Some(reason);
                return record;
            },
        };
        record.contexts = candidates.into_iter().map(|c| c.content).collect();

        let prompt = build_prompt(&query.question, &context, options.style);
        match self.generator.generate(&prompt, Some(options.temperature)).await {
            Ok(generation) => {
                record.answer = generation.text;
                record.prompt_tokens = generation.prompt_tokens;
                record.response_tokens = generation.response_tokens;
            },
            Err(e) => {
                tracing::warn!(query_id = %query.id, error = %e, "Generation failed");
                metrics::counter!("docent_generation_failures_total").increment(1);
                record.answer = format!("[ERROR] {}", e);
                record.error = Some(e.to_string());
            },
        }
        record
    }
}

/// Keep qualitative queries, then apply `limit`
fn select_queries(queries: Vec<QuerySpec>, limit: Option<usize>) -> Result<Vec<QuerySpec>, EvalError> {
    let selected: Vec<_> = queries
        .into_iter()
        .filter(|q| q.qualitative)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if selected.is_empty() {
        return Err(EvalError::QuerySet("no qualitative queries selected".to_string()));
    }
    Ok(selected)
}

fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "query".to_string()
    } else {
        stem
    }
}

/// Sanitized stem not yet used in this run; clashes get `_2`, `_3`, ...
fn unique_file_stem(id: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize_file_stem(id);
    let mut stem = base.clone();
    let mut n = 1;
    while !used.insert(stem.clone()) {
        n += 1;
        stem = format!("{}_{}", base, n);
    }
    stem
}

fn render_answer(record: &QualitativeRecord) -> String {
    let mut lines = vec![
        format!("# {}", record.id),
        String::new(),
        format!("**질문**: {}", record.question),
        String::new(),
        "## 답변".to_string(),
        String::new(),
        record.answer.clone(),
        String::new(),
        "## 참고 문서".to_string(),
        String::new(),
    ];
    for (idx, context) in record.contexts.iter().enumerate() {
        lines.push(format!("- 문서 {}", idx + 1));
        lines.push(String::new());
        lines.push("```text".to_string());
        lines.push(context.clone());
        lines.push("```".to_string());
        lines.push(String::new());
    }
    lines.join("\n")
}

fn truncate_for_table(text: &str) -> String {
    let flat = text.replace(['\r', '\n'], " ").replace('|', "\\|");
    if flat.chars().count() > SUMMARY_ANSWER_CHARS {
        let head: String = flat.chars().take(SUMMARY_ANSWER_CHARS).collect();
        format!("{}...", head)
    } else {
        flat
    }
}

fn render_summary(meta: &QualitativeMeta<'_>, records: &[QualitativeRecord]) -> String {
    let mut lines = vec![
        "# RAG Qualitative Batch Summary".to_string(),
        String::new(),
        format!("- Run: {}", meta.run_key),
        format!("- Timestamp: {}", meta.timestamp),
        format!("- Queries: {}", meta.num_queries),
        format!("- Prompt style: {}", meta.prompt_style),
        format!("- LLM model: {}", meta.llm_model),
        format!(
            "- Tokens: prompt={}, response={}",
            meta.usage.total_prompt_tokens, meta.usage.total_response_tokens
        ),
        String::new(),
        "| id | question | truncated_answer |".to_string(),
        "| --- | --- | --- |".to_string(),
    ];
    for record in records {
        lines.push(format!(
            "| {} | {} | {} |",
            record.id,
            truncate_for_table(&record.question),
            truncate_for_table(&record.answer)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, qualitative: bool) -> QuerySpec {
        QuerySpec {
            id: id.to_string(),
            question: format!("question {}", id),
            ground_truth_context_id: "c1".to_string(),
            qualitative,
        }
    }

    #[test]
    fn test_select_queries_filters_and_limits() {
        let queries = vec![spec("q1", true), spec("q2", false), spec("q3", true), spec("q4", true)];
        let selected = select_queries(queries, Some(2)).unwrap();
        let ids: Vec<_> = selected.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q3"]);
    }

    #[test]
    fn test_no_qualitative_queries_is_an_error() {
        assert!(matches!(
            select_queries(vec![spec("q1", false)], None),
            Err(EvalError::QuerySet(_))
        ));
        assert!(select_queries(vec![spec("q1", true)], Some(0)).is_err());
    }

    #[test]
    fn test_truncate_for_table() {
        let long = "가".repeat(70);
        let truncated = truncate_for_table(&long);
        assert_eq!(truncated.chars().count(), SUMMARY_ANSWER_CHARS + 3);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_for_table("왕건\n고려"), "왕건 고려");
        assert_eq!(truncate_for_table("a|b"), "a\\|b");
    }

    #[test]
    fn test_clashing_ids_get_distinct_stems() {
        let mut used = HashSet::new();
        assert_eq!(unique_file_stem("q/1", &mut used), "q_1");
        assert_eq!(unique_file_stem("q_1", &mut used), "q_1_2");
        assert_eq!(unique_file_stem("q?1", &mut used), "q_1_3");
        assert_eq!(unique_file_stem("q2", &mut used), "q2");
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("q1"), "q1");
        assert_eq!(sanitize_file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_file_stem(""), "query");
    }

    #[test]
    fn test_temperature_for_style() {
        let config = GenerationConfig {
            temperature: 0.0,
            cot_temperature: 0.3,
            ..Default::default()
        };
        assert_eq!(temperature_for(PromptStyle::Cot, &config), 0.3);
        assert_eq!(temperature_for(PromptStyle::Citation, &config), 0.0);
    }

    #[test]
    fn test_render_answer_lists_contexts() {
        let record = QualitativeRecord {
            id: "q1".to_string(),
            question: "고려를 세운 사람은?".to_string(),
            status: "ok".to_string(),
            contexts: vec!["왕건이 고려를 세웠다.".to_string()],
            answer: "왕건".to_string(),
            prompt_tokens: 10,
            response_tokens: 2,
            error: None,
        };
        let md = render_answer(&record);
        assert!(md.starts_with("# q1\n"));
        assert!(md.contains("**질문**: 고려를 세운 사람은?"));
        assert!(md.contains("- 문서 1\n\n```text\n왕건이 고려를 세웠다.\n```"));
    }
}
