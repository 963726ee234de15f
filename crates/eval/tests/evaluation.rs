//! Evaluation and qualitative runs over in-memory sources

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use docent_config::RetrievalConfig;
use docent_eval::{
    EvalError, EvaluationParams, Evaluator, QualitativeOptions, QualitativeRunner, QuerySpec,
    RunOptions,
};
use docent_llm::{Generation, Generator, LlmError, PromptStyle};
use docent_rag::{
    Candidate, CandidateMetadata, CrossEncoder, FusionFanOut, RagError, Reranker, RetrievalPipeline,
    Selector, VectorSource,
};

struct MemorySource {
    tag: &'static str,
    passages: Vec<(&'static str, &'static str)>,
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
        Ok(self
            .passages
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, (id, text))| {
                Candidate::new(*text, CandidateMetadata::new(self.tag, *id)).with_distance(i as f32)
            })
            .collect())
    }
}

/// Scores each passage by its trailing number; fails on queries containing "boom"
struct TrailingNumber;

impl CrossEncoder for TrailingNumber {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RagError> {
        if pairs.iter().any(|(q, _)| q.contains("boom")) {
            return Err(RagError::Model("out of memory".to_string()));
        }
        Ok(pairs
            .iter()
            .map(|(_, d)| {
                d.split_whitespace()
                    .last()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0)
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        "trailing-number"
    }
}

/// Echoes the question; fails on questions containing "offline"
struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str, _temperature: Option<f32>) -> Result<Generation, LlmError> {
        if prompt.contains("offline") {
            return Err(LlmError::Network("connection refused".to_string()));
        }
        Ok(Generation {
            text: "왕건이 918년에 고려를 세웠습니다.".to_string(),
            prompt_tokens: 100,
            response_tokens: 10,
            total_time_ms: 5,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

fn pipeline() -> RetrievalPipeline {
    let gemini: Arc<dyn VectorSource> = Arc::new(MemorySource {
        tag: "gemini",
        passages: vec![("c3", "Silla unified 0.2"), ("c1", "Wang Geon founded Goryeo 0.9")],
    });
    let hj: Arc<dyn VectorSource> = Arc::new(MemorySource {
        tag: "hj",
        passages: vec![("c7", "Kaesong capital 0.5")],
    });
    RetrievalPipeline::new(
        FusionFanOut::new(vec![gemini, hj]),
        Selector::new(Arc::new(Reranker::from_encoder(Arc::new(TrailingNumber)))),
        RetrievalConfig::default(),
    )
}

fn write_queries(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("queries.yaml");
    fs::write(&path, body).unwrap();
    path
}

fn params() -> EvaluationParams {
    EvaluationParams {
        retrieve_k: 50,
        rerank_k: 10,
        top_k: 3,
    }
}

#[tokio::test]
async fn test_run_scores_before_and_after_rerank() {
    let dir = tempfile::tempdir().unwrap();
    let queries = write_queries(
        dir.path(),
        "queries:\n  - id: q1\n    question: who founded goryeo\n    ground_truth_context_id: c1\n  - id: q2\n    question: unrelated\n    ground_truth_context_id: c9\n",
    );
    let evaluator = Evaluator::new(pipeline()).with_model_version("reranker", "trailing-number");

    let report = evaluator
        .run(&RunOptions {
            queries_path: queries,
            config_path: None,
            output_dir: dir.path().join("runs"),
            run_name: Some("baseline".to_string()),
            params: params(),
        })
        .await
        .unwrap();

    assert_eq!(report.num_queries, 2);
    assert_eq!(report.num_succeeded, 2);
    assert!(report.failed_query_ids.is_empty());
    assert!(report.run_dir.to_string_lossy().ends_with("_baseline"));

    // q1: fused c3,c1,c7 puts c1 second; reranked c1,c7,c3 puts it first. q2 misses.
    assert_eq!(report.aggregate["retrieval_mrr"], 0.25);
    assert_eq!(report.aggregate["rerank_mrr"], 0.5);
    assert_eq!(report.aggregate["rerank_hit_rate"], 0.5);
    assert_eq!(report.aggregate["retrieval_hit_rate"], 0.5);

    for name in ["metrics.json", "retrieval_detail.csv", "meta.json", "summary.md"] {
        assert!(report.run_dir.join(name).is_file(), "missing {}", name);
    }

    let csv = fs::read_to_string(report.run_dir.join("retrieval_detail.csv")).unwrap();
    assert!(csv.contains("c3|c1|c7"));
    assert!(csv.contains("c1|c7|c3"));

    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report.run_dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["model_versions"]["reranker"], "trailing-number");
    assert_eq!(meta["parameters"]["top_k"], 3);
}

#[tokio::test]
async fn test_rerank_failure_excludes_query_from_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let queries = write_queries(
        dir.path(),
        "- id: good\n  question: who founded goryeo\n  ground_truth_context_id: c1\n- id: bad\n  question: boom\n  ground_truth_context_id: c1\n",
    );

    let report = Evaluator::new(pipeline())
        .run(&RunOptions {
            queries_path: queries,
            config_path: None,
            output_dir: dir.path().join("runs"),
            run_name: None,
            params: params(),
        })
        .await
        .unwrap();

    assert_eq!(report.num_succeeded, 1);
    assert_eq!(report.failed_query_ids, vec!["bad".to_string()]);
    assert_eq!(report.aggregate["rerank_mrr"], 1.0);

    let csv = fs::read_to_string(report.run_dir.join("retrieval_detail.csv")).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("error,ground_truth_id,id,"));
    assert!(csv.lines().any(|l| l.contains("bad") && l.contains("failed")));

    let metrics: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report.run_dir.join("metrics.json")).unwrap()).unwrap();
    assert_eq!(metrics["per_query"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_canonical_order_leaves_retrieval_metrics_on_fused_order() {
    let source: Arc<dyn VectorSource> = Arc::new(MemorySource {
        tag: "gemini",
        passages: vec![("z_best", "Wang Geon founded Goryeo 0.9"), ("a_far", "Silla unified 0.2")],
    });
    let config = RetrievalConfig {
        canonical_order: true,
        ..Default::default()
    };
    let pipeline = RetrievalPipeline::new(
        FusionFanOut::new(vec![source]),
        Selector::new(Arc::new(Reranker::from_encoder(Arc::new(TrailingNumber)))),
        config,
    );
    let query = QuerySpec {
        id: "q1".to_string(),
        question: "who founded goryeo".to_string(),
        ground_truth_context_id: "z_best".to_string(),
        qualitative: false,
    };

    let evaluation = Evaluator::new(pipeline)
        .evaluate_query(&query, &params())
        .await
        .unwrap();

    assert_eq!(evaluation.retrieved_ids, vec!["z_best", "a_far"]);
    assert_eq!(evaluation.metrics["retrieval_mrr"], 1.0);
    assert_eq!(evaluation.metrics["rerank_mrr"], 1.0);
}

#[tokio::test]
async fn test_missing_query_file_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("runs");

    let err = Evaluator::new(pipeline())
        .run(&RunOptions {
            queries_path: dir.path().join("absent.yaml"),
            config_path: None,
            output_dir: output_dir.clone(),
            run_name: None,
            params: params(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::QuerySet(_)));
    assert!(!output_dir.exists());
}

#[tokio::test]
async fn test_qualitative_batch_writes_answers() {
    let dir = tempfile::tempdir().unwrap();
    let queries = write_queries(
        dir.path(),
        "queries:\n  - id: q1\n    question: who founded goryeo\n    ground_truth_context_id: c1\n  - id: q2\n    question: metrics only\n    ground_truth_context_id: c1\n    qualitative: false\n  - id: q3\n    question: offline question\n    ground_truth_context_id: c1\n",
    );
    let runner = QualitativeRunner::new(pipeline(), Arc::new(EchoGenerator));

    let report = runner
        .run(&QualitativeOptions {
            queries_path: queries,
            config_path: None,
            output_dir: dir.path().join("qualitative"),
            run_name: None,
            limit: None,
            style: PromptStyle::Citation,
            retrieve_k: 50,
            rerank_k: 2,
            temperature: 0.0,
        })
        .await
        .unwrap();

    let ids: Vec<_> = report.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["q1", "q3"]);
    assert_eq!(report.records[0].contexts.len(), 2);
    assert!(report.records[0].error.is_none());
    assert!(report.records[1].error.is_some());
    assert_eq!(report.total_prompt_tokens, 100);

    let answer = fs::read_to_string(report.run_dir.join("answers").join("q1.md")).unwrap();
    assert!(answer.contains("왕건이 918년에 고려를 세웠습니다."));
    assert!(answer.contains("Wang Geon founded Goryeo 0.9"));
    assert!(report.run_dir.join("answers").join("q3.md").is_file());

    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report.run_dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["prompt_style"], "citation");
    assert_eq!(meta["usage"]["total_response_tokens"], 10);

    let summary = fs::read_to_string(report.run_dir.join("summary.md")).unwrap();
    assert!(summary.starts_with("# RAG Qualitative Batch Summary"));
    assert!(summary.contains("| q1 | who founded goryeo |"));
}
