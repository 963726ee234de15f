//! Query-set loading
//!
//! Accepted shapes, YAML or JSON: a list of records, or `{queries: [...]}`.
//! Each record needs `question` and `ground_truth_context_id`; `id` defaults
//! to `q{index+1}` and `qualitative` to `true`. Ids must be unique.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::EvalError;

/// One evaluation query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub id: String,
    pub question: String,
    pub ground_truth_context_id: String,
    pub qualitative: bool,
}

/// Load and validate a query set
pub fn load_queries(path: &Path) -> Result<Vec<QuerySpec>, EvalError> {
    if !path.exists() {
        return Err(EvalError::QuerySet(format!(
            "query file not found: {}",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| EvalError::QuerySet(format!("{}: {}", path.display(), e)))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let document: Value = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| EvalError::QuerySet(format!("{}: {}", path.display(), e)))?
    } else {
        serde_yaml::from_str(&raw)
            .map_err(|e| EvalError::QuerySet(format!("{}: {}", path.display(), e)))?
    };

    let queries = parse_queries(document)?;
    tracing::info!(path = %path.display(), queries = queries.len(), "Loaded query set");
    Ok(queries)
}

/// Validate an already-parsed query document
pub fn parse_queries(document: Value) -> Result<Vec<QuerySpec>, EvalError> {
    let records = match document {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("queries") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(EvalError::QuerySet(
                    "expected a 'queries' list".to_string(),
                ))
            },
        },
        _ => {
            return Err(EvalError::QuerySet(
                "expected a list of queries".to_string(),
            ))
        },
    };

    if records.is_empty() {
        return Err(EvalError::QuerySet("query set is empty".to_string()));
    }

    let queries = records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| parse_record(idx, record))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    if let Some(dup) = queries.iter().find(|q| !seen.insert(q.id.as_str())) {
        return Err(EvalError::QuerySet(format!("duplicate query id '{}'", dup.id)));
    }
    Ok(queries)
}

fn parse_record(idx: usize, record: Value) -> Result<QuerySpec, EvalError> {
    let Value::Object(map) = record else {
        return Err(EvalError::QuerySet(format!("entry {} is not a mapping", idx)));
    };

    let question = scalar(map.get("question"))
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| EvalError::QuerySet(format!("entry {} is missing 'question'", idx)))?;
    let ground_truth = scalar(map.get("ground_truth_context_id")).ok_or_else(|| {
        EvalError::QuerySet(format!(
            "entry {} is missing 'ground_truth_context_id'",
            idx
        ))
    })?;
    let id = scalar(map.get("id")).unwrap_or_else(|| format!("q{}", idx + 1));
    let qualitative = match map.get("qualitative") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => {
            return Err(EvalError::QuerySet(format!(
                "entry {} has non-boolean 'qualitative': {}",
                idx, other
            )))
        },
    };

    Ok(QuerySpec {
        id,
        question,
        ground_truth_context_id: ground_truth,
        qualitative,
    })
}

/// Strings and numbers are accepted as identifiers
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
