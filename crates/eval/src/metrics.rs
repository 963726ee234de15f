//! Ranking metrics against a single relevant id

use serde::Serialize;
use std::collections::BTreeMap;

/// Hit rate, MRR and nDCG at one cutoff
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RankingMetrics {
    pub hit_rate: f64,
    pub mrr: f64,
    pub ndcg: f64,
}

impl RankingMetrics {
    /// Flatten into `{prefix}_{metric}` entries
    pub fn insert_prefixed(&self, prefix: &str, into: &mut BTreeMap<String, f64>) {
        into.insert(format!("{}_hit_rate", prefix), self.hit_rate);
        into.insert(format!("{}_mrr", prefix), self.mrr);
        into.insert(format!("{}_ndcg", prefix), self.ndcg);
    }
}

/// Metrics of `retrieved[..top_k]` against `ground_truth`
///
/// With one relevant item the ideal DCG is 1, so nDCG reduces to
/// `1 / log2(rank + 1)`.
pub fn calculate_metrics<S: AsRef<str>>(
    retrieved: &[S],
    ground_truth: &str,
    top_k: usize,
) -> RankingMetrics {
    let cutoff = top_k.min(retrieved.len());
    let position = retrieved[..cutoff]
        .iter()
        .position(|id| id.as_ref() == ground_truth);

    match position {
        Some(idx) => {
            let rank = (idx + 1) as f64;
            RankingMetrics {
                hit_rate: 1.0,
                mrr: 1.0 / rank,
                ndcg: 1.0 / (rank + 1.0).log2(),
            }
        },
        None => RankingMetrics::default(),
    }
}

/// Unweighted mean of every key across records
///
/// Keys missing from a record count only towards records that have them.
/// No records gives an empty map.
pub fn aggregate(records: &[BTreeMap<String, f64>]) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        for (key, value) in record {
            let entry = totals.entry(key.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect()
}
