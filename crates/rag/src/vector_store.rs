//! k-NN collections backed by Qdrant
//!
//! Collections are read-only here; indexing happens elsewhere.

use async_trait::async_trait;
use docent_config::DistanceMetric;
use qdrant_client::{
    qdrant::{point_id::PointIdOptions, value::Kind, SearchPointsBuilder, Value as QdrantValue},
    Qdrant,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::RagError;

/// Raw k-NN answer as parallel arrays
///
/// Arrays may be ragged; consumers index defensively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnnResponse {
    pub ids: Vec<String>,
    pub documents: Vec<Option<String>>,
    pub metadatas: Vec<Option<Map<String, Value>>>,
    /// Smaller is closer
    pub distances: Vec<f32>,
}

impl KnnResponse {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Nearest-neighbour query interface
#[async_trait]
pub trait KnnCollection: Send + Sync {
    /// Nearest `n_results` entries, closest first
    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<KnnResponse, RagError>;

    /// Collection name
    fn name(&self) -> &str;
}

/// Qdrant collection configuration
#[derive(Debug, Clone)]
pub struct QdrantCollectionConfig {
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub distance: DistanceMetric,
    /// Payload key holding the chunk text
    pub content_key: String,
}

impl Default for QdrantCollectionConfig {
    fn default() -> Self {
        Self {
            endpoint: docent_config::constants::endpoints::QDRANT_DEFAULT.to_string(),
            collection: "history_gemini".to_string(),
            api_key: None,
            distance: DistanceMetric::Cosine,
            content_key: "text".to_string(),
        }
    }
}

/// Qdrant-backed collection
pub struct QdrantCollection {
    client: Qdrant,
    config: QdrantCollectionConfig,
}

impl QdrantCollection {
    /// Connect and check that the collection exists
    pub async fn connect(config: QdrantCollectionConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        let exists = client
            .collection_exists(&config.collection)
            .await
            .map_err(|e| RagError::Connection(e.to_string()))?;
        if !exists {
            return Err(RagError::VectorStore(format!(
                "Collection '{}' does not exist",
                config.collection
            )));
        }

        tracing::info!(
            endpoint = %config.endpoint,
            collection = %config.collection,
            "Connected to Qdrant collection"
        );
        Ok(Self { client, config })
    }
}

#[async_trait]
impl KnnCollection for QdrantCollection {
    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<KnnResponse, RagError> {
        if n_results == 0 {
            return Ok(KnnResponse::default());
        }

        let request =
            SearchPointsBuilder::new(&self.config.collection, embedding.to_vec(), n_results as u64)
                .with_payload(true);

        let results = self
            .client
            .search_points(request)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        let mut response = KnnResponse::default();
        for point in results.result {
            let id = point
                .id
                .and_then(|pid| pid.point_id_options)
                .map(|opts| match opts {
                    PointIdOptions::Uuid(u) => u,
                    PointIdOptions::Num(n) => n.to_string(),
                })
                .unwrap_or_default();

            let mut metadata = payload_to_json(point.payload);
            let document = match metadata.remove(&self.config.content_key) {
                Some(Value::String(s)) => Some(s),
                _ => None,
            };

            response.ids.push(id);
            response.documents.push(document);
            response.metadatas.push(Some(metadata));
            response
                .distances
                .push(similarity_to_distance(self.config.distance, point.score));
        }

        Ok(response)
    }

    fn name(&self) -> &str {
        &self.config.collection
    }
}

/// Qdrant reports similarity; convert to a smaller-is-closer distance
pub fn similarity_to_distance(metric: DistanceMetric, score: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - score,
        DistanceMetric::Dot => -score,
        DistanceMetric::Euclidean => score,
    }
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect()
}

fn qdrant_value_to_json(value: QdrantValue) -> Value {
    match value.kind {
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        },
        Some(Kind::StructValue(s)) => Value::Object(payload_to_json(s.fields)),
        Some(Kind::NullValue(_)) | None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_to_distance() {
        assert!((similarity_to_distance(DistanceMetric::Cosine, 0.9) - 0.1).abs() < 1e-6);
        assert_eq!(similarity_to_distance(DistanceMetric::Dot, 2.5), -2.5);
        assert_eq!(similarity_to_distance(DistanceMetric::Euclidean, 1.5), 1.5);

        // Higher similarity must map to a smaller distance
        assert!(
            similarity_to_distance(DistanceMetric::Cosine, 0.9)
                < similarity_to_distance(DistanceMetric::Cosine, 0.5)
        );
    }

    #[test]
    fn test_payload_conversion() {
        let mut payload = HashMap::new();
        payload.insert(
            "chunk_id".to_string(),
            QdrantValue {
                kind: Some(Kind::StringValue("c1".to_string())),
            },
        );
        payload.insert(
            "page".to_string(),
            QdrantValue {
                kind: Some(Kind::IntegerValue(12)),
            },
        );
        payload.insert("empty".to_string(), QdrantValue { kind: None });

        let json = payload_to_json(payload);
        assert_eq!(json["chunk_id"], "c1");
        assert_eq!(json["page"], 12);
        assert!(json["empty"].is_null());
    }
}
