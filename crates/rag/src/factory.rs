//! Build the retrieval stack from settings
//!
//! Nothing here touches the network or loads weights; every heavy resource
//! is wrapped in a [`SharedResource`] and built on first use.

use std::sync::Arc;
use std::time::Duration;

use docent_config::{ModelSelection, RerankerConfig, Settings, SourceConfig};

use crate::embeddings::{Embedder, OllamaEmbedder, OllamaEmbeddingConfig};
use crate::fanout::FusionFanOut;
use crate::pipeline::RetrievalPipeline;
use crate::reranker::{CrossEncoder, Reranker};
use crate::selector::Selector;
use crate::shared::SharedResource;
use crate::source::{EmbeddedSource, VectorSource};
use crate::vector_store::{KnnCollection, QdrantCollection, QdrantCollectionConfig};
#[cfg(not(feature = "onnx"))]
use crate::reranker::LexicalScorer;
#[cfg(feature = "onnx")]
use crate::reranker::OnnxCrossEncoder;
use crate::RagError;

/// Vector source for one configured corpus
pub fn build_source(config: &SourceConfig) -> EmbeddedSource {
    let embedding_config = OllamaEmbeddingConfig {
        endpoint: config.embedding_endpoint.clone(),
        model: config.embedding_model.clone(),
        normalize: config.normalize_embeddings,
        ..Default::default()
    };
    let embedder: Arc<SharedResource<dyn Embedder>> = Arc::new(SharedResource::lazy(
        format!("{}-embedder", config.tag),
        move || {
            let embedding_config = embedding_config.clone();
            async move {
                let embedder = OllamaEmbedder::new(embedding_config)?;
                Ok::<_, RagError>(Arc::new(embedder) as Arc<dyn Embedder>)
            }
        },
    ));

    let collection_config = QdrantCollectionConfig {
        endpoint: config.qdrant_endpoint.clone(),
        collection: config.collection.clone(),
        api_key: config.qdrant_api_key.clone(),
        distance: config.distance,
        ..Default::default()
    };
    let collection: Arc<SharedResource<dyn KnnCollection>> = Arc::new(SharedResource::lazy(
        format!("{}-collection", config.tag),
        move || {
            let collection_config = collection_config.clone();
            async move {
                let collection = QdrantCollection::connect(collection_config).await?;
                Ok::<_, RagError>(Arc::new(collection) as Arc<dyn KnnCollection>)
            }
        },
    ));

    EmbeddedSource::new(&config.tag, config.retrieve_k, embedder, collection)
        .with_timeout(config.timeout_ms.map(Duration::from_millis))
}

/// Shared reranker for the resolved model
#[cfg(feature = "onnx")]
pub fn build_reranker(config: &RerankerConfig, selection: ModelSelection) -> Reranker {
    let config = config.clone();
    Reranker::new(SharedResource::lazy("reranker", move || {
        let config = config.clone();
        let selection = selection.clone();
        async move {
            let encoder = tokio::task::spawn_blocking(move || {
                OnnxCrossEncoder::load(&selection, &config)
            })
            .await
            .map_err(|e| RagError::Model(format!("model load task failed: {}", e)))??;
            Ok::<_, RagError>(Arc::new(encoder) as Arc<dyn CrossEncoder>)
        }
    }))
}

/// Shared reranker for the resolved model
///
/// Built without ONNX support: a lexical scorer stands in for the
/// cross-encoder.
#[cfg(not(feature = "onnx"))]
pub fn build_reranker(_config: &RerankerConfig, selection: ModelSelection) -> Reranker {
    tracing::warn!(
        model = %selection.identifier(),
        "Built without the onnx feature, using lexical scorer instead of the cross-encoder"
    );
    Reranker::from_encoder(Arc::new(LexicalScorer::new()) as Arc<dyn CrossEncoder>)
}

/// Complete pipeline over every configured source
pub fn build_pipeline(settings: &Settings, selection: ModelSelection) -> RetrievalPipeline {
    let sources: Vec<Arc<dyn VectorSource>> = settings
        .sources
        .iter()
        .map(|config| Arc::new(build_source(config)) as Arc<dyn VectorSource>)
        .collect();

    tracing::info!(
        sources = ?settings.sources.iter().map(|s| s.tag.as_str()).collect::<Vec<_>>(),
        reranker = %selection.identifier(),
        kind = selection.kind(),
        "Building retrieval pipeline"
    );

    let reranker = Arc::new(build_reranker(&settings.reranker, selection));
    RetrievalPipeline::new(
        FusionFanOut::new(sources),
        Selector::new(reranker),
        settings.retrieval.clone(),
    )
}
