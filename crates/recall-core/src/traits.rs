//! Seams to external collaborators and between the orchestrator and its backends.

use async_trait::async_trait;

use crate::types::{BackendQuery, SearchHit, SourceKind};

/// Turns text into dense vectors.
///
/// Implementations must return exactly one vector of `dim()` components per
/// input, in input order, and must be deterministic for a given `model_id()`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the model; part of every embedding cache key.
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Scores one (query, candidate) pair. Higher is more relevant.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, candidate: &str) -> anyhow::Result<f32>;
}

/// A ranked-retrieval capability over the corpus.
///
/// Results are sorted by score descending with ties broken by lower chunk
/// id, contain only chunks satisfying `query.filter`, and hold at most `k`
/// entries.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn search(&self, query: &BackendQuery, k: usize) -> anyhow::Result<Vec<SearchHit>>;
}
