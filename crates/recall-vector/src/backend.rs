use async_trait::async_trait;
use std::sync::Arc;

use recall_core::{BackendQuery, RetrievalBackend, SearchHit, SourceKind};
use recall_embed::EmbeddingCache;

use crate::index::VectorIndex;

/// Embeds the query through the shared [`EmbeddingCache`] and searches a
/// [`VectorIndex`] on the blocking pool.
#[derive(Clone)]
pub struct SemanticBackend {
    index: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingCache>,
}

impl SemanticBackend {
    pub fn new(index: Arc<VectorIndex>, embeddings: Arc<EmbeddingCache>) -> Self {
        Self { index, embeddings }
    }
}

#[async_trait]
impl RetrievalBackend for SemanticBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Vector
    }

    async fn search(&self, query: &BackendQuery, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        let probe = self.embeddings.embed(&query.text).await?;
        let index = Arc::clone(&self.index);
        let filter = query.filter.clone();
        let hits = tokio::task::spawn_blocking(move || index.search(&probe, &filter, k)).await??;
        Ok(hits)
    }
}
