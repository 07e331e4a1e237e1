use async_trait::async_trait;
use std::sync::Arc;

use recall_core::{BackendQuery, RetrievalBackend, SearchHit, SourceKind};

use crate::index::LexicalIndex;

/// Exposes a [`LexicalIndex`] to the orchestrator. Searches run on the
/// blocking pool so a slow segment scan never stalls the async workers.
#[derive(Clone)]
pub struct LexicalBackend {
    index: Arc<LexicalIndex>,
}

impl LexicalBackend {
    pub fn new(index: Arc<LexicalIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalBackend for LexicalBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Lexical
    }

    async fn search(&self, query: &BackendQuery, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        let index = Arc::clone(&self.index);
        let query = query.clone();
        let hits = tokio::task::spawn_blocking(move || index.search(&query.text, &query.filter, k)).await??;
        Ok(hits)
    }
}
