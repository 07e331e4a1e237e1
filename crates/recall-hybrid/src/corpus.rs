//! The indexed corpus and its only mutation paths.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use recall_core::error::{Error, Result};
use recall_core::{Chunk, ChunkStore, EmbeddingProvider, IndexVersion, Settings};
use recall_embed::EmbeddingCache;
use recall_text::LexicalIndex;
use recall_vector::VectorIndex;

/// Chunk store, both indices and the embedding cache, kept in step.
///
/// Each mutation updates the store and both indices before bumping the
/// corpus version, so a reader that sees version `n` sees every change up to
/// `n`. Writers are serialized; readers never wait on them.
pub struct Corpus {
    store: Arc<ChunkStore>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingCache>,
    writer: Mutex<()>,
}

impl Corpus {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: &Settings) -> Result<Self> {
        let store = Arc::new(ChunkStore::new());
        let lexical = Arc::new(LexicalIndex::from_settings(Arc::clone(&store), &settings.lexical)?);
        let vector = Arc::new(VectorIndex::new(provider.dim(), settings.vector.clone()));
        let embeddings = Arc::new(EmbeddingCache::new(provider, settings.embedding_cache.capacity));
        Ok(Self {
            store,
            lexical,
            vector,
            embeddings,
            writer: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    pub fn vector(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingCache> {
        &self.embeddings
    }

    pub fn index_version(&self) -> IndexVersion {
        self.store.version()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Embeds the chunk if needed, indexes it, and returns the new version.
    #[instrument(skip(self, chunk), fields(id = %chunk.id, version = chunk.version))]
    pub async fn upsert_chunk(&self, chunk: Chunk) -> Result<IndexVersion> {
        self.upsert_chunks(vec![chunk]).await
    }

    /// Batched upsert: one embedding call for all chunks lacking a vector,
    /// one lexical commit, one version bump.
    ///
    /// Validation runs before anything is written, so a rejected batch leaves
    /// the corpus untouched. Both indices are updated before the store; a
    /// later failure puts the indices and the store back as they were.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn upsert_chunks(&self, chunks: Vec<Chunk>) -> Result<IndexVersion> {
        let _guard = self.writer.lock().await;
        if chunks.is_empty() {
            return Ok(self.store.version());
        }
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            chunk.validate()?;
            if !seen.insert(chunk.id.as_str()) {
                return Err(Error::InvalidChunk(format!("chunk {} appears twice in one batch", chunk.id)));
            }
            self.store.check_version(chunk)?;
        }
        let chunks = self.attach_embeddings(chunks).await?;
        let previous: Vec<Arc<Chunk>> = chunks.iter().filter_map(|c| self.store.get(&c.id)).collect();

        self.lexical.upsert_many(&chunks)?;
        if let Err(e) = self.vector.upsert_many(&chunks) {
            self.restore_indices(&chunks, &previous);
            return Err(e);
        }
        for (published, chunk) in chunks.iter().enumerate() {
            if let Err(e) = self.store.insert(Arc::clone(chunk)) {
                self.restore_store(&chunks[..published], &previous);
                self.restore_indices(&chunks, &previous);
                return Err(e);
            }
        }
        let version = self.store.bump_version();
        info!(%version, chunks = chunks.len(), "chunks indexed");
        Ok(version)
    }

    /// Puts both indices back to `previous` for every id in `written`.
    fn restore_indices(&self, written: &[Arc<Chunk>], previous: &[Arc<Chunk>]) {
        let existed: HashSet<&str> = previous.iter().map(|c| c.id.as_str()).collect();
        for chunk in written.iter().filter(|c| !existed.contains(c.id.as_str())) {
            if let Err(e) = self.lexical.delete(&chunk.id) {
                warn!(id = %chunk.id, error = %e, "lexical rollback failed");
            }
            self.vector.remove(&chunk.id);
        }
        if let Err(e) = self.lexical.upsert_many(previous) {
            warn!(error = %e, "lexical rollback failed");
        }
        if let Err(e) = self.vector.upsert_many(previous) {
            warn!(error = %e, "vector rollback failed");
        }
    }

    fn restore_store(&self, published: &[Arc<Chunk>], previous: &[Arc<Chunk>]) {
        for chunk in published {
            self.store.remove(&chunk.id);
        }
        for chunk in previous.iter().filter(|p| published.iter().any(|c| c.id == p.id)) {
            if let Err(e) = self.store.insert(Arc::clone(chunk)) {
                warn!(id = %chunk.id, error = %e, "store rollback failed");
            }
        }
    }

    async fn attach_embeddings(&self, chunks: Vec<Chunk>) -> Result<Vec<Arc<Chunk>>> {
        let dim = self.vector.dim();
        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| c.embedding.is_none())
            .map(|c| c.text.clone())
            .collect();
        let mut computed = self.embeddings.embed_many(&missing).await?.into_iter();

        let mut out = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            if chunk.embedding.is_none() {
                chunk.embedding = computed.next();
            }
            let actual = chunk.embedding.as_ref().map_or(0, |e| e.len());
            if actual != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual });
            }
            out.push(Arc::new(chunk));
        }
        Ok(out)
    }

    /// Removes a chunk from the store and both indices.
    #[instrument(skip(self))]
    pub async fn delete_chunk(&self, id: &str) -> Result<IndexVersion> {
        let _guard = self.writer.lock().await;
        if !self.store.contains(id) {
            return Err(Error::NotFound(format!("chunk {id}")));
        }
        self.lexical.delete(id)?;
        self.vector.remove(id);
        self.store.remove(id);
        let version = self.store.bump_version();
        info!(%version, "chunk deleted");
        Ok(version)
    }
}
