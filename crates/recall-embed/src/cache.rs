//! LRU embedding cache in front of an [`EmbeddingProvider`].
//!
//! Keys are `(model_id, normalized text)`, so swapping models never serves a
//! stale vector. Misses are collected and sent to the provider as one batch.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

use recall_core::error::{Error, Result};
use recall_core::{normalize_text, Embedding, EmbeddingProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    entries: Mutex<LruCache<String, Embedding>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// A zero `capacity` is treated as one.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dim(&self) -> usize {
        self.provider.dim()
    }

    fn key(&self, normalized: &str) -> String {
        format!("{}\u{1f}{normalized}", self.provider.model_id())
    }

    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self.embed_many(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::Embedding("provider returned no vector".into()))
    }

    /// Embeddings for `texts` in input order.
    #[instrument(skip(self, texts), fields(model = %self.provider.model_id(), texts = texts.len()))]
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let normalized: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();
        let mut out: Vec<Option<Embedding>> = vec![None; texts.len()];
        let mut pending: Vec<String> = Vec::new();
        let mut waiting: HashMap<String, Vec<usize>> = HashMap::new();
        {
            let mut entries = self.entries.lock();
            for (i, text) in normalized.iter().enumerate() {
                if let Some(hit) = entries.get(&self.key(text)) {
                    out[i] = Some(Arc::clone(hit));
                    continue;
                }
                let slots = waiting.entry(text.clone()).or_default();
                if slots.is_empty() {
                    pending.push(text.clone());
                }
                slots.push(i);
            }
        }
        let hits = texts.len() - waiting.values().map(Vec::len).sum::<usize>();
        self.hits.fetch_add(hits as u64, Ordering::Relaxed);
        self.misses.fetch_add(pending.len() as u64, Ordering::Relaxed);

        if !pending.is_empty() {
            let vectors = self
                .provider
                .embed_batch(&pending)
                .await
                .map_err(|e| Error::Embedding(format!("{e:#}")))?;
            if vectors.len() != pending.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    pending.len()
                )));
            }
            let dim = self.provider.dim();
            let mut entries = self.entries.lock();
            for (text, vector) in pending.iter().zip(vectors) {
                if vector.len() != dim {
                    return Err(Error::DimensionMismatch {
                        expected: dim,
                        actual: vector.len(),
                    });
                }
                if vector.iter().any(|x| !x.is_finite()) {
                    return Err(Error::Embedding("provider returned a non-finite component".into()));
                }
                let embedding: Embedding = vector.into();
                entries.put(self.key(text), Arc::clone(&embedding));
                for &slot in waiting.get(text).into_iter().flatten() {
                    out[slot] = Some(Arc::clone(&embedding));
                }
            }
            debug!(hits, misses = pending.len(), "embedding cache");
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| Error::Embedding("missing embedding for input".into())))
            .collect()
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let entries = self.entries.lock();
        EmbeddingCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}
