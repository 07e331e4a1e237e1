// rust-cv/hnsw vector index with tombstones, filtered search and compaction

use hnsw::{Hnsw, Searcher};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use space::{Metric, Neighbor};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use recall_core::config::VectorSettings;
use recall_core::error::{Error, Result};
use recall_core::{Chunk, ChunkId, Embedding, Filter, SearchHit, SourceKind};

/// Cosine distance scaled to `u32`, as the graph requires an integral unit.
struct CosineDistance;

impl Metric<Embedding> for CosineDistance {
    type Unit = u32;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn distance(&self, a: &Embedding, b: &Embedding) -> u32 {
        let Some(similarity) = cosine(a, b) else {
            return u32::MAX;
        };
        let distance = (1.0 - similarity).clamp(0.0, 2.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

/// Cosine similarity, `None` when either side has zero magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }
    Some(dot / (mag_a * mag_b))
}

type Graph = Hnsw<CosineDistance, Embedding, StdRng, 16, 32>;

struct Slot {
    chunk: Arc<Chunk>,
    embedding: Embedding,
}

struct Inner {
    graph: Graph,
    /// Graph item index to chunk. Superseded and deleted slots stay until compaction.
    slots: Vec<Slot>,
    live: HashMap<ChunkId, usize>,
    tombstones: HashSet<usize>,
}

impl Inner {
    fn empty() -> Self {
        Self {
            graph: Hnsw::new(CosineDistance),
            slots: Vec::new(),
            live: HashMap::new(),
            tombstones: HashSet::new(),
        }
    }

    fn push(&mut self, chunk: Arc<Chunk>, embedding: Embedding) {
        let mut searcher = Searcher::default();
        let slot = self.graph.insert(Arc::clone(&embedding), &mut searcher);
        debug_assert_eq!(slot, self.slots.len());
        if let Some(previous) = self.live.insert(chunk.id.clone(), slot) {
            self.tombstones.insert(previous);
        }
        self.slots.push(Slot { chunk, embedding });
    }

    fn retire(&mut self, id: &str) -> bool {
        match self.live.remove(id) {
            Some(slot) => {
                self.tombstones.insert(slot);
                true
            }
            None => false,
        }
    }
}

/// Approximate nearest-neighbour index over chunk embeddings.
///
/// HNSW has no true deletion: replaced and removed chunks are tombstoned and
/// skipped at query time, and the graph is rebuilt from live entries once
/// tombstones exceed `compaction_ratio` of all slots.
///
/// Writers are serialized by `writer`. The `inner` write lock is held for one
/// graph insertion or one pointer swap at a time, so searches interleave with
/// batch upserts and never wait for a rebuild.
///
/// Returned scores are exact cosine similarities. Ties order by chunk id.
pub struct VectorIndex {
    dim: usize,
    settings: VectorSettings,
    inner: RwLock<Inner>,
    writer: Mutex<()>,
}

impl VectorIndex {
    pub fn new(dim: usize, settings: VectorSettings) -> Self {
        Self {
            dim,
            settings,
            inner: RwLock::new(Inner::empty()),
            writer: Mutex::new(()),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of live chunks.
    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstones(&self) -> usize {
        self.inner.read().tombstones.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().live.contains_key(id)
    }

    fn embedding_of(&self, chunk: &Chunk) -> Result<Embedding> {
        let embedding = chunk
            .embedding
            .as_ref()
            .ok_or_else(|| Error::InvalidChunk(format!("chunk {} has no embedding", chunk.id)))?;
        if embedding.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        Ok(Arc::clone(embedding))
    }

    /// Inserts or replaces a chunk. The chunk must carry an embedding of `dim` components.
    pub fn upsert(&self, chunk: Arc<Chunk>) -> Result<()> {
        self.upsert_many(std::slice::from_ref(&chunk))
    }

    /// Nothing is inserted if any chunk fails validation.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub fn upsert_many(&self, chunks: &[Arc<Chunk>]) -> Result<()> {
        let embeddings = chunks
            .iter()
            .map(|c| self.embedding_of(c))
            .collect::<Result<Vec<_>>>()?;
        let _writing = self.writer.lock();
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            self.inner.write().push(Arc::clone(chunk), embedding);
        }
        self.maybe_compact();
        Ok(())
    }

    /// Returns whether the chunk was present.
    pub fn remove(&self, id: &str) -> bool {
        let _writing = self.writer.lock();
        let removed = self.inner.write().retire(id);
        if removed {
            self.maybe_compact();
        }
        removed
    }

    /// Rebuilds from a snapshot of the live slots outside the lock, then swaps.
    /// Callers hold `writer`, so the snapshot cannot go stale before the swap.
    fn maybe_compact(&self) {
        let live: Vec<(Arc<Chunk>, Embedding)> = {
            let inner = self.inner.read();
            let slots = inner.slots.len();
            if slots == 0 || inner.tombstones.is_empty() {
                return;
            }
            #[allow(clippy::cast_precision_loss)]
            let ratio = inner.tombstones.len() as f32 / slots as f32;
            if ratio <= self.settings.compaction_ratio {
                return;
            }
            let mut live: Vec<usize> = inner.live.values().copied().collect();
            live.sort_unstable();
            live.into_iter()
                .map(|slot| {
                    let Slot { chunk, embedding } = &inner.slots[slot];
                    (Arc::clone(chunk), Arc::clone(embedding))
                })
                .collect()
        };

        let mut rebuilt = Inner::empty();
        for (chunk, embedding) in live {
            rebuilt.push(chunk, embedding);
        }
        let live = rebuilt.live.len();
        let previous = std::mem::replace(&mut *self.inner.write(), rebuilt);
        info!(reclaimed = previous.tombstones.len(), live, "vector index compacted");
    }

    /// Top `k` chunks by cosine similarity among those matching `filter`.
    ///
    /// Small corpora and selective filters are scanned exactly. Otherwise the
    /// graph is searched with `k * overfetch_factor` candidates; if too few of
    /// them survive the filter the search falls back to an exact scan, so a
    /// request never returns fewer than `min(k, eligible)` hits.
    #[instrument(skip(self, query, filter), fields(dim = self.dim))]
    pub fn search(&self, query: &[f32], filter: &Filter, k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let inner = self.inner.read();
        if k == 0 || inner.live.is_empty() {
            return Ok(Vec::new());
        }
        let threshold = self.settings.exact_scan_threshold;

        let eligible: Vec<usize> = if filter.is_empty() {
            if inner.live.len() <= threshold {
                return Ok(exact(&inner, inner.live.values().copied(), query, k));
            }
            Vec::new()
        } else {
            let eligible: Vec<usize> = inner
                .live
                .values()
                .copied()
                .filter(|&slot| filter.matches(&inner.slots[slot].chunk.metadata))
                .collect();
            if eligible.len() <= threshold {
                debug!(eligible = eligible.len(), "selective filter, exact scan");
                return Ok(exact(&inner, eligible.into_iter(), query, k));
            }
            eligible
        };
        let eligible_count = if filter.is_empty() { inner.live.len() } else { eligible.len() };

        let hits = self.approximate(&inner, query, filter, k);
        if hits.len() < k.min(eligible_count) {
            debug!(found = hits.len(), wanted = k, "approximate search short, exact scan");
            return Ok(if filter.is_empty() {
                exact(&inner, inner.live.values().copied(), query, k)
            } else {
                exact(&inner, eligible.into_iter(), query, k)
            });
        }
        Ok(hits)
    }

    fn approximate(&self, inner: &Inner, query: &[f32], filter: &Filter, k: usize) -> Vec<SearchHit> {
        let fetch = (k.saturating_mul(self.settings.overfetch_factor.max(1)) + inner.tombstones.len())
            .min(inner.slots.len());
        let ef = fetch.max(self.settings.ef_search_min);
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            fetch
        ];
        let mut searcher = Searcher::default();
        let probe: Embedding = Arc::from(query);
        inner.graph.nearest(&probe, ef, &mut searcher, &mut neighbors);

        let candidates = neighbors
            .into_iter()
            .filter(|n| n.index != !0)
            .map(|n| n.index)
            .filter(|slot| !inner.tombstones.contains(slot))
            .filter(|&slot| filter.is_empty() || filter.matches(&inner.slots[slot].chunk.metadata));
        exact(inner, candidates, query, k)
    }
}

/// Scores `slots` exactly against `query` and keeps the best `k`.
fn exact(inner: &Inner, slots: impl Iterator<Item = usize>, query: &[f32], k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = slots
        .map(|slot| {
            let Slot { chunk, embedding } = &inner.slots[slot];
            let similarity = cosine(query, embedding).unwrap_or(0.0);
            SearchHit::new(chunk.id.clone(), similarity, SourceKind::Vector)
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
