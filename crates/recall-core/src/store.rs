//! Concurrent chunk store and the corpus version counter.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::types::{Chunk, ChunkId, IndexVersion};

/// Authoritative mapping from chunk id to chunk.
///
/// Both indices hold `Arc` references into this store rather than copies.
/// Reads never block on a global lock; writes to one id are exclusive.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: DashMap<ChunkId, Arc<Chunk>>,
    version: AtomicU64,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Chunk>> {
        self.chunks.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    /// Fails with `StaleChunk` when the stored chunk carries a higher version.
    pub fn check_version(&self, chunk: &Chunk) -> Result<()> {
        match self.chunks.get(&chunk.id) {
            Some(stored) if stored.version > chunk.version => Err(Error::StaleChunk {
                id: chunk.id.clone(),
                stored: stored.version,
                offered: chunk.version,
            }),
            _ => Ok(()),
        }
    }

    /// Inserts or replaces a chunk, returning the replaced one.
    pub fn insert(&self, chunk: Arc<Chunk>) -> Result<Option<Arc<Chunk>>> {
        match self.chunks.entry(chunk.id.clone()) {
            Entry::Occupied(mut slot) => {
                let stored = slot.get().version;
                if stored > chunk.version {
                    return Err(Error::StaleChunk {
                        id: chunk.id.clone(),
                        stored,
                        offered: chunk.version,
                    });
                }
                Ok(Some(slot.insert(chunk)))
            }
            Entry::Vacant(slot) => {
                slot.insert(chunk);
                Ok(None)
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Chunk>> {
        self.chunks.remove(id).map(|(_, chunk)| chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks whose metadata satisfies `filter`.
    pub fn matching(&self, filter: &Filter) -> Vec<Arc<Chunk>> {
        self.chunks
            .iter()
            .filter(|entry| filter.matches(&entry.value().metadata))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn version(&self) -> IndexVersion {
        IndexVersion(self.version.load(Ordering::Acquire))
    }

    /// Publishes a committed mutation. Call only after both indices reflect it.
    pub fn bump_version(&self) -> IndexVersion {
        IndexVersion(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}
