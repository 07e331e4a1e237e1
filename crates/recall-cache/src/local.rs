use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Tier 1: bounded, short-lived, process-local.
///
/// Each entry lives for at most `ttl` after insertion here, independent of
/// the longer TTL it carries for the shared tier. Expired entries are evicted
/// when read.
pub struct LocalTier {
    entries: Mutex<LruCache<String, (Arc<CacheEntry>, Instant)>>,
    ttl: Duration,
}

impl LocalTier {
    /// A zero `capacity` is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let mut entries = self.entries.lock();
        let (entry, inserted) = entries.get(key.as_str())?;
        let fresh = inserted.elapsed() < self.ttl
            && entry.key.index_version == key.index_version
            && !entry.is_expired();
        if fresh {
            return Some(Arc::clone(entry));
        }
        entries.pop(key.as_str());
        None
    }

    pub fn put(&self, entry: Arc<CacheEntry>) {
        self.entries
            .lock()
            .put(entry.key.digest.clone(), (entry, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
