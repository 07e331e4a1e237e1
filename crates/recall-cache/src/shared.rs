use async_trait::async_trait;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Tier 2: larger, longer-lived, possibly shared between processes.
///
/// Implementations own expiry: `get` must not return an entry past its TTL.
/// Index-version checks are left to the caller.
#[async_trait]
pub trait SharedTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &CacheKey) -> anyhow::Result<Option<Arc<CacheEntry>>>;

    async fn put(&self, entry: Arc<CacheEntry>) -> anyhow::Result<()>;
}

/// In-process shared tier for single-process deployments and tests.
pub struct MemoryTier {
    cache: Cache<String, Arc<CacheEntry>>,
}

impl MemoryTier {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> anyhow::Result<Option<Arc<CacheEntry>>> {
        Ok(self.cache.get(key.as_str()).filter(|e| !e.is_expired()))
    }

    async fn put(&self, entry: Arc<CacheEntry>) -> anyhow::Result<()> {
        self.cache.insert(entry.key.digest.clone(), entry);
        Ok(())
    }
}
