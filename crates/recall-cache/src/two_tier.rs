use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use recall_core::config::ResultCacheSettings;
use recall_core::error::{Error, Result};
use recall_core::{CacheTier, RetrievalError, ScoredCandidate};

use crate::entry::CacheEntry;
use crate::key::CacheKey;
use crate::local::LocalTier;
use crate::shared::{MemoryTier, SharedTier};
use crate::sqlite::SqliteTier;

/// Upper bound on entries held by the in-process shared tier.
const MEMORY_TIER_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: Arc<CacheEntry>,
    pub tier: CacheTier,
}

/// Result of a two-tier lookup. `errors` lists tiers that were bypassed.
#[derive(Debug, Default)]
pub struct CacheLookup {
    pub hit: Option<CacheHit>,
    pub errors: Vec<RetrievalError>,
}

/// Two-tier result cache.
///
/// Lookups try Tier 1, then Tier 2, and a Tier-2-only hit is copied back
/// into Tier 1. Writes go to Tier 2 first, then Tier 1. Entries whose index
/// version differs from the key's are never returned. A tier that errors or
/// exceeds `shared_timeout` is skipped and reported, never fatal.
pub struct ResultCache {
    local: LocalTier,
    shared: Arc<dyn SharedTier>,
    shared_ttl: Duration,
    shared_timeout: Duration,
}

impl ResultCache {
    pub fn new(settings: &ResultCacheSettings, shared: Arc<dyn SharedTier>) -> Self {
        Self {
            local: LocalTier::new(settings.local_capacity, settings.local_ttl()),
            shared,
            shared_ttl: settings.shared_ttl(),
            shared_timeout: settings.shared_timeout(),
        }
    }

    /// SQLite when `shared_path` is set, otherwise an in-process moka tier.
    pub fn from_settings(settings: &ResultCacheSettings) -> Result<Self> {
        let shared: Arc<dyn SharedTier> = match settings.shared_path() {
            Some(path) => Arc::new(
                SqliteTier::open(&path)
                    .map_err(|e| Error::InvalidConfig(format!("shared result cache: {e:#}")))?,
            ),
            None => Arc::new(MemoryTier::new(MEMORY_TIER_CAPACITY, settings.shared_ttl())),
        };
        Ok(Self::new(settings, shared))
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn shared(&self) -> &Arc<dyn SharedTier> {
        &self.shared
    }

    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let mut lookup = CacheLookup::default();
        if let Some(entry) = self.local.get(key) {
            debug!(tier = %CacheTier::Local, "result cache hit");
            lookup.hit = Some(CacheHit {
                entry,
                tier: CacheTier::Local,
            });
            return lookup;
        }

        match tokio::time::timeout(self.shared_timeout, self.shared.get(key)).await {
            Ok(Ok(Some(entry))) if entry.key.index_version == key.index_version && !entry.is_expired() => {
                debug!(tier = %CacheTier::Shared, "result cache hit, backfilling local tier");
                self.local.put(Arc::clone(&entry));
                lookup.hit = Some(CacheHit {
                    entry,
                    tier: CacheTier::Shared,
                });
            }
            Ok(Ok(_)) => debug!("result cache miss"),
            Ok(Err(e)) => lookup.errors.push(self.bypass(format!("{e:#}"))),
            Err(_) => lookup
                .errors
                .push(self.bypass(format!("lookup exceeded {:?}", self.shared_timeout))),
        }
        lookup
    }

    /// Writes Tier 2 then Tier 1. Returns the shared-tier failure, if any;
    /// Tier 1 is written regardless.
    #[instrument(skip(self, key, candidates), fields(key = %key, candidates = candidates.len()))]
    pub async fn store(&self, key: CacheKey, candidates: Vec<ScoredCandidate>) -> Option<RetrievalError> {
        let entry = Arc::new(CacheEntry::new(key, candidates, self.shared_ttl));
        let failure = match tokio::time::timeout(self.shared_timeout, self.shared.put(Arc::clone(&entry))).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(self.bypass(format!("{e:#}"))),
            Err(_) => Some(self.bypass(format!("write exceeded {:?}", self.shared_timeout))),
        };
        self.local.put(entry);
        failure
    }

    fn bypass(&self, reason: String) -> RetrievalError {
        warn!(tier = %CacheTier::Shared, backend = self.shared.name(), %reason, "bypassing result cache tier");
        RetrievalError::CacheUnavailable {
            tier: CacheTier::Shared,
            reason,
        }
    }
}
