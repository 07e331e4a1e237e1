use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recall_core::{CacheTier, Chunk, IndexVersion, RetrievalError, ScoredCandidate};

/// A ranked candidate together with the chunk it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub candidate: ScoredCandidate,
    pub chunk: Arc<Chunk>,
}

/// Request lifecycle stages, recorded in visiting order on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStage {
    Received,
    CacheCheck,
    CacheHit,
    CacheMiss,
    Retrieving,
    Fusing,
    Reranking,
    Caching,
    Done,
    Failed,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::CacheCheck => "CACHE_CHECK",
            Self::CacheHit => "CACHE_HIT",
            Self::CacheMiss => "CACHE_MISS",
            Self::Retrieving => "RETRIEVING",
            Self::Fusing => "FUSING",
            Self::Reranking => "RERANKING",
            Self::Caching => "CACHING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Wall time spent per stage. Stages that did not run stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyBreakdown {
    pub cache_lookup: Duration,
    pub lexical: Duration,
    pub vector: Duration,
    /// Both backends, joined.
    pub retrieval: Duration,
    pub fusion: Duration,
    pub rerank: Duration,
    pub cache_write: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievedChunk>,
    pub cache_hit: bool,
    pub cache_tier: Option<CacheTier>,
    /// A backend or the reranker was skipped; results are lower quality.
    pub degraded: bool,
    /// Every locally recovered failure, including bypassed cache tiers.
    pub degradations: Vec<RetrievalError>,
    pub index_version: IndexVersion,
    pub stages: Vec<RequestStage>,
    pub latency: LatencyBreakdown,
}

impl RetrievalResponse {
    pub fn candidates(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.results.iter().map(|r| &r.candidate)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.candidate.chunk_id.as_str()).collect()
    }
}

/// Process-lifetime request counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    requests: AtomicU64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub requests: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub degraded: u64,
    pub failures: u64,
}

impl EngineStats {
    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hit(&self, tier: CacheTier) {
        match tier {
            CacheTier::Local => self.local_hits.fetch_add(1, Ordering::Relaxed),
            CacheTier::Shared => self.shared_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
