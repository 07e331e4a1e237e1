//! Retrieval orchestrator.
//!
//! ```text
//! RECEIVED -> CACHE_CHECK -> CACHE_HIT -> DONE
//!                         -> CACHE_MISS -> RETRIEVING -> FUSING -> RERANKING -> CACHING -> DONE
//! ```
//! RERANKING is skipped when no reranker is configured. Any stage may end in
//! FAILED. RETRIEVING through RERANKING run under the request deadline;
//! CACHING runs after it, so a cancelled request never writes a partial
//! result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use recall_cache::{CacheKey, ResultCache, SharedTier};
use recall_core::error::Result;
use recall_core::{
    normalize_text, BackendQuery, Chunk, EmbeddingProvider, IndexVersion, Query, RelevanceScorer,
    RetrievalBackend, RetrievalError, ScoredCandidate, SearchHit, Settings, SourceKind, Weights,
};
use recall_text::LexicalBackend;
use recall_vector::SemanticBackend;

use crate::corpus::Corpus;
use crate::fusion::ScoreFusion;
use crate::rerank::{shortlist_size, Reranker, TermOverlapScorer};
use crate::response::{
    EngineStats, EngineStatsSnapshot, LatencyBreakdown, RequestStage, RetrievalResponse, RetrievedChunk,
};

/// Hybrid lexical + semantic retrieval over a [`Corpus`], with fusion,
/// reranking and a two-tier result cache.
pub struct RetrievalEngine {
    corpus: Arc<Corpus>,
    lexical: Arc<dyn RetrievalBackend>,
    vector: Arc<dyn RetrievalBackend>,
    reranker: Option<Reranker>,
    cache: ResultCache,
    settings: Settings,
    stats: EngineStats,
}

pub struct RetrievalEngineBuilder {
    corpus: Arc<Corpus>,
    settings: Settings,
    lexical: Option<Arc<dyn RetrievalBackend>>,
    vector: Option<Arc<dyn RetrievalBackend>>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    shared_tier: Option<Arc<dyn SharedTier>>,
}

impl RetrievalEngineBuilder {
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the tantivy backend.
    #[must_use]
    pub fn lexical_backend(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.lexical = Some(backend);
        self
    }

    /// Replaces the HNSW backend.
    #[must_use]
    pub fn vector_backend(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.vector = Some(backend);
        self
    }

    #[must_use]
    pub fn reranker(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Results are returned in fused order.
    #[must_use]
    pub fn without_reranker(mut self) -> Self {
        self.scorer = None;
        self
    }

    /// Overrides the Tier 2 store chosen from `result_cache.shared_path`.
    #[must_use]
    pub fn shared_tier(mut self, tier: Arc<dyn SharedTier>) -> Self {
        self.shared_tier = Some(tier);
        self
    }

    pub fn build(self) -> Result<RetrievalEngine> {
        self.settings.validate()?;
        let corpus = self.corpus;
        let lexical: Arc<dyn RetrievalBackend> = match self.lexical {
            Some(backend) => backend,
            None => Arc::new(LexicalBackend::new(Arc::clone(corpus.lexical()))),
        };
        let vector: Arc<dyn RetrievalBackend> = match self.vector {
            Some(backend) => backend,
            None => Arc::new(SemanticBackend::new(
                Arc::clone(corpus.vector()),
                Arc::clone(corpus.embeddings()),
            )),
        };
        let cache = match self.shared_tier {
            Some(tier) => ResultCache::new(&self.settings.result_cache, tier),
            None => ResultCache::from_settings(&self.settings.result_cache)?,
        };
        let reranker = self
            .scorer
            .map(|scorer| Reranker::new(scorer, self.settings.rerank_timeout()));
        Ok(RetrievalEngine {
            corpus,
            lexical,
            vector,
            reranker,
            cache,
            settings: self.settings,
            stats: EngineStats::default(),
        })
    }
}

/// Per-request bookkeeping carried through the stages.
#[derive(Default)]
struct RequestTrace {
    stages: Vec<RequestStage>,
    latency: LatencyBreakdown,
    degradations: Vec<RetrievalError>,
}

impl RequestTrace {
    fn enter(&mut self, stage: RequestStage) {
        debug!(%stage, "retrieval stage");
        self.stages.push(stage);
    }

    fn degrade(&mut self, error: RetrievalError) {
        warn!(error = %error, "recovered, continuing degraded");
        self.degradations.push(error);
    }

    fn degraded(&self) -> bool {
        self.degradations.iter().any(RetrievalError::degrades_quality)
    }
}

struct BackendOutcome {
    kind: SourceKind,
    elapsed: Duration,
    result: std::result::Result<Vec<SearchHit>, String>,
}

impl RetrievalEngine {
    pub fn builder(corpus: Arc<Corpus>) -> RetrievalEngineBuilder {
        RetrievalEngineBuilder {
            corpus,
            settings: Settings::default(),
            lexical: None,
            vector: None,
            scorer: Some(Arc::new(TermOverlapScorer)),
            shared_tier: None,
        }
    }

    /// A fresh corpus and engine with the default backends and reranker.
    pub fn open(provider: Arc<dyn EmbeddingProvider>, settings: Settings) -> Result<Self> {
        let corpus = Arc::new(Corpus::new(provider, &settings)?);
        Self::builder(corpus).settings(settings).build()
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn index_version(&self) -> IndexVersion {
        self.corpus.index_version()
    }

    pub async fn upsert_chunk(&self, chunk: Chunk) -> Result<IndexVersion> {
        self.corpus.upsert_chunk(chunk).await
    }

    pub async fn upsert_chunks(&self, chunks: Vec<Chunk>) -> Result<IndexVersion> {
        self.corpus.upsert_chunks(chunks).await
    }

    pub async fn delete_chunk(&self, id: &str) -> Result<IndexVersion> {
        self.corpus.delete_chunk(id).await
    }

    /// Runs one retrieval request.
    ///
    /// Fails only on an invalid query, when both backends fail, or when the
    /// request deadline elapses. Every other failure is recovered and listed
    /// in `degradations`.
    #[allow(clippy::cast_possible_truncation)]
    #[instrument(skip(self, query), fields(top_k = query.top_k))]
    pub async fn retrieve(&self, query: Query) -> std::result::Result<RetrievalResponse, RetrievalError> {
        let started = Instant::now();
        self.stats.request();
        let mut trace = RequestTrace::default();
        trace.enter(RequestStage::Received);

        if let Err(e) = query.validate() {
            return Err(self.fail(&mut trace, e));
        }
        let version = self.corpus.index_version();
        let weights = query.weights.unwrap_or(self.settings.default_weights);
        let text = normalize_text(&query.text);
        let key = CacheKey::new(&text, &query.filter, query.top_k, weights, version);

        trace.enter(RequestStage::CacheCheck);
        let lookup_started = Instant::now();
        let lookup = self.cache.lookup(&key).await;
        trace.latency.cache_lookup = lookup_started.elapsed();
        for error in lookup.errors {
            trace.degrade(error);
        }
        if let Some(hit) = lookup.hit {
            if let Some(results) = self.attach_all(&hit.entry.candidates) {
                trace.enter(RequestStage::CacheHit);
                trace.enter(RequestStage::Done);
                self.stats.hit(hit.tier);
                trace.latency.total = started.elapsed();
                debug!(tier = %hit.tier, %version, "served from result cache");
                return Ok(RetrievalResponse {
                    results,
                    cache_hit: true,
                    cache_tier: Some(hit.tier),
                    degraded: false,
                    degradations: trace.degradations,
                    index_version: version,
                    stages: trace.stages,
                    latency: trace.latency,
                });
            }
            debug!("cached chunks no longer stored, recomputing");
        }
        trace.enter(RequestStage::CacheMiss);
        self.stats.miss();

        let deadline = self.settings.request_timeout();
        let outcome = tokio::time::timeout(deadline, self.pipeline(&text, &query, weights, &mut trace)).await;
        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => return Err(self.fail(&mut trace, e)),
            Err(_) => {
                let e = RetrievalError::AllBackendsUnavailable {
                    reason: format!("request exceeded {deadline:?}"),
                };
                return Err(self.fail(&mut trace, e));
            }
        };

        let degraded = trace.degraded();
        if degraded {
            self.stats.degraded();
        } else if self.corpus.index_version() == version {
            trace.enter(RequestStage::Caching);
            let write_started = Instant::now();
            let candidates: Vec<ScoredCandidate> = results.iter().map(|r| r.candidate.clone()).collect();
            if let Some(error) = self.cache.store(key, candidates).await {
                trace.degrade(error);
            }
            trace.latency.cache_write = write_started.elapsed();
        } else {
            debug!(%version, "corpus changed during request, result not cached");
        }
        trace.enter(RequestStage::Done);
        trace.latency.total = started.elapsed();
        info!(
            results = results.len(),
            degraded,
            %version,
            total_ms = trace.latency.total.as_millis() as u64,
            "retrieval complete"
        );
        Ok(RetrievalResponse {
            results,
            cache_hit: false,
            cache_tier: None,
            degraded,
            degradations: trace.degradations,
            index_version: version,
            stages: trace.stages,
            latency: trace.latency,
        })
    }

    async fn pipeline(
        &self,
        text: &str,
        query: &Query,
        weights: Weights,
        trace: &mut RequestTrace,
    ) -> std::result::Result<Vec<RetrievedChunk>, RetrievalError> {
        trace.enter(RequestStage::Retrieving);
        let shortlist = shortlist_size(self.settings.rerank_shortlist, query.top_k);
        let fetch = self.settings.candidate_pool.max(shortlist).max(query.top_k);
        let fusion = self.retrieve_both(text, query, fetch, trace).await?;

        trace.enter(RequestStage::Fusing);
        let fusing_started = Instant::now();
        let fused = fusion.fuse(weights);
        let candidates: Vec<RetrievedChunk> = fused
            .into_iter()
            .filter_map(|candidate| self.attach(candidate))
            .take(shortlist)
            .collect();
        trace.latency.fusion = fusing_started.elapsed();

        let Some(reranker) = &self.reranker else {
            return Ok(top(candidates, query.top_k));
        };
        trace.enter(RequestStage::Reranking);
        let rerank_started = Instant::now();
        let reranked = reranker.rerank(text, &candidates, query.top_k).await;
        trace.latency.rerank = rerank_started.elapsed();
        match reranked {
            Ok(results) => Ok(results),
            Err(e) => {
                trace.degrade(e);
                Ok(top(candidates, query.top_k))
            }
        }
    }

    /// Queries both backends concurrently and feeds fusion in arrival order.
    /// Dropping the returned future aborts both searches.
    async fn retrieve_both(
        &self,
        text: &str,
        query: &Query,
        k: usize,
        trace: &mut RequestTrace,
    ) -> std::result::Result<ScoreFusion, RetrievalError> {
        let started = Instant::now();
        let backend_query = BackendQuery {
            text: text.to_string(),
            filter: query.filter.clone(),
        };
        let timeout = self.settings.backend_timeout();
        let mut searches = JoinSet::new();
        for (kind, backend) in [
            (SourceKind::Lexical, &self.lexical),
            (SourceKind::Vector, &self.vector),
        ] {
            let backend = Arc::clone(backend);
            let backend_query = backend_query.clone();
            searches.spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, backend.search(&backend_query, k)).await {
                    Ok(Ok(hits)) => Ok(hits),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(_) => Err(format!("search exceeded {timeout:?}")),
                };
                BackendOutcome {
                    kind,
                    elapsed: started.elapsed(),
                    result,
                }
            });
        }

        let mut fusion = ScoreFusion::new();
        let mut reported = HashSet::new();
        let mut failures = Vec::new();
        while let Some(joined) = searches.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "backend search task did not complete");
                    continue;
                }
            };
            reported.insert(outcome.kind);
            match outcome.kind {
                SourceKind::Lexical => trace.latency.lexical = outcome.elapsed,
                SourceKind::Vector => trace.latency.vector = outcome.elapsed,
            }
            match outcome.result {
                Ok(hits) => {
                    debug!(backend = %outcome.kind, hits = hits.len(), "backend returned");
                    fusion.add(outcome.kind, &hits);
                }
                Err(reason) => failures.push((outcome.kind, reason)),
            }
        }
        for kind in [SourceKind::Lexical, SourceKind::Vector] {
            if !reported.contains(&kind) {
                failures.push((kind, "search task aborted".to_string()));
            }
        }
        trace.latency.retrieval = started.elapsed();

        if failures.len() == 2 {
            let reason = failures
                .iter()
                .map(|(kind, reason)| format!("{kind}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RetrievalError::AllBackendsUnavailable { reason });
        }
        for (backend, reason) in failures {
            trace.degrade(RetrievalError::BackendUnavailable { backend, reason });
        }
        Ok(fusion)
    }

    fn attach(&self, candidate: ScoredCandidate) -> Option<RetrievedChunk> {
        let chunk = self.corpus.store().get(&candidate.chunk_id)?;
        Some(RetrievedChunk { candidate, chunk })
    }

    /// `None` if any candidate's chunk has since been removed.
    fn attach_all(&self, candidates: &[ScoredCandidate]) -> Option<Vec<RetrievedChunk>> {
        candidates.iter().map(|c| self.attach(c.clone())).collect()
    }

    fn fail(&self, trace: &mut RequestTrace, error: RetrievalError) -> RetrievalError {
        trace.enter(RequestStage::Failed);
        self.stats.failure();
        warn!(error = %error, stages = ?trace.stages, "retrieval failed");
        error
    }
}

fn top(mut candidates: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    candidates.truncate(k);
    candidates
}
