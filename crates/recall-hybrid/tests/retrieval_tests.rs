use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recall_cache::{CacheEntry, CacheKey, MemoryTier, SharedTier};
use recall_core::{
    BackendQuery, CacheTier, Chunk, Error, Filter, MetadataValue, Query, RelevanceScorer,
    RetrievalBackend, RetrievalError, SearchHit, Settings, SourceKind,
};
use recall_embed::HashEmbedder;
use recall_hybrid::{Corpus, RequestStage, RetrievalEngine, RetrievalEngineBuilder};

const DIM: usize = 64;

fn settings() -> Settings {
    Settings {
        backend_timeout_ms: 200,
        request_timeout_ms: 1_000,
        rerank_timeout_ms: 200,
        ..Settings::default()
    }
}

async fn corpus() -> Arc<Corpus> {
    let corpus = Arc::new(Corpus::new(Arc::new(HashEmbedder::new(DIM)), &settings()).unwrap());
    corpus
        .upsert_chunks(vec![
            Chunk::new("A", "vacation policy 15 days").with_metadata("department", "hr"),
            Chunk::new("B", "remote work 3 days").with_metadata("department", "it"),
            Chunk::new("C", "benefits overview").with_metadata("department", "hr"),
        ])
        .await
        .unwrap();
    corpus
}

fn engine(corpus: Arc<Corpus>) -> RetrievalEngineBuilder {
    RetrievalEngine::builder(corpus).settings(settings())
}

fn vacation(top_k: usize) -> Query {
    Query::new("vacation days", top_k).with_weights(0.7, 0.3)
}

/// Returns fixed hits after a delay, or fails.
struct StubBackend {
    kind: SourceKind,
    hits: Vec<(&'static str, f32)>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl StubBackend {
    fn new(kind: SourceKind, hits: &[(&'static str, f32)]) -> Self {
        Self {
            kind,
            hits: hits.to_vec(),
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl RetrievalBackend for StubBackend {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, _query: &BackendQuery, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            anyhow::bail!("index offline");
        }
        Ok(self
            .hits
            .iter()
            .take(k)
            .map(|(id, score)| SearchHit::new(*id, *score, self.kind))
            .collect())
    }
}

struct FailingScorer;

#[async_trait]
impl RelevanceScorer for FailingScorer {
    async fn score(&self, _query: &str, _candidate: &str) -> anyhow::Result<f32> {
        anyhow::bail!("reranker model not loaded")
    }
}

/// Scores correctly, but only after `delay`.
struct SlowScorer {
    delay: Duration,
}

#[async_trait]
impl RelevanceScorer for SlowScorer {
    async fn score(&self, _query: &str, _candidate: &str) -> anyhow::Result<f32> {
        tokio::time::sleep(self.delay).await;
        Ok(1.0)
    }
}

struct BrokenTier;

#[async_trait]
impl SharedTier for BrokenTier {
    fn name(&self) -> &str {
        "broken"
    }
    async fn get(&self, _key: &CacheKey) -> anyhow::Result<Option<Arc<CacheEntry>>> {
        anyhow::bail!("shared cache unreachable")
    }
    async fn put(&self, _entry: Arc<CacheEntry>) -> anyhow::Result<()> {
        anyhow::bail!("shared cache unreachable")
    }
}

#[tokio::test]
async fn vacation_policy_ranks_first() {
    let engine = engine(corpus().await).build().unwrap();
    let response = engine.retrieve(vacation(2)).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.ids()[0], "A");
    assert!(!response.cache_hit);
    assert!(!response.degraded);
    assert_eq!(
        response.stages,
        [
            RequestStage::Received,
            RequestStage::CacheCheck,
            RequestStage::CacheMiss,
            RequestStage::Retrieving,
            RequestStage::Fusing,
            RequestStage::Reranking,
            RequestStage::Caching,
            RequestStage::Done,
        ]
    );
    let top = &response.results[0];
    assert!(top.candidate.raw_lexical_score.is_some());
    assert!(top.candidate.rerank_score.is_some());
    assert_eq!(top.chunk.text, "vacation policy 15 days");
    assert!(response
        .candidates()
        .all(|c| c.raw_lexical_score.is_some() || c.raw_vector_score.is_some()));
}

#[tokio::test]
async fn vector_timeout_degrades_to_lexical_order() {
    let slow = StubBackend::new(SourceKind::Vector, &[("C", 0.9)]).delayed(Duration::from_secs(5));
    let engine = engine(corpus().await).vector_backend(Arc::new(slow)).build().unwrap();
    let response = engine.retrieve(vacation(2)).await.unwrap();
    assert_eq!(response.ids(), ["A", "B"]);
    assert!(response.degraded);
    assert!(matches!(
        response.degradations.as_slice(),
        [RetrievalError::BackendUnavailable { backend: SourceKind::Vector, .. }]
    ));
    assert!(response.candidates().all(|c| c.raw_vector_score.is_none()));
    assert!(response.latency.retrieval < Duration::from_secs(1));
}

#[tokio::test]
async fn both_backends_failing_fails_the_request() {
    let engine = engine(corpus().await)
        .lexical_backend(Arc::new(StubBackend::new(SourceKind::Lexical, &[]).failing()))
        .vector_backend(Arc::new(StubBackend::new(SourceKind::Vector, &[]).failing()))
        .build()
        .unwrap();
    let err = engine.retrieve(vacation(2)).await.unwrap_err();
    assert!(matches!(err, RetrievalError::AllBackendsUnavailable { .. }));
    assert_eq!(engine.stats().failures, 1);
}

#[tokio::test]
async fn request_deadline_cancels_retrieval() {
    let mut slow_settings = settings();
    slow_settings.backend_timeout_ms = 5_000;
    slow_settings.request_timeout_ms = 100;
    let slow = |kind| Arc::new(StubBackend::new(kind, &[("A", 1.0)]).delayed(Duration::from_secs(5)));
    let engine = RetrievalEngine::builder(corpus().await)
        .settings(slow_settings)
        .lexical_backend(slow(SourceKind::Lexical))
        .vector_backend(slow(SourceKind::Vector))
        .build()
        .unwrap();
    let started = std::time::Instant::now();
    let err = engine.retrieve(vacation(2)).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(err, RetrievalError::AllBackendsUnavailable { .. }));
    assert!(engine.cache().local().is_empty(), "nothing cached from a cancelled request");
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let engine = engine(corpus().await).build().unwrap();
    let first = engine.retrieve(vacation(2)).await.unwrap();
    let second = engine.retrieve(vacation(2)).await.unwrap();
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.cache_tier, Some(CacheTier::Local));
    assert_eq!(first.results, second.results);
    for (a, b) in first.candidates().zip(second.candidates()) {
        assert_eq!(a.fused_score.to_bits(), b.fused_score.to_bits());
        assert_eq!(a.rerank_score.map(f32::to_bits), b.rerank_score.map(f32::to_bits));
    }
    assert_eq!(
        second.stages,
        [
            RequestStage::Received,
            RequestStage::CacheCheck,
            RequestStage::CacheHit,
            RequestStage::Done
        ]
    );
    let stats = engine.stats();
    assert_eq!((stats.requests, stats.misses, stats.local_hits), (2, 1, 1));

    let spaced = engine
        .retrieve(Query::new("  vacation   days ", 2).with_weights(0.7, 0.3))
        .await
        .unwrap();
    assert!(spaced.cache_hit, "whitespace differences share a cache entry");
}

#[tokio::test]
async fn shared_tier_hit_backfills_local() {
    let corpus = corpus().await;
    let shared = Arc::new(MemoryTier::new(64, Duration::from_secs(60)));
    let first = engine(Arc::clone(&corpus)).shared_tier(shared.clone()).build().unwrap();
    let second = engine(corpus).shared_tier(shared).build().unwrap();

    let computed = first.retrieve(vacation(2)).await.unwrap();
    let shared_hit = second.retrieve(vacation(2)).await.unwrap();
    assert_eq!(shared_hit.cache_tier, Some(CacheTier::Shared));
    assert_eq!(shared_hit.results, computed.results);
    let local_hit = second.retrieve(vacation(2)).await.unwrap();
    assert_eq!(local_hit.cache_tier, Some(CacheTier::Local));
}

#[tokio::test]
async fn corpus_update_invalidates_cached_results() {
    let engine = engine(corpus().await).build().unwrap();
    let before = engine.retrieve(vacation(2)).await.unwrap();
    let version = engine
        .upsert_chunk(Chunk::new("D", "vacation days carry over"))
        .await
        .unwrap();
    assert!(version > before.index_version);
    let after = engine.retrieve(vacation(2)).await.unwrap();
    assert!(!after.cache_hit);
    assert_eq!(after.index_version, version);

    engine.delete_chunk("D").await.unwrap();
    let deleted = engine.retrieve(vacation(5)).await.unwrap();
    assert!(!deleted.cache_hit);
    assert!(!deleted.ids().contains(&"D"));
}

#[tokio::test]
async fn reranker_failure_falls_back_to_fused_order() {
    let corpus = corpus().await;
    let plain = engine(Arc::clone(&corpus)).without_reranker().build().unwrap();
    let failing = engine(corpus).reranker(Arc::new(FailingScorer)).build().unwrap();

    let expected = plain.retrieve(vacation(2)).await.unwrap();
    assert!(!expected.degraded, "running without a reranker is not a degradation");
    assert!(!expected.stages.contains(&RequestStage::Reranking));
    let response = failing.retrieve(vacation(2)).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.ids(), expected.ids());
    assert!(response.degraded);
    assert!(response
        .degradations
        .iter()
        .any(|e| matches!(e, RetrievalError::RerankerUnavailable { .. })));
    assert!(response.candidates().all(|c| c.rerank_score.is_none()));
    assert!(!response.stages.contains(&RequestStage::Caching));

    let again = failing.retrieve(vacation(2)).await.unwrap();
    assert!(!again.cache_hit, "degraded results are not cached");
}

#[tokio::test]
async fn slow_reranker_times_out_to_fused_order() {
    let corpus = corpus().await;
    let plain = engine(Arc::clone(&corpus)).without_reranker().build().unwrap();
    let slow = engine(corpus)
        .reranker(Arc::new(SlowScorer {
            delay: Duration::from_secs(5),
        }))
        .build()
        .unwrap();

    let expected = plain.retrieve(vacation(2)).await.unwrap();
    let started = std::time::Instant::now();
    let response = slow.retrieve(vacation(2)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.ids(), expected.ids());
    assert!(response.candidates().all(|c| c.rerank_score.is_none()));
    assert!(response.degraded);
    assert!(response
        .degradations
        .iter()
        .any(|e| matches!(e, RetrievalError::RerankerUnavailable { .. })));
}

#[tokio::test]
async fn invalid_queries_never_reach_backends() {
    let lexical = Arc::new(StubBackend::new(SourceKind::Lexical, &[("A", 1.0)]));
    let vector = Arc::new(StubBackend::new(SourceKind::Vector, &[("A", 1.0)]));
    let engine = engine(corpus().await)
        .lexical_backend(lexical.clone())
        .vector_backend(vector.clone())
        .build()
        .unwrap();
    let bad = [
        Query::new("vacation", 0),
        Query::new("   ", 3),
        Query::new("vacation", 3).with_weights(0.6, 0.6),
        Query::new("vacation", 3).with_filter(Filter::new().any_of("department", Vec::<String>::new())),
    ];
    for query in bad {
        let err = engine.retrieve(query).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery { .. }), "{err}");
    }
    assert_eq!(lexical.calls.load(Ordering::SeqCst), 0);
    assert_eq!(vector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn arrival_order_does_not_change_ranking() {
    let lexical_hits = [("A", 7.0), ("B", 3.0), ("C", 3.0)];
    let vector_hits = [("C", 0.8), ("B", 0.6), ("A", 0.2)];
    let mut rankings = Vec::new();
    for (lexical_delay, vector_delay) in [(0, 60), (60, 0)] {
        let engine = engine(corpus().await)
            .without_reranker()
            .lexical_backend(Arc::new(
                StubBackend::new(SourceKind::Lexical, &lexical_hits).delayed(Duration::from_millis(lexical_delay)),
            ))
            .vector_backend(Arc::new(
                StubBackend::new(SourceKind::Vector, &vector_hits).delayed(Duration::from_millis(vector_delay)),
            ))
            .build()
            .unwrap();
        let response = engine.retrieve(Query::new("anything", 3)).await.unwrap();
        rankings.push(response.candidates().cloned().collect::<Vec<_>>());
    }
    assert_eq!(rankings[0], rankings[1]);
}

#[tokio::test]
async fn shared_tier_outage_is_bypassed() {
    let engine = engine(corpus().await).shared_tier(Arc::new(BrokenTier)).build().unwrap();
    let first = engine.retrieve(vacation(2)).await.unwrap();
    assert!(!first.degraded, "cache bypass does not lower result quality");
    assert!(first
        .degradations
        .iter()
        .all(|e| matches!(e, RetrievalError::CacheUnavailable { tier: CacheTier::Shared, .. })));
    assert_eq!(first.degradations.len(), 2, "lookup and write both bypassed");
    let second = engine.retrieve(vacation(2)).await.unwrap();
    assert_eq!(second.cache_tier, Some(CacheTier::Local));
}

#[tokio::test]
async fn filter_is_pushed_to_both_backends() {
    let engine = engine(corpus().await).build().unwrap();
    let query = Query::new("vacation days", 5).with_filter(Filter::new().equals("department", "hr"));
    let response = engine.retrieve(query).await.unwrap();
    assert!(!response.ids().contains(&"B"));
    assert!(response
        .results
        .iter()
        .all(|r| r.chunk.metadata.get("department") == Some(&MetadataValue::from("hr"))));
}

#[tokio::test]
async fn small_corpus_returns_every_eligible_chunk() {
    let engine = engine(corpus().await).without_reranker().build().unwrap();
    let response = engine.retrieve(Query::new("days benefits", 10)).await.unwrap();
    let mut ids = response.ids();
    ids.sort_unstable();
    assert_eq!(ids, ["A", "B", "C"]);
}

#[tokio::test]
async fn ingestion_rejects_bad_chunks() {
    let corpus = corpus().await;
    let version = corpus.index_version();

    let stale = corpus.upsert_chunk(Chunk::new("A", "older").with_version(0)).await;
    assert!(stale.is_ok(), "equal versions replace");
    corpus
        .upsert_chunk(Chunk::new("A", "newer").with_version(2))
        .await
        .unwrap();
    let err = corpus
        .upsert_chunk(Chunk::new("A", "oldest").with_version(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleChunk { stored: 2, offered: 1, .. }));

    let err = corpus
        .upsert_chunk(Chunk::new("E", "wrong size").with_embedding(vec![1.0, 0.0]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: DIM, actual: 2 }));
    assert!(!corpus.store().contains("E"));

    let err = corpus.delete_chunk("missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(corpus.index_version().get(), version.get() + 2);
}

#[tokio::test]
async fn rejected_batch_leaves_corpus_untouched() {
    let corpus = corpus().await;
    let version = corpus.index_version();
    let docs = corpus.lexical().num_docs();

    let err = corpus
        .upsert_chunks(vec![
            Chunk::new("X", "expense reports").with_version(2),
            Chunk::new("X", "expense reports draft").with_version(1),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidChunk(_)));

    let err = corpus
        .upsert_chunks(vec![
            Chunk::new("Y", "travel policy"),
            Chunk::new("A", "vacation policy").with_version(0),
            Chunk::new("C", "benefits").with_version(0),
            Chunk::new("Z", "broken").with_embedding(vec![0.5; 3]),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    for id in ["X", "Y", "Z"] {
        assert!(!corpus.store().contains(id));
        assert!(!corpus.vector().contains(id));
    }
    assert_eq!(corpus.store().get("A").unwrap().text, "vacation policy 15 days");
    assert_eq!(corpus.lexical().num_docs(), docs);
    assert_eq!(corpus.vector().len(), 3);
    assert_eq!(corpus.index_version(), version);
}

#[tokio::test]
async fn on_disk_engines_share_results_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut on_disk = settings();
    on_disk.lexical.index_dir = Some(dir.path().join("tantivy").to_string_lossy().into_owned());
    on_disk.result_cache.shared_path = Some(dir.path().join("cache/results.db").to_string_lossy().into_owned());

    let corpus = Arc::new(Corpus::new(Arc::new(HashEmbedder::new(DIM)), &on_disk).unwrap());
    corpus
        .upsert_chunks(vec![
            Chunk::new("A", "vacation policy 15 days"),
            Chunk::new("B", "remote work 3 days"),
        ])
        .await
        .unwrap();
    assert!(dir.path().join("tantivy").read_dir().unwrap().next().is_some());

    let writer = RetrievalEngine::builder(Arc::clone(&corpus)).settings(on_disk.clone()).build().unwrap();
    let reader = RetrievalEngine::builder(corpus).settings(on_disk).build().unwrap();
    let computed = writer.retrieve(vacation(2)).await.unwrap();
    assert_eq!(computed.ids()[0], "A");
    let shared = reader.retrieve(vacation(2)).await.unwrap();
    assert_eq!(shared.cache_tier, Some(CacheTier::Shared));
    assert_eq!(shared.results, computed.results);
}
