use std::sync::Arc;

use recall_core::config::VectorSettings;
use recall_core::{BackendQuery, Chunk, Error, Filter, RetrievalBackend, SourceKind};
use recall_embed::{EmbeddingCache, HashEmbedder};
use recall_vector::{SemanticBackend, VectorIndex};

fn chunk(id: &str, embedding: Vec<f32>) -> Arc<Chunk> {
    Arc::new(Chunk::new(id, format!("text of {id}")).with_embedding(embedding))
}

/// Forces every search through the graph.
fn graph_only() -> VectorSettings {
    VectorSettings {
        exact_scan_threshold: 0,
        ..VectorSettings::default()
    }
}

fn ids(hits: &[recall_core::SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.id.as_str()).collect()
}

#[test]
fn ranks_by_cosine_then_id() {
    let index = VectorIndex::new(2, VectorSettings::default());
    index
        .upsert_many(&[
            chunk("far", vec![0.0, 1.0]),
            chunk("b", vec![1.0, 0.1]),
            chunk("a", vec![1.0, 0.1]),
            chunk("exact", vec![2.0, 0.0]),
        ])
        .expect("upsert");
    let hits = index.search(&[1.0, 0.0], &Filter::new(), 3).expect("search");
    assert_eq!(ids(&hits), ["exact", "a", "b"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits.iter().all(|h| h.source == SourceKind::Vector));
}

#[test]
fn graph_search_matches_exact_scan() {
    let exact = VectorIndex::new(3, VectorSettings::default());
    let graph = VectorIndex::new(3, graph_only());
    let chunks: Vec<Arc<Chunk>> = (0..40u8)
        .map(|i| {
            let t = f32::from(i) / 10.0;
            chunk(&format!("c{i:02}"), vec![t.cos(), t.sin(), 0.5])
        })
        .collect();
    exact.upsert_many(&chunks).expect("upsert");
    graph.upsert_many(&chunks).expect("upsert");
    let query = [1.0, 0.2, 0.5];
    let a = exact.search(&query, &Filter::new(), 5).expect("search");
    let b = graph.search(&query, &Filter::new(), 5).expect("search");
    assert_eq!(ids(&a), ids(&b));
}

#[test]
fn k_beyond_size_returns_everything() {
    let index = VectorIndex::new(2, graph_only());
    index
        .upsert_many(&[chunk("x", vec![1.0, 0.0]), chunk("y", vec![0.0, 1.0])])
        .expect("upsert");
    assert_eq!(index.search(&[1.0, 1.0], &Filter::new(), 10).expect("search").len(), 2);
    assert!(index.search(&[1.0, 1.0], &Filter::new(), 0).expect("search").is_empty());
}

#[test]
fn rejects_dimension_mismatch() {
    let index = VectorIndex::new(3, VectorSettings::default());
    let err = index.upsert(chunk("bad", vec![1.0, 0.0])).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    let err = index.search(&[1.0], &Filter::new(), 1).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 1 }));
    let err = index.upsert(Arc::new(Chunk::new("none", "no vector"))).unwrap_err();
    assert!(matches!(err, Error::InvalidChunk(_)));
    assert!(index.is_empty());
}

#[test]
fn upsert_replaces_and_remove_tombstones() {
    let index = VectorIndex::new(2, graph_only());
    index
        .upsert_many(&[chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])])
        .expect("upsert");
    index.upsert(chunk("a", vec![0.0, 1.0])).expect("replace");
    assert_eq!(index.len(), 2);
    assert_eq!(index.tombstones(), 1);
    let hits = index.search(&[1.0, 0.0], &Filter::new(), 2).expect("search");
    assert_eq!(hits.len(), 2, "the superseded vector is never returned");
    assert!(hits.iter().all(|h| h.score.abs() < 1e-6));

    assert!(index.remove("b"));
    assert!(!index.remove("b"));
    assert!(!index.contains("b"));
    assert_eq!(ids(&index.search(&[0.0, 1.0], &Filter::new(), 5).expect("search")), ["a"]);
}

#[test]
fn compacts_once_tombstones_dominate() {
    let index = VectorIndex::new(2, VectorSettings::default());
    index
        .upsert_many(&[
            chunk("a", vec![1.0, 0.0]),
            chunk("b", vec![0.9, 0.1]),
            chunk("c", vec![0.1, 0.9]),
            chunk("d", vec![0.0, 1.0]),
        ])
        .expect("upsert");
    index.remove("a");
    index.remove("b");
    assert_eq!(index.tombstones(), 2, "half is not above the ratio");
    index.remove("c");
    assert_eq!(index.tombstones(), 0);
    assert_eq!(index.len(), 1);
    assert_eq!(ids(&index.search(&[1.0, 0.0], &Filter::new(), 3).expect("search")), ["d"]);
}

#[test]
fn selective_filter_still_fills_k() {
    let index = VectorIndex::new(2, graph_only());
    let mut chunks = Vec::new();
    for i in 0..30u8 {
        let t = f32::from(i) / 30.0;
        let team = if i % 10 == 0 { "rare" } else { "common" };
        chunks.push(Arc::new(
            Chunk::new(format!("c{i:02}"), "x")
                .with_embedding(vec![1.0 - t, t])
                .with_metadata("team", team),
        ));
    }
    index.upsert_many(&chunks).expect("upsert");
    let rare = Filter::new().equals("team", "rare");
    let hits = index.search(&[1.0, 0.0], &rare, 5).expect("search");
    assert_eq!(ids(&hits), ["c00", "c10", "c20"]);
}

#[tokio::test]
async fn backend_embeds_query_through_cache() {
    let embedder = Arc::new(HashEmbedder::new(64));
    let cache = Arc::new(EmbeddingCache::new(embedder.clone(), 16));
    let index = Arc::new(VectorIndex::new(64, VectorSettings::default()));
    let docs = [
        ("A", "Employees receive 15 vacation days per year."),
        ("C", "The cafeteria opens at 8am."),
    ];
    for (id, text) in docs {
        let embedding = cache.embed(text).await.expect("embed");
        index
            .upsert(Arc::new(Chunk::new(id, text).with_embedding(embedding)))
            .expect("upsert");
    }
    let backend = SemanticBackend::new(index, Arc::clone(&cache));
    assert_eq!(backend.kind(), SourceKind::Vector);
    let query = BackendQuery {
        text: "vacation days".into(),
        filter: Filter::new(),
    };
    let hits = backend.search(&query, 2).await.expect("search");
    assert_eq!(hits[0].id, "A");
    backend.search(&query, 2).await.expect("search");
    assert_eq!(cache.stats().hits, 1, "second query served from the cache");
}
