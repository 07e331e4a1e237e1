//! recall-hybrid
//!
//! Hybrid retrieval: concurrent lexical and semantic search, weighted score
//! fusion, reranking and a two-tier result cache, plus the corpus mutation
//! paths that keep the indices and caches coherent.

pub mod corpus;
pub mod engine;
pub mod fusion;
pub mod rerank;
pub mod response;

pub use corpus::Corpus;
pub use engine::{RetrievalEngine, RetrievalEngineBuilder};
pub use fusion::{fuse, ScoreFusion};
pub use rerank::{shortlist_size, Reranker, TermOverlapScorer};
pub use response::{
    EngineStatsSnapshot, LatencyBreakdown, RequestStage, RetrievalResponse, RetrievedChunk,
};
