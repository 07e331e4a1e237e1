use thiserror::Error;

use crate::types::{ChunkId, SourceKind};

/// Errors raised by ingestion, index maintenance and configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stale chunk {id}: stored version {stored} is newer than offered version {offered}")]
    StaleChunk {
        id: ChunkId,
        stored: u64,
        offered: u64,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which result cache tier an error or hit refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CacheTier {
    Local,
    Shared,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Failures a retrieval request can observe.
///
/// Backend, reranker and cache failures are normally recovered inside the
/// orchestrator and reported on the response as degradations. Only
/// `AllBackendsUnavailable` and `InvalidQuery` terminate a request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    /// One retrieval backend errored or exceeded its deadline.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: SourceKind, reason: String },

    /// Both backends failed, or the request deadline elapsed.
    #[error("retrieval unavailable: {reason}")]
    AllBackendsUnavailable { reason: String },

    /// The reranker errored or timed out; results fell back to fused order.
    #[error("reranker unavailable: {reason}")]
    RerankerUnavailable { reason: String },

    /// The query was rejected before any backend was called.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// A cache tier could not be read or written and was bypassed.
    #[error("{tier} cache tier unavailable: {reason}")]
    CacheUnavailable { tier: CacheTier, reason: String },
}

impl RetrievalError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Whether this error, once recovered, lowers the quality of the results.
    ///
    /// Cache bypasses only cost latency.
    pub fn degrades_quality(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::RerankerUnavailable { .. }
        )
    }
}
