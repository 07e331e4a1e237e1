//! Domain types shared by the indices, the caches and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, RetrievalError};
use crate::filter::Filter;

pub type ChunkId = String;

/// A dense vector shared between the chunk store and the vector index.
pub type Embedding = Arc<[f32]>;

/// Ordered metadata mapping attached to each chunk.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
///
/// `Int` and `Float` compare numerically with each other, `Text` compares
/// lexically, `Bool` only supports equality and set membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A retrievable unit of text.
///
/// - `id`: unique, opaque chunk identifier
/// - `text`: the payload scored by both indices
/// - `embedding`: computed on ingestion when absent
/// - `section_path`: headings from the document root down to this chunk
/// - `version`: monotonic per chunk; lower versions are rejected on upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub section_path: Vec<String>,
    #[serde(default)]
    pub source_document_id: String,
    #[serde(default)]
    pub version: u64,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding: None,
            metadata: Metadata::new(),
            section_path: Vec::new(),
            source_document_id: String::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: impl Into<Embedding>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, document_id: impl Into<String>, section_path: Vec<String>) -> Self {
        self.source_document_id = document_id.into();
        self.section_path = section_path;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Structural checks performed before a chunk enters the store.
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidChunk("chunk id must not be empty".into()));
        }
        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(Error::InvalidChunk(format!("chunk {} has an empty embedding", self.id)));
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::InvalidChunk(format!(
                    "chunk {} has a non-finite embedding component",
                    self.id
                )));
            }
        }
        for (key, value) in &self.metadata {
            if let MetadataValue::Float(f) = value {
                if f.is_nan() {
                    return Err(Error::InvalidChunk(format!(
                        "chunk {} metadata field {key} is NaN",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl AsRef<Chunk> for Chunk {
    fn as_ref(&self) -> &Chunk {
        self
    }
}

/// Indicates which backend produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Lexical,
    Vector,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexical => f.write_str("lexical"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// The minimal surface returned by both retrieval backends.
///
/// `id` matches `Chunk::id`. `score` is backend-specific (BM25 or cosine
/// similarity) but higher is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

impl SearchHit {
    pub fn new(id: impl Into<ChunkId>, score: f32, source: SourceKind) -> Self {
        Self {
            id: id.into(),
            score,
            source,
        }
    }
}

/// Monotonic corpus version, bumped after every committed mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexVersion(pub u64);

impl IndexVersion {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Relative contribution of each backend to the fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub lexical: f32,
    pub vector: f32,
}

impl Weights {
    pub const SUM_TOLERANCE: f32 = 1e-4;

    pub fn new(lexical: f32, vector: f32) -> Self {
        Self { lexical, vector }
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        for (name, w) in [("lexical", self.lexical), ("vector", self.vector)] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(RetrievalError::invalid_query(format!(
                    "{name} weight {w} must be within [0, 1]"
                )));
            }
        }
        let sum = self.lexical + self.vector;
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(RetrievalError::invalid_query(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
        }
    }
}

/// A retrieval request.
///
/// `weights` of `None` resolves to the configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filter: Filter,
    pub top_k: usize,
    #[serde(default)]
    pub weights: Option<Weights>,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            filter: Filter::default(),
            top_k,
            weights: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_weights(mut self, lexical: f32, vector: f32) -> Self {
        self.weights = Some(Weights::new(lexical, vector));
        self
    }

    /// Rejects malformed requests before any backend is contacted.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.text.trim().is_empty() {
            return Err(RetrievalError::invalid_query("query text is empty"));
        }
        if self.top_k == 0 {
            return Err(RetrievalError::invalid_query("top_k must be at least 1"));
        }
        if let Some(weights) = &self.weights {
            weights.validate()?;
        }
        self.filter.validate()
    }
}

/// What a retrieval backend receives: normalized text plus the filter to push down.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    pub text: String,
    pub filter: Filter,
}

/// A chunk's standing through fusion and reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: ChunkId,
    pub raw_lexical_score: Option<f32>,
    pub raw_vector_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

impl ScoredCandidate {
    /// Whether both backends returned this chunk.
    pub fn found_by_both(&self) -> bool {
        self.raw_lexical_score.is_some() && self.raw_vector_score.is_some()
    }
}
