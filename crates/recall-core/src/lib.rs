//! recall-core
//!
//! Domain types, the chunk store, the error taxonomy, collaborator traits and
//! configuration shared by every `recall-*` crate.

#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod normalize;
pub mod store;
pub mod traits;
pub mod types;

pub use config::{Config, Settings};
pub use error::{CacheTier, Error, Result, RetrievalError};
pub use filter::{Clause, Filter};
pub use normalize::normalize_text;
pub use store::ChunkStore;
pub use traits::{EmbeddingProvider, RelevanceScorer, RetrievalBackend};
pub use types::{
    BackendQuery, Chunk, ChunkId, Embedding, IndexVersion, Metadata, MetadataValue, Query,
    ScoredCandidate, SearchHit, SourceKind, Weights,
};
