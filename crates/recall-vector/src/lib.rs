//! Dense retrieval: an HNSW index over chunk embeddings and the backend that
//! embeds queries before searching it.

pub mod backend;
pub mod index;

pub use backend::SemanticBackend;
pub use index::{cosine, VectorIndex};
