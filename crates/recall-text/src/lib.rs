//! recall-text
//!
//! Tantivy-backed BM25 index over chunk text, with metadata filters pushed
//! down into the query.

pub mod backend;
pub mod index;
pub mod tantivy_utils;

pub use backend::LexicalBackend;
pub use index::LexicalIndex;
