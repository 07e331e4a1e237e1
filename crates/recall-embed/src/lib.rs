//! recall-embed
//!
//! Embedding providers (candle BGE-M3 and a deterministic hashing embedder)
//! and the LRU embedding cache shared by ingestion and queries.

pub mod cache;
pub mod device;
pub mod hashing;
pub mod model;
pub mod pool;
pub mod tokenize;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use recall_core::EmbeddingProvider;

pub use cache::{EmbeddingCache, EmbeddingCacheStats};
pub use hashing::HashEmbedder;
pub use model::{resolve_model_dir, BgeM3Embedder};
pub use pool::masked_mean_l2;

/// Dimension of the hashing embedder when it stands in for BGE-M3.
pub const HASH_EMBEDDER_DIM: usize = 1024;

/// BGE-M3 unless `APP_USE_FAKE_EMBEDDINGS` is `1`/`true`, in which case the
/// hashing embedder is used so nothing needs to be downloaded.
pub fn default_provider() -> Result<Arc<dyn EmbeddingProvider>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if use_fake {
        info!(dim = HASH_EMBEDDER_DIM, "using hashing embedder");
        return Ok(Arc::new(HashEmbedder::new(HASH_EMBEDDER_DIM)));
    }
    Ok(Arc::new(BgeM3Embedder::new()?))
}
