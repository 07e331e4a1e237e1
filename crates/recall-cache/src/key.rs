use serde::{Deserialize, Serialize};
use std::fmt;

use recall_core::{Filter, IndexVersion, Weights};

/// Stable identity of a retrieval request against one corpus version.
///
/// The digest is blake3 over a length-prefixed encoding of the normalized
/// query text, the canonical filter, `top_k`, the weight bit patterns and the
/// index version. Length prefixes keep field boundaries unambiguous, so
/// `("ab", "c")` and `("a", "bc")` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub digest: String,
    pub index_version: IndexVersion,
}

impl CacheKey {
    /// `normalized_text` must already be normalized; see [`recall_core::normalize_text`].
    pub fn new(
        normalized_text: &str,
        filter: &Filter,
        top_k: usize,
        weights: Weights,
        index_version: IndexVersion,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        write_field(&mut hasher, normalized_text.as_bytes());
        write_field(&mut hasher, filter.canonical().as_bytes());
        write_field(&mut hasher, &(top_k as u64).to_le_bytes());
        write_field(&mut hasher, &weights.lexical.to_bits().to_le_bytes());
        write_field(&mut hasher, &weights.vector.to_bits().to_le_bytes());
        write_field(&mut hasher, &index_version.get().to_le_bytes());
        Self {
            digest: hasher.finalize().to_hex().to_string(),
            index_version,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", &self.digest[..12.min(self.digest.len())], self.index_version)
    }
}
