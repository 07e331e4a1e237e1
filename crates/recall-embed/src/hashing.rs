use anyhow::Result;
use async_trait::async_trait;
use std::hash::Hasher;
use twox_hash::XxHash64;

use recall_core::EmbeddingProvider;

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Each lowercased alphanumeric token adds a signed unit to one of `dim`
/// buckets; the vector is then L2-normalized. Texts sharing tokens have
/// positive cosine similarity. Used offline and in tests.
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model_id: format!("hash:xxh64:d{dim}"),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.to_lowercase().as_bytes());
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed_text("Vacation days."), e.embed_text("vacation DAYS"));
    }

    #[test]
    fn overlap_raises_similarity() {
        let e = HashEmbedder::new(256);
        let q = e.embed_text("vacation days");
        let near = e.embed_text("employees receive 15 vacation days");
        let far = e.embed_text("the cafeteria opens at 8am");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert!(e.embed_text("  ").iter().all(|x| *x == 0.0));
    }
}
