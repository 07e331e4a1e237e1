use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use recall_core::ScoredCandidate;

use crate::key::CacheKey;

/// A cached, ordered candidate list. Serialized as JSON in the shared tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub candidates: Vec<ScoredCandidate>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: CacheKey, candidates: Vec<ScoredCandidate>, ttl: Duration) -> Self {
        Self {
            key,
            candidates,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Milliseconds since the Unix epoch at which the entry stops being served.
    pub fn expires_at_ms(&self) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        self.created_at.timestamp_millis().saturating_add(ttl_ms)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.expires_at_ms()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{Filter, IndexVersion, Weights};

    fn entry(ttl: Duration) -> CacheEntry {
        let key = CacheKey::new("q", &Filter::new(), 2, Weights::default(), IndexVersion(1));
        let candidates = vec![ScoredCandidate {
            chunk_id: "A".into(),
            raw_lexical_score: Some(1.25),
            raw_vector_score: None,
            fused_score: 0.1 + 0.2,
            rerank_score: Some(-0.5),
        }];
        CacheEntry::new(key, candidates, ttl)
    }

    #[test]
    fn json_payload_is_exact() {
        let original = entry(Duration::from_secs(60));
        let restored = CacheEntry::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(
            restored.candidates[0].fused_score.to_bits(),
            original.candidates[0].fused_score.to_bits()
        );
    }

    #[test]
    fn expiry_follows_ttl() {
        let e = entry(Duration::from_secs(60));
        assert!(!e.is_expired());
        assert!(e.is_expired_at(e.created_at + chrono::Duration::seconds(60)));
        assert!(entry(Duration::ZERO).is_expired());
    }
}
