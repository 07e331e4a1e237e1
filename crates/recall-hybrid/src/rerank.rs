use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use recall_core::{RelevanceScorer, RetrievalError};

use crate::response::RetrievedChunk;

/// Shortlist size handed to the reranker: at least one more than `top_k`.
pub fn shortlist_size(rerank_shortlist: usize, top_k: usize) -> usize {
    rerank_shortlist.max(top_k.saturating_add(1))
}

/// Second-pass scorer over a fused shortlist.
///
/// Every candidate is scored independently and concurrently. Any scoring
/// error, non-finite score or deadline miss makes the whole pass fail with
/// `RerankerUnavailable`; callers then keep the fused order.
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    /// Top `k` of `shortlist` by rerank score, then fused score, then chunk id.
    #[instrument(skip(self, query, shortlist), fields(shortlist = shortlist.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        shortlist: &[RetrievedChunk],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let scoring = try_join_all(
            shortlist
                .iter()
                .map(|c| self.scorer.score(query, &c.chunk.text)),
        );
        let scores = match tokio::time::timeout(self.timeout, scoring).await {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => return Err(unavailable(format!("{e:#}"))),
            Err(_) => return Err(unavailable(format!("scoring exceeded {:?}", self.timeout))),
        };
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(unavailable(format!("scorer returned {bad}")));
        }

        let mut ranked: Vec<RetrievedChunk> = shortlist
            .iter()
            .zip(scores)
            .map(|(c, score)| {
                let mut c = c.clone();
                c.candidate.rerank_score = Some(score);
                c
            })
            .collect();
        ranked.sort_by(|a, b| {
            let (a, b) = (&a.candidate, &b.candidate);
            b.rerank_score
                .unwrap_or(f32::NEG_INFINITY)
                .total_cmp(&a.rerank_score.unwrap_or(f32::NEG_INFINITY))
                .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        ranked.truncate(k);
        debug!(kept = ranked.len(), "reranked");
        Ok(ranked)
    }
}

fn unavailable(reason: String) -> RetrievalError {
    RetrievalError::RerankerUnavailable { reason }
}

/// Scores by lexical overlap: the share of distinct query terms the
/// candidate contains, plus a small bonus for how densely they occur.
/// Needs no model, so it is always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermOverlapScorer;

const DENSITY_WEIGHT: f32 = 0.1;

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl TermOverlapScorer {
    #[allow(clippy::cast_precision_loss)]
    pub fn score_text(query: &str, candidate: &str) -> f32 {
        let wanted: HashSet<String> = terms(query).collect();
        if wanted.is_empty() {
            return 0.0;
        }
        let tokens: Vec<String> = terms(candidate).collect();
        if tokens.is_empty() {
            return 0.0;
        }
        let present: HashSet<&String> = tokens.iter().filter(|t| wanted.contains(*t)).collect();
        let occurrences = tokens.iter().filter(|t| wanted.contains(*t)).count();
        let coverage = present.len() as f32 / wanted.len() as f32;
        let density = occurrences as f32 / tokens.len() as f32;
        (1.0 - DENSITY_WEIGHT) * coverage + DENSITY_WEIGHT * density
    }
}

#[async_trait]
impl RelevanceScorer for TermOverlapScorer {
    async fn score(&self, query: &str, candidate: &str) -> anyhow::Result<f32> {
        Ok(Self::score_text(query, candidate))
    }
}
