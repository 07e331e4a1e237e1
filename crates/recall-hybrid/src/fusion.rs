//! Weighted min-max score fusion.

use std::collections::{HashMap, HashSet};

use recall_core::{ChunkId, ScoredCandidate, SearchHit, SourceKind, Weights};

/// Accumulates the ranked lists of both backends, in whatever order they
/// arrive, and fuses them into one ranking.
///
/// Each list is min-max normalized over its own candidates to `[0, 1]`; a
/// list whose scores are all equal (including a single candidate) maps to
/// 1.0. A chunk missing from a list scores 0 for that list. When one list is
/// empty the other carries the full weight.
///
/// Output order: fused score descending, then chunks returned by a list that
/// carries weight (so a weightless list never outranks the minimum of a
/// weighted one), then chunks found by both lists, then chunk id ascending.
#[derive(Debug, Default, Clone)]
pub struct ScoreFusion {
    lexical: HashMap<ChunkId, f32>,
    vector: HashMap<ChunkId, f32>,
}

impl ScoreFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-finite scores are dropped; a repeated id keeps its best score.
    pub fn add(&mut self, kind: SourceKind, hits: &[SearchHit]) -> &mut Self {
        let list = match kind {
            SourceKind::Lexical => &mut self.lexical,
            SourceKind::Vector => &mut self.vector,
        };
        for hit in hits.iter().filter(|h| h.score.is_finite()) {
            list.entry(hit.id.clone())
                .and_modify(|s| *s = s.max(hit.score))
                .or_insert(hit.score);
        }
        self
    }

    pub fn len(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Lexical => self.lexical.len(),
            SourceKind::Vector => self.vector.len(),
        }
    }

    pub fn fuse(&self, weights: Weights) -> Vec<ScoredCandidate> {
        let (w_lexical, w_vector) = match (self.lexical.is_empty(), self.vector.is_empty()) {
            (true, true) => return Vec::new(),
            (false, true) => (1.0, 0.0),
            (true, false) => (0.0, 1.0),
            (false, false) => (weights.lexical, weights.vector),
        };
        let lexical = Normalizer::over(&self.lexical);
        let vector = Normalizer::over(&self.vector);

        let ids: HashSet<&ChunkId> = self.lexical.keys().chain(self.vector.keys()).collect();
        let mut fused: Vec<ScoredCandidate> = ids
            .into_iter()
            .map(|id| {
                let raw_lexical_score = self.lexical.get(id).copied();
                let raw_vector_score = self.vector.get(id).copied();
                let fused_score = w_lexical * raw_lexical_score.map_or(0.0, |s| lexical.apply(s))
                    + w_vector * raw_vector_score.map_or(0.0, |s| vector.apply(s));
                ScoredCandidate {
                    chunk_id: id.clone(),
                    raw_lexical_score,
                    raw_vector_score,
                    fused_score,
                    rerank_score: None,
                }
            })
            .collect();
        fused.sort_by(|a, b| {
            b.fused_score
                .total_cmp(&a.fused_score)
                .then_with(|| weighted(b, w_lexical, w_vector).cmp(&weighted(a, w_lexical, w_vector)))
                .then_with(|| b.found_by_both().cmp(&a.found_by_both()))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused
    }
}

/// Fuses two complete ranked lists.
pub fn fuse(lexical: &[SearchHit], vector: &[SearchHit], weights: Weights) -> Vec<ScoredCandidate> {
    let mut fusion = ScoreFusion::new();
    fusion.add(SourceKind::Lexical, lexical).add(SourceKind::Vector, vector);
    fusion.fuse(weights)
}

fn weighted(c: &ScoredCandidate, w_lexical: f32, w_vector: f32) -> bool {
    (c.raw_lexical_score.is_some() && w_lexical > 0.0) || (c.raw_vector_score.is_some() && w_vector > 0.0)
}

struct Normalizer {
    min: f32,
    span: f32,
}

impl Normalizer {
    fn over(scores: &HashMap<ChunkId, f32>) -> Self {
        let (min, max) = scores
            .values()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        Self { min, span: max - min }
    }

    fn apply(&self, score: f32) -> f32 {
        if self.span > 0.0 && self.span.is_finite() {
            ((score - self.min) / self.span).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}
