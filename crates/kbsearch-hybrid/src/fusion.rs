//! Merging of vector and keyword result lists.
//!
//! Candidates are unioned by chunk id. A candidate missing from one list scores
//! 0 there and has no rank. Each score column is min-max normalized over the
//! merged set before weighting; RRF uses ranks only.

use std::collections::HashMap;

use kbsearch_core::{Chunk, ChunkId, FusionMethod, ScoredCandidate};

pub const DEFAULT_RRF_K: f32 = 60.0;

/// Min-max normalization to `[0, 1]`. A constant column maps to 0.5 everywhere.
pub fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !(range > 0.0) {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionEngine {
    pub rrf_k: f32,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self { rrf_k: DEFAULT_RRF_K }
    }
}

impl FusionEngine {
    pub fn new(rrf_k: f32) -> Self {
        Self { rrf_k }
    }

    /// Fuses both lists into the full merged set, best first, ties by chunk id.
    /// Input lists are expected best first; their positions are the ranks.
    pub fn fuse(
        &self,
        vector: &[(Chunk, f32)],
        bm25: &[(Chunk, f32)],
        vector_weight: f32,
        bm25_weight: f32,
        method: FusionMethod,
    ) -> Vec<ScoredCandidate> {
        let mut merged: Vec<ScoredCandidate> = Vec::with_capacity(vector.len() + bm25.len());
        let mut by_id: HashMap<ChunkId, usize> = HashMap::new();

        for (rank, (chunk, score)) in vector.iter().enumerate() {
            if by_id.contains_key(&chunk.id) {
                continue;
            }
            by_id.insert(chunk.id.clone(), merged.len());
            merged.push(ScoredCandidate::from_vector(chunk.clone(), *score, rank));
        }
        for (rank, (chunk, score)) in bm25.iter().enumerate() {
            match by_id.get(&chunk.id) {
                Some(&i) => {
                    let c = &mut merged[i];
                    if c.bm25_rank.is_none() {
                        c.bm25_score = Some(*score);
                        c.bm25_rank = Some(rank);
                    }
                }
                None => {
                    by_id.insert(chunk.id.clone(), merged.len());
                    merged.push(ScoredCandidate::from_bm25(chunk.clone(), *score, rank));
                }
            }
        }

        match method {
            FusionMethod::Weighted => {
                let v_norm = min_max_normalize(&column(&merged, |c| c.vector_score));
                let b_norm = min_max_normalize(&column(&merged, |c| c.bm25_score));
                for (i, c) in merged.iter_mut().enumerate() {
                    c.hybrid_score = Some(vector_weight * v_norm[i] + bm25_weight * b_norm[i]);
                }
            }
            FusionMethod::Rrf => {
                let k = self.rrf_k;
                let rrf = |rank: Option<usize>| rank.map_or(0.0, |r| 1.0 / (k + r as f32 + 1.0));
                for c in &mut merged {
                    let score = vector_weight * rrf(c.vector_rank) + bm25_weight * rrf(c.bm25_rank);
                    c.hybrid_score = Some(score);
                }
            }
        }

        merged.sort_by(|a, b| {
            let (sa, sb) = (a.hybrid_score.unwrap_or(0.0), b.hybrid_score.unwrap_or(0.0));
            sb.total_cmp(&sa).then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        merged
    }
}

/// One score per candidate, 0 where the candidate is absent from that list.
fn column<F>(merged: &[ScoredCandidate], score: F) -> Vec<f32>
where
    F: Fn(&ScoredCandidate) -> Option<f32>,
{
    merged.iter().map(|c| score(c).unwrap_or(0.0)).collect()
}
