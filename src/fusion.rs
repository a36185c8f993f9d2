//! Hybrid-retrieval score fusion: combine ranked result lists from the
//! vector index and the BM25 engine into one ranking. Ties are always
//! broken by ascending id.

use std::collections::HashMap;

const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMethod {
    /// Reciprocal rank fusion: `sum(1 / (k_rrf + rank))`, rank-position only.
    ReciprocalRank,
    /// Min-max normalize each list's scores to `[0, 1]`, then weighted sum.
    WeightedSum { weights: [f32; 2] },
    /// Sum of raw scores across lists a document appears in.
    CombSum,
    /// `CombSum` multiplied by the number of lists a document appears in.
    CombMnz,
}

fn min_max_normalize(scores: &[(u64, f32)]) -> HashMap<u64, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, s)| (*id, if range > 0.0 { (*s - min) / range } else { 1.0 }))
        .collect()
}

/// Fuse two ranked result lists (each `(id, score)`, best first) into one.
/// Returns `(id, fused_score)` sorted by descending fused score, ties by
/// ascending id.
pub fn fuse(lists: &[Vec<(u64, f32)>], method: FusionMethod) -> Vec<(u64, f32)> {
    let mut fused: HashMap<u64, f32> = HashMap::new();
    let mut hit_count: HashMap<u64, u32> = HashMap::new();

    match method {
        FusionMethod::ReciprocalRank => {
            for list in lists {
                for (rank, (id, _)) in list.iter().enumerate() {
                    *fused.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
                }
            }
        }
        FusionMethod::WeightedSum { weights } => {
            for (list, &weight) in lists.iter().zip(weights.iter()) {
                let normalized = min_max_normalize(list);
                for (id, score) in normalized {
                    *fused.entry(id).or_insert(0.0) += weight * score;
                }
            }
        }
        FusionMethod::CombSum | FusionMethod::CombMnz => {
            for list in lists {
                for (id, score) in list {
                    *fused.entry(*id).or_insert(0.0) += score;
                    *hit_count.entry(*id).or_insert(0) += 1;
                }
            }
            if method == FusionMethod::CombMnz {
                for (id, score) in fused.iter_mut() {
                    *score *= *hit_count.get(id).unwrap_or(&1) as f32;
                }
            }
        }
    }

    let mut results: Vec<(u64, f32)> = fused.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_agreement_across_lists() {
        let vector_list = vec![(1, 0.9), (2, 0.8), (3, 0.1)];
        let text_list = vec![(2, 12.0), (1, 3.0), (4, 1.0)];
        let fused = fuse(&[vector_list, text_list], FusionMethod::ReciprocalRank);
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[1].0, 2);
    }

    #[test]
    fn weighted_sum_respects_weights() {
        let vector_list = vec![(1, 1.0), (2, 0.0)];
        let text_list = vec![(2, 1.0), (1, 0.0)];
        let fused = fuse(&[vector_list, text_list], FusionMethod::WeightedSum { weights: [0.9, 0.1] });
        assert_eq!(fused[0].0, 1);
    }

    #[test]
    fn combmnz_outranks_combsum_for_multi_list_hits() {
        let a = vec![(1, 1.0), (2, 1.0)];
        let b = vec![(1, 1.0)];
        let comb_sum = fuse(&[a.clone(), b.clone()], FusionMethod::CombSum);
        let comb_mnz = fuse(&[a, b], FusionMethod::CombMnz);
        assert_eq!(comb_sum[0].0, 1);
        let id1_mnz = comb_mnz.iter().find(|(id, _)| *id == 1).unwrap().1;
        let id1_sum = comb_sum.iter().find(|(id, _)| *id == 1).unwrap().1;
        assert!(id1_mnz > id1_sum);
    }

    #[test]
    fn ties_broken_by_ascending_id() {
        let fused = fuse(&[vec![(5, 1.0), (2, 1.0)]], FusionMethod::CombSum);
        assert_eq!(fused[0].0, 2);
        assert_eq!(fused[1].0, 5);
    }
}
