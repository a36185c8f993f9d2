//! Candidate ordering and the layer-local best-first search used by both
//! insertion and query.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// A candidate ordered by distance, closest first when popped from a
/// min-heap (`Reverse`-wrapped) or furthest first from a plain max-heap.
#[derive(Debug, Clone, Copy)]
pub(super) struct Candidate {
    pub distance: f32,
    pub slot: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Best-first search within a single layer, starting from `entry_points`.
/// Returns up to `ef` candidates ordered closest-first. `dist` computes the
/// distance from the query to a given slot; `neighbors_of` returns the
/// layer-local adjacency for a slot.
///
/// `keep`, when given, gates only the *result* heap: a neighbor failing
/// `keep` is still pushed onto the frontier and its own neighbors explored,
/// so a run of filtered-out nodes never disconnects the search from live
/// nodes reachable only through them. Without a filter the frontier and
/// result heap share the same ef-bounded admission test as an optimization;
/// with one, the frontier admits every unvisited neighbor unconditionally
/// since the result heap may never fill to `ef`.
pub(super) fn search_layer(
    entry_points: &[u32],
    ef: usize,
    dist: impl Fn(u32) -> f32,
    neighbors_of: impl Fn(u32) -> Vec<u32>,
    keep: Option<&dyn Fn(u32) -> bool>,
) -> Vec<Candidate> {
    let mut visited: HashSet<u32> = entry_points.iter().copied().collect();
    let mut candidates: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
    let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

    let admits = |results: &BinaryHeap<Candidate>, d: f32| {
        results.len() < ef || d < results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY)
    };

    for &ep in entry_points {
        let d = dist(ep);
        candidates.push(std::cmp::Reverse(Candidate { distance: d, slot: ep }));
        if keep.map_or(true, |k| k(ep)) {
            results.push(Candidate { distance: d, slot: ep });
            if results.len() > ef {
                results.pop();
            }
        }
    }

    while let Some(std::cmp::Reverse(c)) = candidates.pop() {
        let furthest = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
        if c.distance > furthest && results.len() >= ef {
            break;
        }
        for neighbor in neighbors_of(c.slot) {
            if !visited.insert(neighbor) {
                continue;
            }
            let d = dist(neighbor);
            if keep.map_or(true, |k| k(neighbor)) && admits(&results, d) {
                results.push(Candidate { distance: d, slot: neighbor });
                if results.len() > ef {
                    results.pop();
                }
            }
            if keep.is_some() || admits(&results, d) {
                candidates.push(std::cmp::Reverse(Candidate { distance: d, slot: neighbor }));
            }
        }
    }

    let mut out: Vec<Candidate> = results.into_vec();
    out.sort();
    out
}
