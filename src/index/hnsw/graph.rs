//! Per-layer adjacency storage and the neighbor-selection heuristic used
//! both when a node is first inserted and when pruning a neighbor's list
//! after a new bidirectional edge pushes it past its cap.

use smallvec::SmallVec;
use std::collections::HashMap;

use super::search::Candidate;

pub(super) type NeighborList = SmallVec<[u32; 16]>;

/// One level of the graph: slot -> neighbor slots.
#[derive(Debug, Default, Clone)]
pub(super) struct Layer {
    pub(super) adjacency: HashMap<u32, NeighborList>,
}

impl Layer {
    pub(super) fn neighbors(&self, slot: u32) -> Vec<u32> {
        self.adjacency.get(&slot).map(|n| n.to_vec()).unwrap_or_default()
    }

    pub(super) fn set_neighbors(&mut self, slot: u32, neighbors: NeighborList) {
        self.adjacency.insert(slot, neighbors);
    }

    pub(super) fn add_edge(&mut self, slot: u32, neighbor: u32) {
        let list = self.adjacency.entry(slot).or_default();
        if !list.contains(&neighbor) {
            list.push(neighbor);
        }
    }

    pub(super) fn remove_edge(&mut self, slot: u32, neighbor: u32) {
        if let Some(list) = self.adjacency.get_mut(&slot) {
            list.retain(|n| *n != neighbor);
        }
    }
}

/// Select up to `m` neighbors from `candidates` (any order) using the RND
/// diversity heuristic: the closest candidate is kept unconditionally, and
/// each subsequent candidate `X_j` (in ascending distance-to-query order)
/// is kept only if `dist(X_q, X_j) < dist(X_i, X_j)` for every neighbor
/// `X_i` already selected — this preserves the small-world shortcuts a
/// plain nearest-`m` cut would prune away. If the heuristic alone leaves
/// fewer than `m` selected, the remaining slots are filled with the
/// closest unselected candidates.
pub(super) fn select_neighbors(mut candidates: Vec<Candidate>, m: usize, inter_dist: impl Fn(u32, u32) -> f32) -> NeighborList {
    candidates.sort();
    if candidates.is_empty() || m == 0 {
        return NeighborList::new();
    }

    let mut selected: NeighborList = NeighborList::new();
    selected.push(candidates[0].slot);

    for c in candidates.iter().skip(1) {
        if selected.len() >= m {
            break;
        }
        let admitted = selected.iter().all(|&s| c.distance < inter_dist(c.slot, s));
        if admitted {
            selected.push(c.slot);
        }
    }

    if selected.len() < m {
        for c in &candidates {
            if selected.len() >= m {
                break;
            }
            if !selected.contains(&c.slot) {
                selected.push(c.slot);
            }
        }
    }

    selected
}

/// Re-rank `slot`'s neighbor list against fresh distances and trim to `cap`
/// by re-applying [`select_neighbors`]'s diversity heuristic.
pub(super) fn prune_neighbors(
    neighbors: &NeighborList,
    cap: usize,
    dist_to_owner: impl Fn(u32) -> f32,
    inter_dist: impl Fn(u32, u32) -> f32,
) -> NeighborList {
    if neighbors.len() <= cap {
        return neighbors.clone();
    }
    let scored: Vec<Candidate> = neighbors.iter().map(|&slot| Candidate { distance: dist_to_owner(slot), slot }).collect();
    select_neighbors(scored, cap, inter_dist)
}
