//! Incremental HNSW index: insert, filtered search, and tombstone-based
//! delete over a graph whose vectors live in the index's own arena (an
//! `f32` SoA buffer), separate from the on-disk vector store the database
//! facade owns.
//!
//! State machine per id: `Uninserted -> Live -> Tombstoned -> (compact)
//! physically removed`. A tombstoned node's edges are left in place and
//! filtered out during traversal rather than eagerly repaired, matching
//! the "no suspension inside inner kernels" rule — repair happens lazily
//! at query time and eagerly only during `compact`.

mod graph;
mod search;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::Metric;
use crate::error::{Error, Result};
use crate::simd;

use graph::{prune_neighbors, select_neighbors, Layer, NeighborList};
use search::{search_layer, Candidate};

const NONE_SLOT: u32 = u32::MAX;

/// Construction/search parameters (mirrors [`crate::config::HnswConfig`]).
#[derive(Debug, Clone)]
pub struct HnswParams {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub ml: f64,
}

impl From<&crate::config::HnswConfig> for HnswParams {
    fn from(cfg: &crate::config::HnswConfig) -> Self {
        Self {
            m: cfg.m,
            m_max0: cfg.m * 2,
            ef_construction: cfg.ef_construction,
            ef_search: cfg.ef_search,
            ml: 1.0 / (cfg.m as f64).ln().max(f64::MIN_POSITIVE),
        }
    }
}

struct Node {
    id: u64,
    level: u8,
    tombstoned: bool,
}

/// A live, incrementally-built HNSW graph over `f32` vectors.
pub struct HnswIndex {
    dimension: usize,
    metric: Metric,
    params: HnswParams,
    vectors: Vec<f32>,
    nodes: Vec<Node>,
    slot_of_id: std::collections::HashMap<u64, u32>,
    layers: Vec<Layer>,
    entry_point: AtomicU32,
    max_level: u8,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: Metric, params: HnswParams) -> Self {
        Self {
            dimension,
            metric,
            params,
            vectors: Vec::new(),
            nodes: Vec::new(),
            slot_of_id: std::collections::HashMap::new(),
            layers: vec![Layer::default()],
            entry_point: AtomicU32::new(NONE_SLOT),
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.tombstoned).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every directed edge `(from, to)` in the graph, by external id, across
    /// all levels. Exposed for symmetry and consistency testing.
    pub fn edges(&self) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        for layer in &self.layers {
            for (&slot, neighbors) in &layer.adjacency {
                let from = self.nodes[slot as usize].id;
                for &n in neighbors {
                    out.push((from, self.nodes[n as usize].id));
                }
            }
        }
        out
    }

    fn vector_at(&self, slot: u32) -> &[f32] {
        let start = slot as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn distance(&self, query: &[f32], slot: u32) -> f32 {
        let v = self.vector_at(slot);
        match self.metric {
            Metric::L2 => simd::l2(query, v),
            Metric::Cosine => simd::cosine_distance(query, v),
            Metric::Dot => -simd::dot(query, v),
        }
    }

    fn distance_between(&self, a: u32, b: u32) -> f32 {
        self.distance(self.vector_at(a), b)
    }

    fn assign_level(&self) -> u8 {
        let mut rng = rand::thread_rng();
        let draw: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-draw.ln() * self.params.ml).floor();
        level.clamp(0.0, 63.0) as u8
    }

    fn entry_point_slot(&self) -> Option<u32> {
        let slot = self.entry_point.load(Ordering::Relaxed);
        if slot == NONE_SLOT {
            None
        } else {
            Some(slot)
        }
    }

    /// Insert a new id with its vector. Errors if `id` is already present
    /// or the dimension doesn't match.
    pub fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if self.slot_of_id.contains_key(&id) {
            return Err(Error::conflict(format!("id {id} already present in hnsw index")));
        }

        let slot = self.nodes.len() as u32;
        self.vectors.extend_from_slice(vector);
        let level = self.assign_level();
        self.nodes.push(Node { id, level, tombstoned: false });
        self.slot_of_id.insert(id, slot);
        while self.layers.len() <= level as usize {
            self.layers.push(Layer::default());
        }

        let Some(mut cur) = self.entry_point_slot() else {
            self.entry_point.store(slot, Ordering::Relaxed);
            self.max_level = level;
            return Ok(());
        };

        // Phase 1: greedy descent from the top down to `level + 1`.
        for lc in ((level as usize + 1)..=self.max_level as usize).rev() {
            let found = search_layer(
                &[cur],
                1,
                |s| self.distance(vector, s),
                |s| self.layers[lc].neighbors(s),
                None,
            );
            if let Some(best) = found.first() {
                cur = best.slot;
            }
        }

        // Phase 2: connect at every level from `min(level, max_level)` down to 0.
        let mut eps = vec![cur];
        for lc in (0..=level.min(self.max_level) as usize).rev() {
            let candidates = search_layer(
                &eps,
                self.params.ef_construction,
                |s| self.distance(vector, s),
                |s| self.layers[lc].neighbors(s),
                None,
            );
            let m = if lc == 0 { self.params.m_max0 } else { self.params.m };
            let neighbors = select_neighbors(candidates.clone(), m, |a, b| self.distance_between(a, b));
            self.layers[lc].set_neighbors(slot, neighbors.clone());
            for &n in &neighbors {
                self.layers[lc].add_edge(n, slot);
                let existing = self.layers[lc].neighbors(n);
                if existing.len() > m {
                    let pruned = prune_neighbors(
                        &NeighborList::from_vec(existing.clone()),
                        m,
                        |s| self.distance_between(n, s),
                        |a, b| self.distance_between(a, b),
                    );
                    // A neighbor dropped from n's list here loses its own
                    // back-edge to n too, so edges stay bidirectional.
                    for &dropped in existing.iter().filter(|s| !pruned.contains(s)) {
                        self.layers[lc].remove_edge(dropped, n);
                    }
                    self.layers[lc].set_neighbors(n, pruned);
                }
            }
            eps = candidates.into_iter().map(|c| c.slot).collect();
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point.store(slot, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Tombstone `id`. If it was the entry point, promote the next live
    /// node with the highest level.
    pub fn remove(&mut self, id: u64) -> Result<()> {
        let slot = *self.slot_of_id.get(&id).ok_or_else(|| Error::not_found(format!("no hnsw node for id {id}")))?;
        self.nodes[slot as usize].tombstoned = true;

        if self.entry_point_slot() == Some(slot) {
            let promoted = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| !n.tombstoned)
                .max_by_key(|(_, n)| n.level)
                .map(|(idx, n)| (idx as u32, n.level));
            match promoted {
                Some((new_slot, new_level)) => {
                    self.entry_point.store(new_slot, Ordering::Relaxed);
                    self.max_level = new_level;
                }
                None => {
                    self.entry_point.store(NONE_SLOT, Ordering::Relaxed);
                    self.max_level = 0;
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.slot_of_id.get(&id).is_some_and(|&slot| !self.nodes[slot as usize].tombstoned)
    }

    /// Fraction of a random sample of live ids that pass `filter`, used to
    /// decide whether graph traversal is worth it at all for a given query.
    fn sampled_selectivity(&self, filter: &dyn Fn(u64) -> bool) -> f64 {
        const SAMPLE_SIZE: usize = 200;
        let live_ids: Vec<u64> = self.nodes.iter().filter(|n| !n.tombstoned).map(|n| n.id).collect();
        if live_ids.is_empty() {
            return 0.0;
        }
        let mut rng = rand::thread_rng();
        let sample = live_ids.choose_multiple(&mut rng, SAMPLE_SIZE.min(live_ids.len()));
        let mut sampled = 0usize;
        let mut hits = 0usize;
        for &id in sample {
            sampled += 1;
            if filter(id) {
                hits += 1;
            }
        }
        hits as f64 / sampled as f64
    }

    /// Exhaustive scan over live, filter-matching ids. Used instead of
    /// graph traversal when the filter's estimated selectivity is too low
    /// for the graph to usefully prune candidates.
    fn brute_force_filtered(&self, query: &[f32], k: usize, filter: &dyn Fn(u64) -> bool) -> Vec<(u64, f32)> {
        let mut results: Vec<(u64, f32)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.tombstoned && filter(n.id))
            .map(|(slot, n)| (n.id, self.distance(query, slot as u32)))
            .collect();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        results.truncate(k);
        results
    }

    /// Approximate k-nearest-neighbor search. `filter`, when given, excludes
    /// ids from the result set without breaking traversal through them,
    /// unless it's selective enough that a brute-force scan is cheaper.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        filter: Option<&dyn Fn(u64) -> bool>,
    ) -> Result<Vec<(u64, f32)>> {
        const LOW_SELECTIVITY_THRESHOLD: f64 = 0.01;

        if query.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                query.len()
            )));
        }
        let Some(mut cur) = self.entry_point_slot() else {
            return Ok(Vec::new());
        };

        if let Some(f) = filter {
            if self.sampled_selectivity(f) < LOW_SELECTIVITY_THRESHOLD {
                return Ok(self.brute_force_filtered(query, k, f));
            }
        }

        let ef = ef.unwrap_or(self.params.ef_search).max(k);

        for lc in (1..=self.max_level as usize).rev() {
            let found =
                search_layer(&[cur], 1, |s| self.distance(query, s), |s| self.layers[lc].neighbors(s), None);
            if let Some(best) = found.first() {
                cur = best.slot;
            }
        }

        let keep_slot = |slot: u32| -> bool {
            let node = &self.nodes[slot as usize];
            !node.tombstoned && filter.map(|f| f(node.id)).unwrap_or(true)
        };

        let candidates: Vec<Candidate> = search_layer(
            &[cur],
            ef,
            |s| self.distance(query, s),
            |s| self.layers[0].neighbors(s),
            Some(&keep_slot),
        );

        let mut results: Vec<(u64, f32)> =
            candidates.into_iter().map(|c| (self.nodes[c.slot as usize].id, c.distance)).collect();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }
}

#[derive(Serialize, Deserialize)]
struct HnswSnapshot {
    dimension: usize,
    metric: Metric,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    ml: f64,
    vectors: Vec<f32>,
    nodes: Vec<(u64, u8, bool)>,
    layers: Vec<HashMap<u32, Vec<u32>>>,
    entry_point: u32,
    max_level: u8,
}

impl HnswIndex {
    /// Serialize the full graph (header + JSON body) for `hnsw.bin`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = HnswSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            m: self.params.m,
            m_max0: self.params.m_max0,
            ef_construction: self.params.ef_construction,
            ef_search: self.params.ef_search,
            ml: self.params.ml,
            vectors: self.vectors.clone(),
            nodes: self.nodes.iter().map(|n| (n.id, n.level, n.tombstoned)).collect(),
            layers: self
                .layers
                .iter()
                .map(|l| l.adjacency.iter().map(|(&slot, neighbors)| (slot, neighbors.to_vec())).collect())
                .collect(),
            entry_point: self.entry_point.load(Ordering::Relaxed),
            max_level: self.max_level,
        };
        let mut buf = Vec::new();
        crate::persistence::write_header(&mut buf, crate::persistence::HNSW_MAGIC)?;
        crate::persistence::write_checksummed_body(&mut buf, &serde_json::to_vec(&snapshot)?)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        crate::persistence::read_header(&mut cursor, crate::persistence::HNSW_MAGIC)?;
        let body = crate::persistence::read_checksummed_body(cursor)?;
        let snapshot: HnswSnapshot = serde_json::from_slice(body)?;
        let nodes: Vec<Node> =
            snapshot.nodes.into_iter().map(|(id, level, tombstoned)| Node { id, level, tombstoned }).collect();
        let mut slot_of_id = HashMap::new();
        for (slot, n) in nodes.iter().enumerate() {
            slot_of_id.insert(n.id, slot as u32);
        }
        let layers = snapshot
            .layers
            .into_iter()
            .map(|m| Layer { adjacency: m.into_iter().map(|(slot, v)| (slot, NeighborList::from_vec(v))).collect() })
            .collect();
        Ok(Self {
            dimension: snapshot.dimension,
            metric: snapshot.metric,
            params: HnswParams {
                m: snapshot.m,
                m_max0: snapshot.m_max0,
                ef_construction: snapshot.ef_construction,
                ef_search: snapshot.ef_search,
                ml: snapshot.ml,
            },
            vectors: snapshot.vectors,
            nodes,
            slot_of_id,
            layers,
            entry_point: AtomicU32::new(snapshot.entry_point),
            max_level: snapshot.max_level,
        })
    }
}
