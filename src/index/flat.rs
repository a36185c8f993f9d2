//! Exact brute-force kNN, used below the HNSW size threshold and as ground
//! truth in tests.

use crate::config::Metric;
use crate::error::{Error, Result};
use crate::simd;

pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    ids: Vec<u64>,
    vectors: Vec<f32>,
    tombstoned: Vec<bool>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self { dimension, metric, ids: Vec::new(), vectors: Vec::new(), tombstoned: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.tombstoned.iter().filter(|d| !**d).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
        self.tombstoned.push(false);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Result<()> {
        let idx = self.ids.iter().position(|&x| x == id).ok_or_else(|| Error::not_found(format!("no flat-index entry for id {id}")))?;
        self.tombstoned[idx] = true;
        Ok(())
    }

    /// Live `(id, vector)` pairs in insertion order. Used to migrate into an
    /// [`crate::index::HnswIndex`] once the size threshold is crossed.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> {
        self.ids.iter().enumerate().filter(|(idx, _)| !self.tombstoned[*idx]).map(|(idx, &id)| {
            let start = idx * self.dimension;
            (id, &self.vectors[start..start + self.dimension])
        })
    }

    fn distance(&self, query: &[f32], idx: usize) -> f32 {
        let start = idx * self.dimension;
        let v = &self.vectors[start..start + self.dimension];
        match self.metric {
            Metric::L2 => simd::l2(query, v),
            Metric::Cosine => simd::cosine_distance(query, v),
            Metric::Dot => -simd::dot(query, v),
        }
    }

    pub fn search(&self, query: &[f32], k: usize, filter: Option<&dyn Fn(u64) -> bool>) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                query.len()
            )));
        }
        let mut scored: Vec<(u64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.tombstoned[*idx])
            .map(|(idx, &id)| (id, self.distance(query, idx)))
            .filter(|(id, _)| filter.map(|f| f(*id)).unwrap_or(true))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_nearest() {
        let mut index = FlatIndex::new(2, Metric::L2);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.insert(2, &[5.0, 5.0]).unwrap();
        index.insert(3, &[0.5, 0.5]).unwrap();
        let results = index.search(&[0.0, 0.0], 2, None).unwrap();
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 3);
    }

    #[test]
    fn removed_excluded() {
        let mut index = FlatIndex::new(2, Metric::L2);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.remove(1).unwrap();
        let results = index.search(&[0.0, 0.0], 5, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn filter_excludes_nonmatching() {
        let mut index = FlatIndex::new(2, Metric::L2);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.insert(2, &[0.1, 0.1]).unwrap();
        let results = index.search(&[0.0, 0.0], 5, Some(&|id| id == 2)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 2);
    }
}
