//! Database configuration, persisted as `config.json` in the database
//! directory.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

/// Distance metric used by the flat index and HNSW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    L2,
    Cosine,
    Dot,
}

/// Parameters controlling HNSW graph structure and search behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Target neighbor count per node per level.
    pub m: usize,
    /// Candidate-list width during insert.
    pub ef_construction: usize,
    /// Default candidate-list width during search.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self { m: 16, ef_construction: 200, ef_search: 50 }
    }
}

/// Top-level database configuration, round-tripped to `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dimension: usize,
    pub metric: Metric,
    pub hnsw: HnswConfig,
    /// Initial vector-store capacity, in number of vectors.
    pub max_capacity: usize,
    pub schema_version: u32,
    /// Below this many live vectors, queries use the flat index instead of HNSW.
    pub flat_index_threshold: usize,
}

impl Config {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            hnsw: HnswConfig::default(),
            max_capacity: 1024,
            schema_version: SCHEMA_VERSION,
            flat_index_threshold: 10_000,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
