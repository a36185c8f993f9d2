//! Nearest-neighbor indexes: exact brute force and approximate HNSW.

pub mod flat;
pub mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
