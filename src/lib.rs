//! An embeddable vector database: approximate nearest-neighbor search over
//! dense vectors (HNSW, with an exact flat fallback below a size
//! threshold), a BM25 lexical engine over associated text, and hybrid
//! fusion of the two ranked lists, backed by durable memory-mapped storage
//! on disk.
//!
//! # Pipeline
//!
//! - [`db::Database::add_vector`] / [`db::Database::add_text`] write a
//!   vector (and its metadata, and — for text — its lexical postings)
//!   through the vector store, the ANN index, the metadata store, the BM25
//!   engine, and the metadata secondary indexes, in that order, with
//!   rollback on partial failure.
//! - [`db::Database::query_vector`] searches the ANN index directly.
//!   [`db::Database::query_text`] runs both a BM25 query and (if a
//!   [`db::TextEncoder`] is configured) a vector query, then fuses the two
//!   ranked lists with [`fusion::fuse`].
//! - [`db::Database::close`] persists every component to the database
//!   directory; [`db::Database::open`] reconstructs in-memory state from
//!   it, including rebuilding the flat index from the vector store when no
//!   `hnsw.bin` snapshot exists yet.
//!
//! # Example
//!
//! ```
//! use vecdb::config::{Config, Metric};
//! use vecdb::db::Database;
//! use vecdb::metadata::Metadata;
//!
//! # fn main() -> vecdb::error::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let db = Database::init(dir.path(), Config::new(4, Metric::L2))?;
//! let id = db.add_vector(&[1.0, 0.0, 0.0, 0.0], Metadata::new())?;
//!
//! let results = db.query_vector(&[1.0, 0.0, 0.0, 0.0], &Default::default())?;
//! assert_eq!(results[0].id, id);
//! # Ok(())
//! # }
//! ```

pub mod bm25;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod index;
pub mod metadata;
pub mod metadata_index;
mod mmap;
pub mod persistence;
#[cfg(feature = "quantization")]
pub mod quantization;
pub mod simd;
pub mod store;

/// Re-exports of the types most callers need, so `use vecdb::prelude::*`
/// covers the common path without reaching into submodules.
pub mod prelude {
    pub use crate::config::{Config, Metric};
    pub use crate::db::{Database, QueryOptions, QueryResult, TextEncoder};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::fusion::FusionMethod;
    pub use crate::metadata::{DocumentType, Metadata};
}
