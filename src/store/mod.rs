//! Mmap-backed, append-mostly storage: the vector store and the metadata
//! store. Both share the same growth and header conventions.

pub mod metadata_store;
pub mod vector_store;

pub use metadata_store::MetadataStore;
pub use vector_store::VectorStore;
