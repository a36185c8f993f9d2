//! The embeddable database facade: ties the vector store, metadata store,
//! ANN index, BM25 engine, and secondary indexes together behind one
//! synchronized API, and owns on-disk persistence of the whole directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::bm25::{Bm25Params, InvertedIndex};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fusion::{self, FusionMethod};
use crate::index::hnsw::HnswParams;
use crate::index::{FlatIndex, HnswIndex};
use crate::metadata::{DocumentType, Metadata};
use crate::metadata_index::MetadataIndex;
use crate::store::{MetadataStore, VectorStore};

/// Seam for turning text into vectors. The core crate ships no embedding
/// model; callers that want `add_text`/`query_text` provide one.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

enum IndexBackend {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
}

impl IndexBackend {
    fn len(&self) -> usize {
        match self {
            IndexBackend::Flat(f) => f.len(),
            IndexBackend::Hnsw(h) => h.len(),
        }
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        match self {
            IndexBackend::Flat(f) => f.insert(id, vector),
            IndexBackend::Hnsw(h) => h.insert(id, vector),
        }
    }

    fn remove(&mut self, id: u64) -> Result<()> {
        match self {
            IndexBackend::Flat(f) => f.remove(id),
            IndexBackend::Hnsw(h) => h.remove(id),
        }
    }

    fn search(&self, query: &[f32], k: usize, ef: Option<usize>, filter: Option<&dyn Fn(u64) -> bool>) -> Result<Vec<(u64, f32)>> {
        match self {
            IndexBackend::Flat(f) => f.search(query, k, filter),
            IndexBackend::Hnsw(h) => h.search(query, k, ef, filter),
        }
    }
}

/// Search parameters shared by `query_vector` and `query_text`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub k: usize,
    pub ef_search: Option<usize>,
    pub include_metadata: bool,
    pub type_filter: Option<DocumentType>,
    pub date_filter: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub asset_filter: Option<String>,
    pub bias_filter: Option<String>,
    pub fusion_method: FusionMethod,
    pub vector_weight: f32,
    pub lexical_weight: f32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: 10,
            ef_search: None,
            include_metadata: true,
            type_filter: None,
            date_filter: None,
            date_from: None,
            date_to: None,
            asset_filter: None,
            bias_filter: None,
            fusion_method: FusionMethod::ReciprocalRank,
            vector_weight: 0.5,
            lexical_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub id: u64,
    pub score: f32,
    pub metadata: Option<Metadata>,
}

pub struct Database {
    dir: PathBuf,
    config: Config,
    vectors: Mutex<VectorStore>,
    metadata: Mutex<MetadataStore>,
    index: RwLock<IndexBackend>,
    bm25: RwLock<InvertedIndex>,
    metadata_index: RwLock<MetadataIndex>,
    encoder: Option<Box<dyn TextEncoder>>,
    ready: AtomicBool,
}

impl Database {
    /// Create a fresh database directory from `config`.
    pub fn init(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        config.save(&dir.join("config.json"))?;
        let vectors = VectorStore::create(&dir.join("vectors.bin"), config.dimension, config.max_capacity)?;
        let metadata = MetadataStore::create(&dir.join("metadata.bin"), config.max_capacity)?;
        let index = IndexBackend::Flat(FlatIndex::new(config.dimension, config.metric));
        tracing::info!(dir = %dir.display(), dimension = config.dimension, "database initialized");
        Ok(Self {
            dir,
            config,
            vectors: Mutex::new(vectors),
            metadata: Mutex::new(metadata),
            index: RwLock::new(index),
            bm25: RwLock::new(InvertedIndex::new()),
            metadata_index: RwLock::new(MetadataIndex::new()),
            encoder: None,
            ready: AtomicBool::new(true),
        })
    }

    /// Reopen a database directory previously written by `init`/`close`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = Config::load(&dir.join("config.json"))?;
        let vectors = VectorStore::open(&dir.join("vectors.bin"))?;
        let metadata = MetadataStore::open(&dir.join("metadata.bin"))?;

        let hnsw_path = dir.join("hnsw.bin");
        let index = if hnsw_path.exists() {
            IndexBackend::Hnsw(HnswIndex::from_bytes(&std::fs::read(&hnsw_path)?)?)
        } else {
            let mut flat = FlatIndex::new(config.dimension, config.metric);
            for idx in 0..vectors.count() {
                if !vectors.is_deleted(idx) {
                    flat.insert(idx, vectors.get(idx)?)?;
                }
            }
            IndexBackend::Flat(flat)
        };

        let mut metadata_index = MetadataIndex::new();
        for idx in 0..metadata.count() {
            if !metadata.is_deleted(idx)? {
                metadata_index.insert(idx, &metadata.get(idx)?);
            }
        }

        let bm25_path = dir.join("bm25.bin");
        let bm25 = if bm25_path.exists() {
            InvertedIndex::from_bytes(&std::fs::read(&bm25_path)?)?
        } else {
            InvertedIndex::new()
        };

        tracing::info!(dir = %dir.display(), vectors = vectors.count(), "database reopened");
        Ok(Self {
            dir,
            config,
            vectors: Mutex::new(vectors),
            metadata: Mutex::new(metadata),
            index: RwLock::new(index),
            bm25: RwLock::new(bm25),
            metadata_index: RwLock::new(metadata_index),
            encoder: None,
            ready: AtomicBool::new(true),
        })
    }

    /// Attach a text encoder, enabling `add_text`/`query_text`.
    pub fn with_encoder(mut self, encoder: Box<dyn TextEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.index.read().len()
    }

    fn require_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::not_ready("database is closed"))
        }
    }

    /// Flush every on-disk component: `config.json`, `vectors.bin`,
    /// `metadata.bin`, `hnsw.bin` (if the ANN index has been promoted past
    /// the flat threshold), and `bm25.bin`.
    fn persist(&self) -> Result<()> {
        self.config.save(&self.dir.join("config.json"))?;
        self.vectors.lock().sync()?;
        self.metadata.lock().sync()?;
        match &*self.index.read() {
            IndexBackend::Hnsw(hnsw) => std::fs::write(self.dir.join("hnsw.bin"), hnsw.to_bytes()?)?,
            IndexBackend::Flat(_) => {
                let _ = std::fs::remove_file(self.dir.join("hnsw.bin"));
            }
        }
        std::fs::write(self.dir.join("bm25.bin"), self.bm25.read().to_bytes()?)?;
        Ok(())
    }

    /// Persist all components and mark the handle closed. Further
    /// operations return `NotReady` until reopened via [`Database::open`].
    pub fn close(&self) -> Result<()> {
        self.require_ready()?;
        self.persist()?;
        self.ready.store(false, Ordering::SeqCst);
        tracing::info!(dir = %self.dir.display(), "database closed");
        Ok(())
    }

    fn insert_into_index(&self, id: u64, vector: &[f32]) -> Result<()> {
        let mut index = self.index.write();
        index.insert(id, vector)?;
        let should_promote = matches!(&*index, IndexBackend::Flat(f) if f.len() >= self.config.flat_index_threshold);
        if should_promote {
            if let IndexBackend::Flat(flat) = &*index {
                let mut hnsw = HnswIndex::new(self.config.dimension, self.config.metric, HnswParams::from(&self.config.hnsw));
                for (live_id, live_vector) in flat.iter() {
                    hnsw.insert(live_id, live_vector)?;
                }
                *index = IndexBackend::Hnsw(hnsw);
                tracing::info!(threshold = self.config.flat_index_threshold, "promoted flat index to HNSW");
            }
        }
        Ok(())
    }

    /// Insert a vector/metadata pair (and, if `text` is given, index it for
    /// lexical search too) in the order: allocate id, append vector, insert
    /// into the ANN index, append metadata, update BM25, update secondary
    /// indexes. A failure at any step tombstones what was already committed
    /// and aborts.
    fn insert_core(&self, vector: &[f32], metadata: &Metadata, text: Option<&str>) -> Result<u64> {
        self.require_ready()?;
        if vector.len() != self.config.dimension {
            return Err(Error::invalid_input(format!("expected dimension {}, got {}", self.config.dimension, vector.len())));
        }

        let id = self.vectors.lock().append(vector)?;

        if let Err(e) = self.insert_into_index(id, vector) {
            tracing::warn!(id, error = %e, "ANN insert failed, rolling back vector append");
            let _ = self.vectors.lock().mark_deleted(id);
            return Err(e);
        }

        let meta_id = match self.metadata.lock().append(metadata) {
            Ok(idx) => idx,
            Err(e) => {
                tracing::warn!(id, error = %e, "metadata append failed, rolling back insert");
                let _ = self.index.write().remove(id);
                let _ = self.vectors.lock().mark_deleted(id);
                return Err(e);
            }
        };
        debug_assert_eq!(meta_id, id, "vector and metadata stores drifted out of lockstep");

        if let Some(text) = text {
            self.bm25.write().add_document(id, text);
        }
        self.metadata_index.write().insert(id, metadata);

        Ok(id)
    }

    pub fn add_vector(&self, vector: &[f32], metadata: Metadata) -> Result<u64> {
        self.insert_core(vector, &metadata, None)
    }

    pub fn add_text(&self, text: &str, metadata: Metadata) -> Result<u64> {
        let encoder = self.encoder.as_ref().ok_or_else(|| Error::unsupported("no text encoder configured"))?;
        let vector = encoder.encode(text)?;
        self.insert_core(&vector, &metadata, Some(text))
    }

    pub fn get_vector(&self, id: u64) -> Result<Vec<f32>> {
        self.require_ready()?;
        let vectors = self.vectors.lock();
        if vectors.is_deleted(id) {
            return Err(Error::not_found(format!("no live vector for id {id}")));
        }
        Ok(vectors.get(id)?.to_vec())
    }

    pub fn get_metadata(&self, id: u64) -> Result<Metadata> {
        self.require_ready()?;
        let metadata = self.metadata.lock();
        if metadata.is_deleted(id)? {
            return Err(Error::not_found(format!("no live metadata for id {id}")));
        }
        metadata.get(id)
    }

    pub fn update_metadata(&self, id: u64, metadata: Metadata) -> Result<()> {
        self.require_ready()?;
        let old = self.get_metadata(id)?;
        self.metadata.lock().update(id, &metadata)?;
        self.metadata_index.write().update(id, &old, &metadata);
        Ok(())
    }

    /// Tombstone `id` everywhere: vector store, ANN index, metadata store,
    /// BM25 postings, and secondary indexes. The slot is never reused.
    pub fn remove(&self, id: u64) -> Result<()> {
        self.require_ready()?;
        let metadata = self.get_metadata(id)?;
        self.vectors.lock().mark_deleted(id)?;
        let _ = self.index.write().remove(id);
        self.metadata.lock().mark_deleted(id)?;
        self.bm25.write().remove_document(id);
        self.metadata_index.write().remove(id, &metadata);
        Ok(())
    }

    fn passes_filters(&self, id: u64, opts: &QueryOptions) -> bool {
        let metadata = self.metadata.lock();
        if metadata.is_deleted(id).unwrap_or(true) {
            return false;
        }
        let Ok(meta) = metadata.get(id) else {
            return false;
        };
        if let Some(t) = opts.type_filter {
            if meta.document_type != t {
                return false;
            }
        }
        if let Some(d) = &opts.date_filter {
            if meta.date.as_deref() != Some(d.as_str()) {
                return false;
            }
        }
        if opts.date_from.is_some() || opts.date_to.is_some() {
            let Some(date) = &meta.date else { return false };
            if let Some(from) = &opts.date_from {
                if date.as_str() < from.as_str() {
                    return false;
                }
            }
            if let Some(to) = &opts.date_to {
                if date.as_str() > to.as_str() {
                    return false;
                }
            }
        }
        if let Some(asset) = &opts.asset_filter {
            if meta.asset.as_deref() != Some(asset.as_str()) {
                return false;
            }
        }
        if let Some(bias) = &opts.bias_filter {
            if meta.bias.as_deref() != Some(bias.as_str()) {
                return false;
            }
        }
        true
    }

    fn attach_metadata(&self, hits: Vec<(u64, f32)>, include_metadata: bool) -> Vec<QueryResult> {
        hits.into_iter()
            .map(|(id, score)| {
                let metadata = if include_metadata { self.metadata.lock().get(id).ok() } else { None };
                QueryResult { id, score, metadata }
            })
            .collect()
    }

    pub fn query_vector(&self, vector: &[f32], opts: &QueryOptions) -> Result<Vec<QueryResult>> {
        self.require_ready()?;
        let filter: &dyn Fn(u64) -> bool = &|id| self.passes_filters(id, opts);
        let hits = self.index.read().search(vector, opts.k, opts.ef_search, Some(filter))?;
        Ok(self.attach_metadata(hits, opts.include_metadata))
    }

    pub fn query_text(&self, text: &str, opts: &QueryOptions) -> Result<Vec<QueryResult>> {
        self.require_ready()?;
        let lexical = {
            let filter_pass = |id: u64| self.passes_filters(id, opts);
            self.bm25
                .read()
                .query(text, opts.k.max(100), Bm25Params::default())
                .into_iter()
                .filter(|(id, _)| filter_pass(*id))
                .collect::<Vec<_>>()
        };

        let vector_hits = match &self.encoder {
            Some(encoder) => {
                let query_vector = encoder.encode(text)?;
                let filter: &dyn Fn(u64) -> bool = &|id| self.passes_filters(id, opts);
                self.index.read().search(&query_vector, opts.k.max(100), opts.ef_search, Some(filter))?
            }
            None => Vec::new(),
        };

        let fused = if vector_hits.is_empty() {
            lexical
        } else {
            let method = match opts.fusion_method {
                FusionMethod::WeightedSum { .. } => FusionMethod::WeightedSum { weights: [opts.vector_weight, opts.lexical_weight] },
                other => other,
            };
            fusion::fuse(&[vector_hits, lexical], method)
        };

        let mut fused = fused;
        fused.truncate(opts.k);
        Ok(self.attach_metadata(fused, opts.include_metadata))
    }

    fn find_by<F>(&self, select: F) -> Result<Vec<Metadata>>
    where
        F: FnOnce(&MetadataIndex) -> Vec<u64>,
    {
        self.require_ready()?;
        let ids = select(&self.metadata_index.read());
        let metadata = self.metadata.lock();
        let mut results: Vec<(u64, Metadata)> =
            ids.into_iter().filter_map(|id| metadata.get(id).ok().map(|m| (id, m))).collect();
        results.sort_by_key(|(id, _)| *id);
        Ok(results.into_iter().map(|(_, m)| m).collect())
    }

    pub fn find_by_date(&self, date: &str) -> Result<Vec<Metadata>> {
        self.find_by(|index| index.by_date(date))
    }

    pub fn find_by_type(&self, document_type: DocumentType) -> Result<Vec<Metadata>> {
        self.find_by(|index| index.by_document_type(document_type))
    }

    pub fn find_by_asset(&self, asset: &str) -> Result<Vec<Metadata>> {
        self.find_by(|index| index.by_asset(asset))
    }
}
