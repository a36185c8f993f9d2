//! Secondary indexes over metadata fields: `date`, `document_type`, and
//! `asset`, each maintained as an independent `value -> set(id)` map kept
//! in sync with the metadata store under the facade's write lock.

use std::collections::{HashMap, HashSet};

use crate::metadata::{DocumentType, Metadata};

#[derive(Debug, Default)]
pub struct MetadataIndex {
    by_date: HashMap<String, HashSet<u64>>,
    by_document_type: HashMap<DocumentType, HashSet<u64>>,
    by_asset: HashMap<String, HashSet<u64>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, metadata: &Metadata) {
        if let Some(date) = &metadata.date {
            self.by_date.entry(date.clone()).or_default().insert(id);
        }
        self.by_document_type.entry(metadata.document_type).or_default().insert(id);
        if let Some(asset) = &metadata.asset {
            self.by_asset.entry(asset.clone()).or_default().insert(id);
        }
    }

    pub fn remove(&mut self, id: u64, metadata: &Metadata) {
        if let Some(date) = &metadata.date {
            if let Some(set) = self.by_date.get_mut(date) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_date.remove(date);
                }
            }
        }
        if let Some(set) = self.by_document_type.get_mut(&metadata.document_type) {
            set.remove(&id);
            if set.is_empty() {
                self.by_document_type.remove(&metadata.document_type);
            }
        }
        if let Some(asset) = &metadata.asset {
            if let Some(set) = self.by_asset.get_mut(asset) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_asset.remove(asset);
                }
            }
        }
    }

    /// Reindex `id` from `old` to `new` (used by `update_metadata`).
    pub fn update(&mut self, id: u64, old: &Metadata, new: &Metadata) {
        self.remove(id, old);
        self.insert(id, new);
    }

    pub fn by_date(&self, date: &str) -> Vec<u64> {
        self.by_date.get(date).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn by_document_type(&self, document_type: DocumentType) -> Vec<u64> {
        self.by_document_type.get(&document_type).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn by_asset(&self, asset: &str) -> Vec<u64> {
        self.by_asset.get(asset).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }
}
