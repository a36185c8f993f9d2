//! The metadata record attached 1:1 to every live id, and the closed set of
//! document types used for O(1) secondary indexing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed enumeration of document types used by the hot-path secondary
/// index. Free-text `content_type`/`title`/`author` fields for richer
/// queries live in the SQLite auxiliary store instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Journal,
    Chart,
    ReportAnnual,
    ReportQuarterly,
    PreMarket,
    Unknown,
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Unknown
    }
}

/// A tagged-union value for custom metadata fields, per the design note
/// standardizing on a closed set of dynamic types instead of a loosely
/// typed map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// The metadata record attached to a vector id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// ISO `YYYY-MM-DD`.
    pub date: Option<String>,
    pub document_type: DocumentType,
    pub source_path: Option<String>,
    pub asset: Option<String>,
    pub bias: Option<String>,
    /// Optional numeric fields (prices, ratios, yields).
    pub numeric_fields: HashMap<String, f64>,
    /// Custom key/value strings for anything not modeled above.
    pub custom: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = document_type;
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}
