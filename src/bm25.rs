//! BM25 lexical retrieval: tokenization, an incremental inverted index, and
//! Okapi BM25 scoring (plus the BM25L/BM25+ variants as a strict
//! generalization of the same formula at their default parameters).
//!
//! # Formula
//!
//! ```text
//! BM25(q, d) = sum_i IDF(q_i) * (f(q_i, d) * (k1 + 1)) / (f(q_i, d) + k1 * (1 - b + b * |d| / avgdl))
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

/// Lowercase, Unicode-word-boundary tokenization with stop-word removal.
/// Stemming is intentionally not applied by default.
pub fn tokenize(text: &str) -> Vec<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !stopwords.contains(w.as_str()))
        .collect()
}

/// BM25 scoring variant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bm25Variant {
    #[default]
    Standard,
    /// Adds `delta` to the term-frequency component to reduce
    /// over-penalization of short documents.
    BM25L { delta: f32 },
    /// Adds `delta` to lower-bound the term-frequency contribution,
    /// preventing negative scores for very common terms.
    BM25Plus { delta: f32 },
}

impl Bm25Variant {
    pub fn bm25l() -> Self {
        Self::BM25L { delta: 0.5 }
    }

    pub fn bm25plus() -> Self {
        Self::BM25Plus { delta: 1.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub variant: Bm25Variant,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, variant: Bm25Variant::Standard }
    }
}

/// Incremental inverted index over `u64` document ids with lazily memoized IDF.
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<u64, u32>>,
    doc_terms: HashMap<u64, HashMap<String, u32>>,
    doc_lengths: HashMap<u64, u32>,
    doc_frequencies: HashMap<String, u32>,
    num_docs: u64,
    total_length: u64,
    precomputed_idf: RefCell<HashMap<String, f32>>,
    idf_dirty: RefCell<bool>,
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self {
            postings: HashMap::new(),
            doc_terms: HashMap::new(),
            doc_lengths: HashMap::new(),
            doc_frequencies: HashMap::new(),
            num_docs: 0,
            total_length: 0,
            precomputed_idf: RefCell::new(HashMap::new()),
            idf_dirty: RefCell::new(true),
        }
    }

    pub fn num_docs(&self) -> u64 {
        self.num_docs
    }

    fn avg_doc_length(&self) -> f32 {
        if self.num_docs == 0 {
            0.0
        } else {
            self.total_length as f32 / self.num_docs as f32
        }
    }

    /// Add (or replace, if already present) a document's text.
    pub fn add_document(&mut self, id: u64, text: &str) {
        if self.doc_terms.contains_key(&id) {
            self.remove_document(id);
        }
        let terms = tokenize(text);
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *freqs.entry(term.clone()).or_insert(0) += 1;
        }
        for (term, freq) in &freqs {
            self.postings.entry(term.clone()).or_default().insert(id, *freq);
            *self.doc_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_lengths.insert(id, terms.len() as u32);
        self.total_length += terms.len() as u64;
        self.doc_terms.insert(id, freqs);
        self.num_docs += 1;
        *self.idf_dirty.borrow_mut() = true;
    }

    /// Remove a document, decrementing every posting and document
    /// frequency it contributed. A no-op (not an error) if `id` is absent.
    pub fn remove_document(&mut self, id: u64) {
        let Some(freqs) = self.doc_terms.remove(&id) else {
            return;
        };
        for term in freqs.keys() {
            if let Some(postings) = self.postings.get_mut(term) {
                postings.remove(&id);
                if postings.is_empty() {
                    self.postings.remove(term);
                }
            }
            if let Some(df) = self.doc_frequencies.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_frequencies.remove(term);
                }
            }
        }
        if let Some(len) = self.doc_lengths.remove(&id) {
            self.total_length -= len as u64;
        }
        self.num_docs -= 1;
        *self.idf_dirty.borrow_mut() = true;
    }

    pub fn contains(&self, id: u64) -> bool {
        self.doc_terms.contains_key(&id)
    }

    fn ensure_idf(&self) {
        if !*self.idf_dirty.borrow() {
            return;
        }
        let n = self.num_docs as f32;
        let mut idf = self.precomputed_idf.borrow_mut();
        idf.clear();
        for (term, &df) in &self.doc_frequencies {
            let df = df as f32;
            idf.insert(term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln());
        }
        *self.idf_dirty.borrow_mut() = false;
    }

    pub fn idf(&self, term: &str) -> f32 {
        self.ensure_idf();
        self.precomputed_idf.borrow().get(term).copied().unwrap_or(0.0)
    }

    fn term_frequency(&self, id: u64, term: &str) -> u32 {
        self.postings.get(term).and_then(|p| p.get(&id)).copied().unwrap_or(0)
    }

    fn score_with_terms(&self, id: u64, query_terms: &[String], params: &Bm25Params) -> f32 {
        let avgdl = self.avg_doc_length();
        if avgdl == 0.0 {
            return 0.0;
        }
        let doc_length = self.doc_lengths.get(&id).copied().unwrap_or(0) as f32;
        let mut score = 0.0;
        for term in query_terms {
            let tf = self.term_frequency(id, term) as f32;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            let numerator = tf * (params.k1 + 1.0);
            let denominator = tf + params.k1 * (1.0 - params.b + params.b * doc_length / avgdl);
            let mut tf_score = numerator / denominator;
            match params.variant {
                Bm25Variant::Standard => {}
                Bm25Variant::BM25L { delta } | Bm25Variant::BM25Plus { delta } => tf_score += delta,
            }
            score += idf * tf_score;
        }
        score
    }

    /// OR-semantics query: any document sharing at least one query term is
    /// scored; results are sorted by descending score, then ascending id.
    pub fn query(&self, text: &str, k: usize, params: Bm25Params) -> Vec<(u64, f32)> {
        let query_terms = tokenize(text);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let mut candidates: HashSet<u64> = HashSet::new();
        for term in &query_terms {
            if let Some(postings) = self.postings.get(term) {
                candidates.extend(postings.keys().copied());
            }
        }
        let mut scored: Vec<(u64, f32)> =
            candidates.into_iter().map(|id| (id, self.score_with_terms(id, &query_terms, &params))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// Restrict a query to documents containing the exact phrase (sequence
    /// of tokens) in order and without gaps. `postings` does not store term
    /// positions, so phrase matching re-tokenizes the supplied `corpus_text`
    /// lookup function for surviving candidates only.
    pub fn query_phrase(
        &self,
        phrase: &str,
        k: usize,
        params: Bm25Params,
        doc_text: impl Fn(u64) -> Option<String>,
    ) -> Vec<(u64, f32)> {
        let phrase_terms = tokenize(phrase);
        if phrase_terms.is_empty() {
            return Vec::new();
        }
        self.query(phrase, usize::MAX, params)
            .into_iter()
            .filter(|(id, _)| doc_text(*id).map(|text| contains_phrase(&tokenize(&text), &phrase_terms)).unwrap_or(false))
            .take(k)
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct InvertedIndexSnapshot {
    postings: HashMap<String, HashMap<u64, u32>>,
    doc_terms: HashMap<u64, HashMap<String, u32>>,
    doc_lengths: HashMap<u64, u32>,
    doc_frequencies: HashMap<String, u32>,
    num_docs: u64,
    total_length: u64,
}

impl InvertedIndex {
    /// Serialize the index (header + JSON body) for `bm25.bin`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = InvertedIndexSnapshot {
            postings: self.postings.clone(),
            doc_terms: self.doc_terms.clone(),
            doc_lengths: self.doc_lengths.clone(),
            doc_frequencies: self.doc_frequencies.clone(),
            num_docs: self.num_docs,
            total_length: self.total_length,
        };
        let mut buf = Vec::new();
        crate::persistence::write_header(&mut buf, crate::persistence::BM25_MAGIC)?;
        crate::persistence::write_checksummed_body(&mut buf, &serde_json::to_vec(&snapshot)?)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        crate::persistence::read_header(&mut cursor, crate::persistence::BM25_MAGIC)?;
        let body = crate::persistence::read_checksummed_body(cursor)?;
        let snapshot: InvertedIndexSnapshot = serde_json::from_slice(body)?;
        Ok(Self {
            postings: snapshot.postings,
            doc_terms: snapshot.doc_terms,
            doc_lengths: snapshot.doc_lengths,
            doc_frequencies: snapshot.doc_frequencies,
            num_docs: snapshot.num_docs,
            total_length: snapshot.total_length,
            precomputed_idf: RefCell::new(HashMap::new()),
            idf_dirty: RefCell::new(true),
        })
    }
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_strips_stopwords() {
        let tokens = tokenize("The Quick Brown Fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn query_ranks_more_relevant_document_first() {
        let mut index = InvertedIndex::new();
        index.add_document(1, "the market rallied on strong earnings");
        index.add_document(2, "earnings earnings earnings report beat expectations");
        index.add_document(3, "weather forecast calls for rain");
        let results = index.query("earnings", 10, Bm25Params::default());
        assert_eq!(results[0].0, 2);
        assert!(results.iter().all(|(id, _)| *id != 3));
    }

    #[test]
    fn remove_document_drops_its_postings() {
        let mut index = InvertedIndex::new();
        index.add_document(1, "quarterly report on revenue");
        index.add_document(2, "quarterly revenue growth");
        index.remove_document(1);
        assert!(!index.contains(1));
        assert_eq!(index.num_docs(), 1);
        let results = index.query("quarterly", 10, Bm25Params::default());
        assert_eq!(results, vec![(2, results[0].1)]);
    }

    #[test]
    fn re_adding_a_document_replaces_it() {
        let mut index = InvertedIndex::new();
        index.add_document(1, "alpha beta");
        index.add_document(1, "gamma delta");
        assert_eq!(index.num_docs(), 1);
        assert!(index.query("alpha", 10, Bm25Params::default()).is_empty());
        assert!(!index.query("gamma", 10, Bm25Params::default()).is_empty());
    }

    #[test]
    fn to_bytes_from_bytes_roundtrips_scores() {
        let mut index = InvertedIndex::new();
        index.add_document(1, "gold prices rising");
        index.add_document(2, "gold gold gold");
        let bytes = index.to_bytes().unwrap();
        let restored = InvertedIndex::from_bytes(&bytes).unwrap();
        assert_eq!(index.query("gold", 10, Bm25Params::default()), restored.query("gold", 10, Bm25Params::default()));
    }

    #[test]
    fn phrase_query_requires_exact_sequence() {
        let mut index = InvertedIndex::new();
        index.add_document(1, "pre market futures point higher today");
        index.add_document(2, "futures point higher in the market before the open");
        let docs = [(1u64, "pre market futures point higher today"), (2, "futures point higher in the market before the open")];
        let lookup = |id: u64| docs.iter().find(|(d, _)| *d == id).map(|(_, t)| t.to_string());
        let results = index.query_phrase("pre market", 10, Bm25Params::default(), lookup);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }
}
