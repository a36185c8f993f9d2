//! End-to-end scenarios exercising the full facade: minimal kNN, filtered
//! search, BM25 ranking, hybrid fusion, persistence round-trip, and
//! delete-then-tombstone semantics.

use vecdb::config::{Config, Metric};
use vecdb::db::{Database, QueryOptions, TextEncoder};
use vecdb::error::{ErrorKind, Result};
use vecdb::fusion::FusionMethod;
use vecdb::metadata::{DocumentType, Metadata};

struct HashEncoder {
    dimension: usize,
}

impl TextEncoder for HashEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, word) in text.split_whitespace().enumerate() {
            let slot = (word.len() + i) % self.dimension;
            v[slot] += 1.0;
        }
        Ok(v)
    }
}

#[test]
fn scenario_a_minimal_knn_over_four_dimensional_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::init(dir.path(), Config::new(4, Metric::L2)).unwrap();

    let a = db.add_vector(&[0.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    let b = db.add_vector(&[10.0, 0.0, 0.0, 0.0], Metadata::new()).unwrap();
    let c = db.add_vector(&[0.1, 0.0, 0.0, 0.0], Metadata::new()).unwrap();

    let results = db.query_vector(&[0.0, 0.0, 0.0, 0.0], &QueryOptions { k: 2, ..Default::default() }).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, a);
    assert_eq!(results[1].id, c);
    assert_ne!(results[1].id, b);
}

#[test]
fn scenario_b_filtered_search_restricts_to_document_type() {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new(8, Metric::L2);
    // Low enough that 1000 inserts cross the promotion threshold and this
    // scenario actually exercises HnswIndex::search, not FlatIndex::search.
    config.flat_index_threshold = 50;
    let db = Database::init(dir.path(), config).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut journal_vectors: Vec<(u64, Vec<f32>)> = Vec::new();

    for i in 0..1000u32 {
        let mut v: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
        let doc_type = if i % 2 == 0 { DocumentType::Journal } else { DocumentType::Chart };
        let id = db.add_vector(&v, Metadata::new().with_document_type(doc_type)).unwrap();
        if doc_type == DocumentType::Journal {
            journal_vectors.push((id, v));
        }
    }

    let query = {
        let mut q = vec![0.0f32; 8];
        q[0] = 1.0;
        q
    };
    let opts = QueryOptions { k: 10, type_filter: Some(DocumentType::Journal), ..Default::default() };
    let results = db.query_vector(&query, &opts).unwrap();

    assert_eq!(results.len(), 10);
    let journal_ids: HashSet<u64> = journal_vectors.iter().map(|(id, _)| *id).collect();
    assert!(results.iter().all(|r| journal_ids.contains(&r.id)));

    let mut brute_force: Vec<(u64, f32)> =
        journal_vectors.iter().map(|(id, v)| (*id, vecdb::simd::l2(&query, v))).collect();
    brute_force.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let brute_force_top10: HashSet<u64> = brute_force.iter().take(10).map(|(id, _)| *id).collect();
    let hnsw_top10: HashSet<u64> = results.iter().map(|r| r.id).collect();
    let overlap = brute_force_top10.intersection(&hnsw_top10).count();
    assert!(overlap >= 8, "expected filtered HNSW search to recall most of the brute-force top-10, got {overlap}/10");
}

#[test]
fn scenario_c_bm25_ranks_gold_documents_by_relevance() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::init(dir.path(), Config::new(4, Metric::L2)).unwrap().with_encoder(Box::new(HashEncoder { dimension: 4 }));

    let d1 = db.add_text("gold prices rose sharply amid inflation fears", Metadata::new()).unwrap();
    let d2 = db.add_text(
        "equities mixed afternoon trading traders await gold output reports major mines \
         several continents quarter global markets currency bonds commodities shipping \
         logistics supply chain disruptions continue weigh heavily investor sentiment worldwide",
        Metadata::new(),
    )
    .unwrap();
    let d3 = db.add_text("gold gold gold bullion surges gold demand soars", Metadata::new()).unwrap();

    let results = db.query_text("gold", &QueryOptions { k: 10, ..Default::default() }).unwrap();
    let order: Vec<u64> = results.iter().map(|r| r.id).collect();

    let pos = |id: u64| order.iter().position(|&x| x == id).unwrap();
    assert!(pos(d3) < pos(d1));
    assert!(pos(d1) < pos(d2));
}

#[test]
fn scenario_d_hybrid_fusion_rewards_agreement_across_lists() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::init(dir.path(), Config::new(4, Metric::L2)).unwrap().with_encoder(Box::new(HashEncoder { dimension: 4 }));

    let agree = db.add_text("central bank raises interest rates sharply", Metadata::new()).unwrap();
    db.add_text("weather forecast calls for rain this weekend", Metadata::new()).unwrap();

    let opts = QueryOptions { k: 5, fusion_method: FusionMethod::ReciprocalRank, ..Default::default() };
    let results = db.query_text("interest rates", &opts).unwrap();

    assert_eq!(results[0].id, agree);
}

#[test]
fn scenario_e_persistence_roundtrip_preserves_size_and_contents() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::init(dir.path(), Config::new(8, Metric::Cosine)).unwrap();
        for i in 0..100 {
            let mut v = vec![0.0f32; 8];
            v[i % 8] = (i + 1) as f32;
            db.add_vector(&v, Metadata::new().with_asset(format!("ASSET{}", i % 4))).unwrap();
        }
        db.close().unwrap();
    }

    let reopened = Database::open(dir.path()).unwrap();
    assert_eq!(reopened.size(), 100);
    assert_eq!(reopened.find_by_asset("ASSET0").unwrap().len(), 25);
}

#[test]
fn scenario_f_delete_then_tombstone_excludes_from_queries_and_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::init(dir.path(), Config::new(2, Metric::L2)).unwrap();

    let a = db.add_vector(&[0.0, 0.0], Metadata::new()).unwrap();
    let b = db.add_vector(&[1.0, 1.0], Metadata::new()).unwrap();
    let c = db.add_vector(&[2.0, 2.0], Metadata::new()).unwrap();

    db.remove(b).unwrap();

    assert_eq!(db.size(), 2);
    let err = db.get_metadata(b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let results = db.query_vector(&[1.0, 1.0], &QueryOptions { k: 10, ..Default::default() }).unwrap();
    assert!(results.iter().all(|r| r.id != b));
    assert!(results.iter().any(|r| r.id == a));
    assert!(results.iter().any(|r| r.id == c));
}
