//! HNSW build and search throughput against the flat index's ground truth.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vecdb::config::Metric;
use vecdb::index::hnsw::HnswParams;
use vecdb::index::{FlatIndex, HnswIndex};

/// Deterministic across runs so successive benchmark invocations are
/// comparable; seeded rather than drawn from `thread_rng`.
fn generate_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..n).map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()).collect()
}

fn default_params() -> HnswParams {
    HnswParams { m: 16, m_max0: 32, ef_construction: 200, ef_search: 50, ml: 1.0 / (16f64).ln() }
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_insert");

    for n in [1_000usize, 10_000].iter() {
        let dim = 64;
        let vectors = generate_vectors(*n, dim);

        group.bench_with_input(BenchmarkId::new("insert", n), &vectors, |b, vs| {
            b.iter(|| {
                let mut index = HnswIndex::new(dim, Metric::L2, default_params());
                for (i, v) in vs.iter().enumerate() {
                    index.insert(i as u64, v).unwrap();
                }
                black_box(index);
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");

    for n in [1_000usize, 10_000].iter() {
        let dim = 64;
        let vectors = generate_vectors(*n, dim);

        let mut index = HnswIndex::new(dim, Metric::L2, default_params());
        for (i, v) in vectors.iter().enumerate() {
            index.insert(i as u64, v).unwrap();
        }

        let query = vectors[0].clone();

        group.bench_with_input(BenchmarkId::new("search_k10", n), &query, |b, q| {
            b.iter(|| black_box(index.search(q, 10, None, None).unwrap()))
        });
    }

    group.finish();
}

fn bench_flat_vs_hnsw_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_vs_hnsw_search");
    let dim = 64;
    let n = 5_000;
    let vectors = generate_vectors(n, dim);

    let mut flat = FlatIndex::new(dim, Metric::L2);
    let mut hnsw = HnswIndex::new(dim, Metric::L2, default_params());
    for (i, v) in vectors.iter().enumerate() {
        flat.insert(i as u64, v).unwrap();
        hnsw.insert(i as u64, v).unwrap();
    }
    let query = vectors[0].clone();

    group.bench_function("flat", |b| b.iter(|| black_box(flat.search(&query, 10, None).unwrap())));
    group.bench_function("hnsw", |b| b.iter(|| black_box(hnsw.search(&query, 10, None, None).unwrap())));

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_flat_vs_hnsw_search);
criterion_main!(benches);
