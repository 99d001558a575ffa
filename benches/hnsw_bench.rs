//! HNSW vs brute-force benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use nnsearch::algorithms::{HnswIndex, HnswParams};
use nnsearch::{DistanceMetric, IndexParams, NnIndex, SearchParams, VectorIndex};

fn create_random_matrix(n: usize, dim: usize) -> Array2<f32> {
    Array2::from_shape_fn((n, dim), |_| rand::random::<f32>())
}

fn benchmark_hnsw_vs_flat(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_vs_flat");
    group.sample_size(20);

    for &size in &[1_000, 10_000] {
        let dim = 128;
        let data = create_random_matrix(size, dim);
        let query = Array2::from_elem((1, dim), 0.5f32);
        let params = SearchParams::default().with_checks(50);

        let flat =
            VectorIndex::with_dataset(data.clone(), IndexParams::linear(), DistanceMetric::Euclidean)
                .unwrap();
        flat.build().unwrap();

        let hnsw =
            VectorIndex::with_dataset(data, IndexParams::hnsw(16, 200), DistanceMetric::Euclidean)
                .unwrap();
        hnsw.build().unwrap();

        for (name, index) in [("flat", &flat), ("hnsw", &hnsw)] {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| {
                    let mut ids: Vec<Vec<usize>> = Vec::new();
                    let mut dists = Vec::new();
                    index
                        .knn_search_vec(black_box(query.view()), &mut ids, &mut dists, 10, &params)
                        .unwrap()
                });
            });
        }
    }

    group.finish();
}

fn benchmark_hnsw_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_insert");
    group.sample_size(10);

    let data = create_random_matrix(1_000, 128);

    group.bench_function("insert_1000_128d", |b| {
        b.iter(|| {
            let mut hnsw = HnswIndex::new(data.clone(), DistanceMetric::Euclidean, HnswParams::new(16, 200, 50));
            hnsw.build().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_hnsw_vs_flat, benchmark_hnsw_insert);
criterion_main!(benches);
