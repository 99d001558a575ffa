//! Benchmarks for k-NN search across backends

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use nnsearch::{DistanceMetric, IndexParams, SearchParams, VectorIndex};

fn create_random_matrix(n: usize, dim: usize) -> Array2<f32> {
    Array2::from_shape_fn((n, dim), |_| rand::random::<f32>())
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let dim = 32;
    let query = Array2::from_elem((1, dim), 0.5f32);
    let params = SearchParams::default().with_checks(128);

    for size in [1_000, 10_000].iter() {
        let data = create_random_matrix(*size, dim);

        for index_params in [
            IndexParams::linear(),
            IndexParams::kdtree(4),
            IndexParams::kmeans(32, 11),
        ] {
            let index =
                VectorIndex::with_dataset(data.clone(), index_params, DistanceMetric::Euclidean)
                    .unwrap();
            index.build().unwrap();
            let name = index.algorithm().to_string();

            group.bench_with_input(BenchmarkId::new(name, size), size, |b, _| {
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

fn benchmark_batch_cores(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_cores");
    group.sample_size(20);

    let data = create_random_matrix(10_000, 32);
    let queries = create_random_matrix(256, 32);
    let index =
        VectorIndex::with_dataset(data, IndexParams::kdtree(4), DistanceMetric::Euclidean).unwrap();
    index.build().unwrap();

    for cores in [1usize, 0] {
        let params = SearchParams::default().with_checks(128).with_cores(cores);
        group.bench_with_input(BenchmarkId::from_parameter(cores), &cores, |b, _| {
            b.iter(|| {
                let mut ids: Vec<Vec<usize>> = Vec::new();
                let mut dists = Vec::new();
                index
                    .knn_search_vec(black_box(queries.view()), &mut ids, &mut dists, 10, &params)
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_search, benchmark_batch_cores);
criterion_main!(benches);
