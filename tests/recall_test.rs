//! Recall tests: verify approximate backends find a high percentage of true nearest neighbors.

use std::collections::HashSet;

use ndarray::Array2;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use nnsearch::{DistanceMetric, IndexParams, SearchParams, VectorIndex};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::random_using((n, dim), Uniform::new(0.0f32, 1.0), &mut rng)
}

fn recall_at_k(ground_truth: &[usize], found: &[usize]) -> f64 {
    let ground_truth: HashSet<usize> = ground_truth.iter().copied().collect();
    let hits = found.iter().filter(|id| ground_truth.contains(id)).count();
    hits as f64 / ground_truth.len() as f64
}

fn search(index: &VectorIndex<f32>, queries: &Array2<f32>, k: usize, params: &SearchParams) -> Vec<Vec<usize>> {
    let mut ids = Vec::new();
    let mut dists = Vec::new();
    index
        .knn_search_vec(queries.view(), &mut ids, &mut dists, k, params)
        .unwrap();
    ids
}

fn test_recall(
    params: IndexParams,
    n: usize,
    dim: usize,
    k: usize,
    num_queries: usize,
    checks: usize,
    min_recall: f64,
) {
    let vectors = random_vectors(n, dim, n as u64);
    let queries = random_vectors(num_queries, dim, n as u64 + 1);

    // Ground truth
    let flat =
        VectorIndex::with_dataset(vectors.clone(), IndexParams::linear(), DistanceMetric::Euclidean)
            .unwrap();
    flat.build().unwrap();
    let truth = search(&flat, &queries, k, &SearchParams::exact());

    let index = VectorIndex::with_dataset(vectors, params, DistanceMetric::Euclidean).unwrap();
    index.build().unwrap();
    let found = search(&index, &queries, k, &SearchParams::default().with_checks(checks));

    let total_recall: f64 = truth
        .iter()
        .zip(&found)
        .map(|(t, f)| recall_at_k(t, f))
        .sum();
    let avg_recall = total_recall / num_queries as f64;
    assert!(
        avg_recall >= min_recall,
        "{} recall {:.3} is below threshold {:.3} for n={}, dim={}, k={}",
        index.algorithm(),
        avg_recall,
        min_recall,
        n,
        dim,
        k
    );
}

#[test]
fn test_hnsw_recall_100_vectors() {
    test_recall(IndexParams::hnsw(16, 200), 100, 32, 10, 50, 100, 0.90);
}

#[test]
fn test_hnsw_recall_1000_vectors() {
    test_recall(IndexParams::hnsw(16, 200), 1000, 64, 10, 50, 100, 0.90);
}

#[test]
fn test_kdtree_recall_1000_vectors() {
    test_recall(IndexParams::kdtree(4), 1000, 8, 10, 50, 256, 0.85);
}

#[test]
fn test_kmeans_recall_1000_vectors() {
    test_recall(IndexParams::kmeans(16, 11), 1000, 8, 10, 50, 256, 0.85);
}

#[test]
fn test_exhaustive_hnsw_is_exact_on_small_sets() {
    let vectors = random_vectors(200, 4, 5);
    let queries = random_vectors(10, 4, 6);

    let flat =
        VectorIndex::with_dataset(vectors.clone(), IndexParams::linear(), DistanceMetric::Euclidean)
            .unwrap();
    flat.build().unwrap();
    let hnsw =
        VectorIndex::with_dataset(vectors, IndexParams::hnsw(16, 200), DistanceMetric::Euclidean)
            .unwrap();
    hnsw.build().unwrap();

    let truth = search(&flat, &queries, 5, &SearchParams::exact());
    let found = search(&hnsw, &queries, 5, &SearchParams::exact());
    let total: f64 = truth.iter().zip(&found).map(|(t, f)| recall_at_k(t, f)).sum();
    assert!(total / 10.0 >= 0.99);
}
