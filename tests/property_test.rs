//! Property tests: exact tree searches agree with a linear scan

use approx::abs_diff_eq;
use ndarray::Array2;
use nnsearch::{DistanceMetric, IndexParams, SearchParams, VectorIndex};
use proptest::prelude::*;

const DIM: usize = 3;

fn dataset() -> impl Strategy<Value = Array2<f32>> {
    prop::collection::vec(prop::array::uniform3(-10.0f32..10.0), 1..60).prop_map(|rows| {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), DIM), flat).unwrap()
    })
}

fn distances(index: &VectorIndex<f32>, query: &Array2<f32>, k: usize) -> Vec<f32> {
    let mut ids: Vec<Vec<usize>> = Vec::new();
    let mut dists = Vec::new();
    index
        .knn_search_vec(query.view(), &mut ids, &mut dists, k, &SearchParams::exact())
        .unwrap();
    dists.remove(0)
}

fn check_against_linear(params: IndexParams, data: Array2<f32>, query: [f32; DIM], k: usize) -> bool {
    let query = Array2::from_shape_vec((1, DIM), query.to_vec()).unwrap();
    let linear =
        VectorIndex::with_dataset(data.clone(), IndexParams::linear(), DistanceMetric::Euclidean)
            .unwrap();
    linear.build().unwrap();
    let index = VectorIndex::with_dataset(data, params, DistanceMetric::Euclidean).unwrap();
    index.build().unwrap();

    let expected = distances(&linear, &query, k);
    let got = distances(&index, &query, k);
    expected.len() == got.len()
        && expected
            .iter()
            .zip(&got)
            .all(|(e, g)| abs_diff_eq!(*e, *g, epsilon = 1e-4))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn kdtree_exact_matches_linear(
        data in dataset(),
        query in prop::array::uniform3(-10.0f32..10.0),
        k in 1usize..8,
    ) {
        prop_assert!(check_against_linear(IndexParams::kdtree(2), data, query, k));
    }

    #[test]
    fn kmeans_exact_matches_linear(
        data in dataset(),
        query in prop::array::uniform3(-10.0f32..10.0),
        k in 1usize..8,
    ) {
        prop_assert!(check_against_linear(IndexParams::kmeans(4, 5), data, query, k));
    }
}
