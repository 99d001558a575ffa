//! `VectorIndex`: the multi-algorithm orchestrator.
//!
//! Owns one backend behind a read-write lock, tracks the build state machine,
//! decides between incremental insertion and full rebuilds, loads and saves
//! index files, and packages search results into dense or ragged outputs.

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::{self, Matrix};
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::persistence;
use crate::registry::BackendRegistry;
use crate::search::{fill_dense, fill_ragged, NeighborId};

/// Growth ratio since the last full build above which `add_points` rebuilds.
pub const DEFAULT_REBUILD_THRESHOLD: f32 = 2.0;

#[derive(Debug)]
struct State<T: Element> {
    backend: Box<dyn NnIndex<T>>,
    built: bool,
    /// Deserialized from a file; `build()` is then a no-op.
    loaded: bool,
    /// Live points right after the last full build or load.
    size_at_build: usize,
}

impl<T: Element> State<T> {
    fn ensure_built(&self) -> Result<()> {
        if self.built {
            Ok(())
        } else {
            Err(NnError::InvalidState("index has not been built".to_string()))
        }
    }
}

/// A nearest-neighbor index over points of element type `T`.
///
/// All methods take `&self`: searches share a read lock, mutations take the
/// write lock, so an `Arc<VectorIndex<T>>` can be queried from many threads.
#[derive(Debug)]
pub struct VectorIndex<T: Element> {
    state: RwLock<State<T>>,
    index_params: IndexParams,
    metric: DistanceMetric,
}

impl<T: Element> VectorIndex<T> {
    /// Create from configuration alone.
    ///
    /// With [`Algorithm::Saved`] the file named by the `filename` key is loaded
    /// immediately. Otherwise the index is unbuilt until [`build_with`](Self::build_with).
    pub fn new(params: IndexParams, metric: DistanceMetric) -> Result<Self> {
        Self::new_in(&BackendRegistry::default(), params, metric)
    }

    /// Create over `dataset`. The dataset is ignored when loading a saved index.
    pub fn with_dataset(dataset: Matrix<T>, params: IndexParams, metric: DistanceMetric) -> Result<Self> {
        Self::with_dataset_in(&BackendRegistry::default(), dataset, params, metric)
    }

    /// Load a saved index.
    pub fn load(path: impl AsRef<Path>, metric: DistanceMetric) -> Result<Self> {
        Self::new(IndexParams::saved(path), metric)
    }

    pub fn new_in(registry: &BackendRegistry<T>, params: IndexParams, metric: DistanceMetric) -> Result<Self> {
        Self::with_dataset_in(registry, matrix::empty(), params, metric)
    }

    pub fn load_in(
        registry: &BackendRegistry<T>,
        path: impl AsRef<Path>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Self::new_in(registry, IndexParams::saved(path), metric)
    }

    pub fn with_dataset_in(
        registry: &BackendRegistry<T>,
        dataset: Matrix<T>,
        params: IndexParams,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let algorithm = params.algorithm()?;

        let state = if algorithm == Algorithm::Saved {
            let path = params.filename()?;
            let backend = persistence::load_from_file(&path, metric, registry)?;
            info!(
                path = %path.display(),
                algorithm = %backend.algorithm(),
                points = backend.size(),
                "loaded index"
            );
            State {
                size_at_build: backend.size(),
                backend,
                built: true,
                loaded: true,
            }
        } else {
            let backend = registry.create(algorithm, dataset, &params, metric)?;
            debug!(%algorithm, %metric, points = backend.size(), "created index");
            State {
                backend,
                built: false,
                loaded: false,
                size_at_build: 0,
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            index_params: params,
            metric,
        })
    }

    /// Build over the dataset bound at construction.
    pub fn build(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.loaded {
            debug!("index was loaded from a file, build skipped");
            return Ok(());
        }
        if state.built {
            return Err(NnError::InvalidState("index is already built".to_string()));
        }
        if state.backend.capacity() == 0 {
            return Err(NnError::InvalidState(
                "no dataset is bound to the index, use build_with".to_string(),
            ));
        }

        state.backend.build()?;
        state.built = true;
        state.size_at_build = state.backend.size();
        info!(
            algorithm = %state.backend.algorithm(),
            points = state.size_at_build,
            "built index"
        );
        Ok(())
    }

    /// Replace the dataset with `points` and build, whatever the current state.
    pub fn build_with(&self, points: Matrix<T>) -> Result<()> {
        let mut state = self.state.write();
        state.backend.build_with(points)?;
        state.built = true;
        state.loaded = false;
        state.size_at_build = state.backend.size();
        info!(
            algorithm = %state.backend.algorithm(),
            points = state.size_at_build,
            "built index"
        );
        Ok(())
    }

    /// Add points with [`DEFAULT_REBUILD_THRESHOLD`].
    pub fn add_points(&self, points: ArrayView2<'_, T>) -> Result<()> {
        self.add_points_with_threshold(points, DEFAULT_REBUILD_THRESHOLD)
    }

    /// Add points, rebuilding from scratch once the index has grown by more
    /// than `threshold` times its size at the last full build.
    pub fn add_points_with_threshold(&self, points: ArrayView2<'_, T>, threshold: f32) -> Result<()> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(NnError::InvalidParameter(format!(
                "rebuild threshold must be a positive number, got {}",
                threshold
            )));
        }

        let mut state = self.state.write();
        state.ensure_built()?;
        if points.nrows() == 0 {
            return Ok(());
        }

        let grown = state.backend.size() + points.nrows();
        if state.size_at_build == 0 || grown as f32 / state.size_at_build as f32 > threshold {
            state.backend.append_points(points)?;
            state.backend.build()?;
            state.size_at_build = state.backend.size();
            info!(
                algorithm = %state.backend.algorithm(),
                points = state.size_at_build,
                "rebuilt index after growth"
            );
        } else {
            state.backend.add_points(points)?;
            debug!(added = points.nrows(), points = grown, "added points");
        }
        Ok(())
    }

    /// Remove a point; later searches never return `id`.
    pub fn remove_point(&self, id: usize) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_built()?;
        state.backend.remove_point(id)
    }

    /// A copy of the stored vector for `id`.
    pub fn point(&self, id: usize) -> Result<Vec<T>> {
        self.state
            .read()
            .backend
            .point(id)
            .map(<[T]>::to_vec)
            .ok_or(NnError::NotFound { id })
    }

    /// Write the index to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let state = self.state.read();
        state.ensure_built()?;
        persistence::save_to_file(state.backend.as_ref(), path)?;
        info!(path = %path.display(), algorithm = %state.backend.algorithm(), "saved index");
        Ok(())
    }

    /// k-NN search into dense `nq x >=k` outputs. Returns the number of neighbors written.
    pub fn knn_search<I: NeighborId>(
        &self,
        queries: ArrayView2<'_, T>,
        indices: &mut Array2<I>,
        dists: &mut Array2<f32>,
        k: usize,
        params: &SearchParams,
    ) -> Result<usize> {
        let state = self.state.read();
        state.ensure_built()?;
        let results = state.backend.knn_search(queries, k, params)?;
        fill_dense(&results, indices, dists, k)
    }

    /// k-NN search into one vector per query.
    pub fn knn_search_vec<I: NeighborId>(
        &self,
        queries: ArrayView2<'_, T>,
        indices: &mut Vec<Vec<I>>,
        dists: &mut Vec<Vec<f32>>,
        k: usize,
        params: &SearchParams,
    ) -> Result<usize> {
        let state = self.state.read();
        state.ensure_built()?;
        let results = state.backend.knn_search(queries, k, params)?;
        fill_ragged(results, indices, dists)
    }

    /// Radius search into dense outputs.
    ///
    /// Each row holds at most `min(params.max_neighbors, indices.ncols())` nearest hits.
    pub fn radius_search<I: NeighborId>(
        &self,
        queries: ArrayView2<'_, T>,
        indices: &mut Array2<I>,
        dists: &mut Array2<f32>,
        radius: f32,
        params: &SearchParams,
    ) -> Result<usize> {
        check_radius(radius)?;
        let width = params
            .max_neighbors
            .map_or(indices.ncols(), |max| max.min(indices.ncols()));

        let state = self.state.read();
        state.ensure_built()?;
        let results = state.backend.radius_search(queries, radius, params)?;
        fill_dense(&results, indices, dists, width)
    }

    /// Radius search into one vector per query, holding every hit.
    pub fn radius_search_vec<I: NeighborId>(
        &self,
        queries: ArrayView2<'_, T>,
        indices: &mut Vec<Vec<I>>,
        dists: &mut Vec<Vec<f32>>,
        radius: f32,
        params: &SearchParams,
    ) -> Result<usize> {
        check_radius(radius)?;
        let state = self.state.read();
        state.ensure_built()?;
        let results = state.backend.radius_search(queries, radius, params)?;
        fill_ragged(results, indices, dists)
    }

    /// Number of live points.
    pub fn size(&self) -> usize {
        self.state.read().backend.size()
    }

    pub fn veclen(&self) -> usize {
        self.state.read().backend.veclen()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.state.read().backend.algorithm()
    }

    pub fn used_memory(&self) -> usize {
        self.state.read().backend.used_memory()
    }

    /// The backend's normalized parameters.
    pub fn parameters(&self) -> IndexParams {
        self.state.read().backend.parameters()
    }

    /// The configuration given at construction.
    pub fn index_params(&self) -> &IndexParams {
        &self.index_params
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn is_built(&self) -> bool {
        self.state.read().built
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    /// Exchange the complete state of two indexes.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }
}

fn check_radius(radius: f32) -> Result<()> {
    if radius.is_nan() {
        return Err(NnError::InvalidParameter("radius must not be NaN".to_string()));
    }
    Ok(())
}

impl<T: Element> Clone for VectorIndex<T> {
    fn clone(&self) -> Self {
        let state = self.state.read();
        Self {
            state: RwLock::new(State {
                backend: state.backend.clone_box(),
                built: state.built,
                loaded: state.loaded,
                size_at_build: state.size_at_build,
            }),
            index_params: self.index_params.clone(),
            metric: self.metric,
        }
    }

    /// The copy is complete before `self` changes.
    fn clone_from(&mut self, source: &Self) {
        let mut fresh = source.clone();
        self.swap(&mut fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line(n: usize) -> Matrix<f32> {
        Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f32 } else { 0.0 })
    }

    fn built(algorithm: Algorithm, n: usize) -> VectorIndex<f32> {
        let index =
            VectorIndex::with_dataset(line(n), IndexParams::for_algorithm(algorithm), DistanceMetric::Euclidean)
                .unwrap();
        index.build().unwrap();
        index
    }

    #[test]
    fn test_unbuilt_rejects_operations() {
        let index =
            VectorIndex::<f32>::new(IndexParams::linear(), DistanceMetric::Euclidean).unwrap();
        assert!(!index.is_built());
        assert!(matches!(index.build(), Err(NnError::InvalidState(_))));
        assert!(matches!(index.add_points(line(2).view()), Err(NnError::InvalidState(_))));
        assert!(matches!(index.remove_point(0), Err(NnError::InvalidState(_))));

        let mut indices = Vec::<Vec<usize>>::new();
        let mut dists = Vec::new();
        assert!(matches!(
            index.knn_search_vec(line(1).view(), &mut indices, &mut dists, 1, &SearchParams::default()),
            Err(NnError::InvalidState(_))
        ));
    }

    #[test]
    fn test_build_twice_fails() {
        let index = built(Algorithm::Linear, 4);
        assert!(matches!(index.build(), Err(NnError::InvalidState(_))));
        index.build_with(line(6)).unwrap();
        assert_eq!(index.size(), 6);
    }

    #[test]
    fn test_missing_algorithm_key() {
        assert!(matches!(
            VectorIndex::<f32>::new(IndexParams::new(), DistanceMetric::Euclidean),
            Err(NnError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_incremental_add_below_threshold() {
        let index = built(Algorithm::KdTree, 10);
        index.add_points(array![[20.0f32, 0.0], [21.0, 0.0]].view()).unwrap();
        assert_eq!(index.size(), 12);
        assert_eq!(index.state.read().size_at_build, 10);
    }

    #[test]
    fn test_growth_triggers_rebuild() {
        let index = built(Algorithm::KMeans, 4);
        index.add_points(line(5).view()).unwrap();
        assert_eq!(index.size(), 9);
        assert_eq!(index.state.read().size_at_build, 9);

        let custom = built(Algorithm::Linear, 10);
        custom
            .add_points_with_threshold(line(2).view(), 1.1)
            .unwrap();
        assert_eq!(custom.state.read().size_at_build, 12);
    }

    #[test]
    fn test_empty_build_then_add_rebuilds() {
        let index = VectorIndex::<f32>::new(IndexParams::hnsw(4, 16), DistanceMetric::Euclidean).unwrap();
        index.build_with(crate::matrix::empty()).unwrap();
        index.add_points(line(3).view()).unwrap();
        assert_eq!(index.size(), 3);
        assert_eq!(index.veclen(), 2);
        assert_eq!(index.state.read().size_at_build, 3);
    }

    #[test]
    fn test_invalid_threshold() {
        let index = built(Algorithm::Linear, 2);
        for threshold in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                index.add_points_with_threshold(line(1).view(), threshold),
                Err(NnError::InvalidParameter(_))
            ));
        }
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn test_remove_then_point() {
        let index = built(Algorithm::Hnsw, 5);
        assert_eq!(index.point(3).unwrap(), vec![3.0, 0.0]);
        index.remove_point(3).unwrap();
        assert!(matches!(index.point(3), Err(NnError::NotFound { id: 3 })));

        let mut indices = Array2::<i64>::zeros((1, 5));
        let mut dists = Array2::<f32>::zeros((1, 5));
        let count = index
            .knn_search(array![[3.0f32, 0.0]].view(), &mut indices, &mut dists, 5, &SearchParams::exact())
            .unwrap();
        assert_eq!(count, 4);
        assert!(indices.iter().all(|&id| id != 3));
        assert_eq!(indices[[0, 4]], -1);
        assert_eq!(dists[[0, 4]], f32::INFINITY);
    }

    #[test]
    fn test_dense_radius_capped() {
        let index = built(Algorithm::Linear, 10);
        let mut indices = Array2::<u32>::zeros((1, 4));
        let mut dists = Array2::<f32>::zeros((1, 4));
        let params = SearchParams::default().with_max_neighbors(2);
        let count = index
            .radius_search(array![[0.0f32, 0.0]].view(), &mut indices, &mut dists, 5.0, &params)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(indices.row(0).to_vec(), vec![0, 1, 0, 0]);

        let mut ragged: Vec<Vec<u32>> = Vec::new();
        let mut ragged_dists = Vec::new();
        let count = index
            .radius_search_vec(array![[0.0f32, 0.0]].view(), &mut ragged, &mut ragged_dists, 5.0, &params)
            .unwrap();
        assert_eq!(count, 6);
        assert_eq!(ragged[0], vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_clone_is_independent() {
        let index = built(Algorithm::Linear, 3);
        let copy = index.clone();
        index.remove_point(0).unwrap();
        assert_eq!(copy.size(), 3);
        assert_eq!(index.size(), 2);

        let mut target = built(Algorithm::KdTree, 8);
        target.clone_from(&index);
        assert_eq!(target.algorithm(), Algorithm::Linear);
        assert_eq!(target.size(), 2);
    }

    #[test]
    fn test_swap() {
        let mut a = built(Algorithm::Linear, 3);
        let mut b = built(Algorithm::Hnsw, 7);
        a.swap(&mut b);
        assert_eq!(a.algorithm(), Algorithm::Hnsw);
        assert_eq!(a.size(), 7);
        assert_eq!(b.size(), 3);
    }
}
