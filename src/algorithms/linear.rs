//! Brute-force linear index: O(n) exact search

use std::io::{Read, Write};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::Matrix;
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::persistence::serialization::{read_block, write_block};
use crate::point_store::PointStore;
use crate::result_set::ResultSet;

/// A linear index that computes the distance to every stored point.
///
/// Always exact; `SearchParams::checks` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearIndex<T> {
    store: PointStore<T>,
    metric: DistanceMetric,
}

impl<T: Element> LinearIndex<T> {
    /// Create a linear index over `dataset`.
    pub fn new(dataset: Matrix<T>, metric: DistanceMetric) -> Self {
        Self {
            store: PointStore::from_matrix(&dataset),
            metric,
        }
    }

    /// Create from configuration. The linear index has no hyperparameters.
    pub fn from_params(dataset: Matrix<T>, _params: &IndexParams, metric: DistanceMetric) -> Self {
        Self::new(dataset, metric)
    }
}

impl<T: Element> NnIndex<T> for LinearIndex<T> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Linear
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn build(&mut self) -> Result<()> {
        Ok(())
    }

    fn build_with(&mut self, points: Matrix<T>) -> Result<()> {
        self.store = PointStore::from_matrix(&points);
        Ok(())
    }

    fn add_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        self.store.append(points)?;
        Ok(())
    }

    fn append_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        self.add_points(points)
    }

    fn remove_point(&mut self, id: usize) -> Result<()> {
        self.store.remove(id)
    }

    fn point(&self, id: usize) -> Option<&[T]> {
        self.store.point(id)
    }

    fn find_neighbors(&self, query: &[T], result: &mut dyn ResultSet, _params: &SearchParams) {
        for id in self.store.live_ids() {
            let distance = self.metric.distance(query, self.store.row(id));
            result.add(id, distance);
        }
    }

    fn size(&self) -> usize {
        self.store.len()
    }

    fn capacity(&self) -> usize {
        self.store.capacity()
    }

    fn veclen(&self) -> usize {
        self.store.veclen()
    }

    fn used_memory(&self) -> usize {
        self.store.used_memory()
    }

    fn parameters(&self) -> IndexParams {
        IndexParams::for_algorithm(Algorithm::Linear)
    }

    fn save_payload(&self, writer: &mut dyn Write) -> Result<()> {
        write_block(writer, self)
    }

    fn load_payload(&mut self, reader: &mut dyn Read) -> Result<()> {
        let loaded: Self = read_block(reader)?;
        if loaded.metric != self.metric {
            return Err(NnError::MetricMismatch {
                expected: self.metric,
                found: loaded.metric,
            });
        }
        loaded.store.validate()?;
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn NnIndex<T>> {
        Box::new(self.clone())
    }
}
