//! HNSW (Hierarchical Navigable Small World) index module.

pub mod graph;

pub use graph::{HnswGraph, HnswParams};

use std::io::{Read, Write};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::Matrix;
use crate::neighbor_queue::Neighbor;
use crate::params::{Algorithm, Checks, IndexParams, SearchParams};
use crate::persistence::serialization::{read_block, write_block};
use crate::point_store::PointStore;
use crate::result_set::ResultSet;

/// An HNSW-based approximate nearest neighbor index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex<T> {
    store: PointStore<T>,
    graph: HnswGraph,
}

impl<T: Element> HnswIndex<T> {
    /// Create an unbuilt index over `dataset`.
    pub fn new(dataset: Matrix<T>, metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            store: PointStore::from_matrix(&dataset),
            graph: HnswGraph::new(metric, params),
        }
    }

    pub fn from_params(
        dataset: Matrix<T>,
        params: &IndexParams,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Ok(Self::new(dataset, metric, HnswParams::from_params(params)?))
    }

    /// Search with a specific ef value for runtime tuning.
    pub fn search_with_ef(&self, query: &[T], k: usize, ef: usize) -> Vec<Neighbor> {
        self.graph.search_knn(&self.store, query, k, ef)
    }

    fn rebuild_graph(&mut self) -> Result<()> {
        let mut graph = HnswGraph::new(self.graph.metric(), self.graph.params().clone());
        for id in self.store.live_ids() {
            graph.insert(&self.store, id)?;
        }
        self.graph = graph;
        Ok(())
    }
}

impl<T: Element> NnIndex<T> for HnswIndex<T> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hnsw
    }

    fn metric(&self) -> DistanceMetric {
        self.graph.metric()
    }

    fn build(&mut self) -> Result<()> {
        self.rebuild_graph()
    }

    fn build_with(&mut self, points: Matrix<T>) -> Result<()> {
        self.store = PointStore::from_matrix(&points);
        self.rebuild_graph()
    }

    fn add_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        let ids = self.store.append(points)?;
        for id in ids {
            self.graph.insert(&self.store, id)?;
        }
        Ok(())
    }

    fn append_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        self.store.append(points)?;
        Ok(())
    }

    fn remove_point(&mut self, id: usize) -> Result<()> {
        self.store.remove(id)?;
        self.graph.remove(id);
        Ok(())
    }

    fn point(&self, id: usize) -> Option<&[T]> {
        self.store.point(id)
    }

    fn find_neighbors(&self, query: &[T], result: &mut dyn ResultSet, params: &SearchParams) {
        let k = result.capacity().unwrap_or(0);
        let ef = match params.checks {
            Checks::Limited(checks) => k.max(checks).max(self.graph.params().ef_search),
            Checks::Unlimited => self.store.len(),
        };
        for neighbor in self.graph.search(&self.store, query, ef) {
            result.add(neighbor.id, neighbor.distance);
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
        self.store.used_memory() + self.graph.used_memory()
    }

    fn parameters(&self) -> IndexParams {
        self.graph.params().to_params()
    }

    fn save_payload(&self, writer: &mut dyn Write) -> Result<()> {
        write_block(writer, self)
    }

    fn load_payload(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut loaded: Self = read_block(reader)?;
        if loaded.graph.metric() != self.graph.metric() {
            return Err(NnError::MetricMismatch {
                expected: self.graph.metric(),
                found: loaded.graph.metric(),
            });
        }
        loaded.store.validate()?;
        loaded.graph.validate(loaded.store.capacity())?;
        let seed = loaded.graph.params().seed ^ loaded.store.capacity() as u64;
        loaded.graph.reseed(seed);
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn NnIndex<T>> {
        Box::new(self.clone())
    }
}
