//! Backend trait for pluggable nearest-neighbor algorithms

use std::fmt;
use std::io::{Read, Write};

use ndarray::ArrayView2;

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::matrix::Matrix;
use crate::neighbor_queue::Neighbor;
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::persistence::IndexHeader;
use crate::result_set::{KnnResultSet, RadiusResultSet, ResultSet};
use crate::search;

/// A nearest-neighbor algorithm that the orchestrator can own and drive.
///
/// Point ids are row positions in the backend's point store and stay stable across
/// removals and rebuilds. Implementations are not internally synchronized; the
/// owning `VectorIndex` serializes writers against readers.
pub trait NnIndex<T: Element>: Send + Sync + fmt::Debug {
    /// The algorithm tag written to saved headers.
    fn algorithm(&self) -> Algorithm;

    /// The distance metric the index was built with.
    fn metric(&self) -> DistanceMetric;

    /// Build search structures over every stored point.
    fn build(&mut self) -> Result<()>;

    /// Replace the stored points with `points` and build.
    fn build_with(&mut self, points: Matrix<T>) -> Result<()>;

    /// Insert points into the live structures without a full rebuild.
    fn add_points(&mut self, points: ArrayView2<'_, T>) -> Result<()>;

    /// Store points without indexing them. The caller must `build` afterwards.
    fn append_points(&mut self, points: ArrayView2<'_, T>) -> Result<()>;

    /// Tombstone a point so that no later search returns it.
    fn remove_point(&mut self, id: usize) -> Result<()>;

    /// The stored vector for a live id.
    fn point(&self, id: usize) -> Option<&[T]>;

    /// Offer every candidate the algorithm examines for `query` to `result`.
    fn find_neighbors(&self, query: &[T], result: &mut dyn ResultSet, params: &SearchParams);

    /// Number of live points.
    fn size(&self) -> usize;

    /// Number of ids assigned, including removed points.
    fn capacity(&self) -> usize;

    fn veclen(&self) -> usize;

    /// Approximate heap usage in bytes.
    fn used_memory(&self) -> usize;

    /// Normalized parameters: the algorithm tag plus every hyperparameter in use.
    fn parameters(&self) -> IndexParams;

    /// Write the algorithm-specific bytes that follow the header.
    fn save_payload(&self, writer: &mut dyn Write) -> Result<()>;

    /// Replace this backend's state with a payload written by `save_payload`.
    fn load_payload(&mut self, reader: &mut dyn Read) -> Result<()>;

    fn clone_box(&self) -> Box<dyn NnIndex<T>>;

    /// Write the shared header followed by the payload.
    fn save_index(&self, writer: &mut dyn Write) -> Result<()> {
        IndexHeader::new(T::TYPE, self.algorithm(), self.capacity(), self.veclen())
            .write_to(writer)?;
        self.save_payload(writer)
    }

    /// Read the shared header, check that it belongs to this backend, then the payload.
    fn load_index(&mut self, reader: &mut dyn Read) -> Result<()> {
        let header = IndexHeader::read_from(reader)?;
        if header.element_type != T::TYPE {
            return Err(NnError::TypeMismatch {
                expected: T::TYPE,
                found: header.element_type,
            });
        }
        if header.algorithm != self.algorithm() {
            return Err(NnError::CorruptIndex(format!(
                "header names {}, backend is {}",
                header.algorithm,
                self.algorithm()
            )));
        }
        self.load_payload(reader)?;
        if self.capacity() as u64 != header.rows || self.veclen() as u64 != header.veclen {
            return Err(NnError::CorruptIndex(format!(
                "header describes {}x{} points, payload holds {}x{}",
                header.rows,
                header.veclen,
                self.capacity(),
                self.veclen()
            )));
        }
        Ok(())
    }

    /// The `k` nearest neighbors of each query row, ascending by distance.
    fn knn_search(
        &self,
        queries: ArrayView2<'_, T>,
        k: usize,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Neighbor>>> {
        search::run_queries(queries, self.veclen(), params, |query| {
            let mut result = KnnResultSet::new(k);
            if k > 0 {
                self.find_neighbors(query, &mut result, params);
            }
            result.into_sorted_vec()
        })
    }

    /// Every point within `radius` of each query row, ascending by distance.
    fn radius_search(
        &self,
        queries: ArrayView2<'_, T>,
        radius: f32,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Neighbor>>> {
        search::run_queries(queries, self.veclen(), params, |query| {
            let mut result = RadiusResultSet::new(radius);
            self.find_neighbors(query, &mut result, params);
            result.into_sorted_vec()
        })
    }
}
