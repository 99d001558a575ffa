//! Row storage shared by all backends, with stable ids and tombstones.

use std::ops::Range;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::{NnError, Result};
use crate::matrix::Matrix;

/// Flat row-major copy of every point an index has been given.
///
/// A point's id is its row position. Removal only sets a tombstone, so ids stay
/// stable for the lifetime of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointStore<T> {
    veclen: usize,
    data: Vec<T>,
    removed: Vec<bool>,
    removed_count: usize,
}

impl<T: Element> PointStore<T> {
    pub fn new() -> Self {
        Self {
            veclen: 0,
            data: Vec::new(),
            removed: Vec::new(),
            removed_count: 0,
        }
    }

    /// Copy every row of `dataset`.
    pub fn from_matrix(dataset: &Matrix<T>) -> Self {
        let mut store = Self::new();
        store.veclen = dataset.ncols();
        store.data = dataset.iter().copied().collect();
        store.removed = vec![false; dataset.nrows()];
        store
    }

    /// Append a batch, returning the ids assigned to it.
    pub fn append(&mut self, points: ArrayView2<'_, T>) -> Result<Range<usize>> {
        if self.capacity() == 0 && self.veclen == 0 {
            self.veclen = points.ncols();
        } else if points.ncols() != self.veclen {
            return Err(NnError::DimensionMismatch {
                expected: self.veclen,
                actual: points.ncols(),
            });
        }

        let start = self.capacity();
        self.data.extend(points.iter().copied());
        self.removed.resize(start + points.nrows(), false);
        Ok(start..self.capacity())
    }

    /// The stored vector for a live id.
    #[inline]
    pub fn point(&self, id: usize) -> Option<&[T]> {
        if self.is_live(id) {
            Some(self.row(id))
        } else {
            None
        }
    }

    /// Raw row access regardless of tombstones. `id` must be below `capacity()`.
    #[inline]
    pub(crate) fn row(&self, id: usize) -> &[T] {
        let start = id * self.veclen;
        &self.data[start..start + self.veclen]
    }

    #[inline]
    pub fn is_live(&self, id: usize) -> bool {
        self.removed.get(id).map_or(false, |removed| !removed)
    }

    /// Tombstone a point. Unknown and already removed ids fail with `NotFound`.
    pub fn remove(&mut self, id: usize) -> Result<()> {
        if !self.is_live(id) {
            return Err(NnError::NotFound { id });
        }
        self.removed[id] = true;
        self.removed_count += 1;
        Ok(())
    }

    /// Ids of all points that have not been removed, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.removed
            .iter()
            .enumerate()
            .filter(|(_, removed)| !**removed)
            .map(|(id, _)| id)
    }

    /// Number of live points.
    pub fn len(&self) -> usize {
        self.capacity() - self.removed_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids ever assigned, including removed ones.
    pub fn capacity(&self) -> usize {
        self.removed.len()
    }

    pub fn veclen(&self) -> usize {
        self.veclen
    }

    pub fn used_memory(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<T>() + self.removed.capacity()
    }

    /// Check the internal bookkeeping of a deserialized store.
    pub fn validate(&self) -> Result<()> {
        let expected = self.capacity().checked_mul(self.veclen);
        if expected != Some(self.data.len()) {
            return Err(NnError::CorruptIndex(format!(
                "point data holds {} values, expected {} rows of {}",
                self.data.len(),
                self.capacity(),
                self.veclen
            )));
        }
        let removed = self.removed.iter().filter(|r| **r).count();
        if removed != self.removed_count {
            return Err(NnError::CorruptIndex(format!(
                "removed count is {}, tombstones say {}",
                self.removed_count, removed
            )));
        }
        Ok(())
    }
}

impl<T: Element> Default for PointStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_validate_detects_bad_bookkeeping() {
        let mut store = PointStore::from_matrix(&array![[1.0f32, 2.0], [3.0, 4.0]]);
        assert!(store.validate().is_ok());

        store.data.pop();
        assert!(matches!(store.validate(), Err(NnError::CorruptIndex(_))));

        let mut store = PointStore::from_matrix(&array![[1.0f32, 2.0]]);
        store.removed_count = 1;
        assert!(matches!(store.validate(), Err(NnError::CorruptIndex(_))));
    }

    #[test]
    fn test_from_matrix() {
        let store = PointStore::from_matrix(&array![[1.0f32, 2.0], [3.0, 4.0]]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.veclen(), 2);
        assert_eq!(store.point(1), Some(&[3.0f32, 4.0][..]));
        assert_eq!(store.point(2), None);
    }

    #[test]
    fn test_append_assigns_ids() {
        let mut store = PointStore::new();
        let ids = store.append(array![[1u8, 2, 3]].view()).unwrap();
        assert_eq!(ids, 0..1);
        let ids = store.append(array![[4u8, 5, 6], [7, 8, 9]].view()).unwrap();
        assert_eq!(ids, 1..3);
        assert_eq!(store.point(2), Some(&[7u8, 8, 9][..]));
    }

    #[test]
    fn test_append_dimension_mismatch() {
        let mut store = PointStore::from_matrix(&array![[1.0f32, 2.0]]);
        assert!(matches!(
            store.append(array![[1.0f32, 2.0, 3.0]].view()),
            Err(NnError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(store.capacity(), 1);
    }

    #[test]
    fn test_remove_tombstones() {
        let mut store = PointStore::from_matrix(&array![[1.0f32], [2.0], [3.0]]);
        store.remove(1).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.capacity(), 3);
        assert_eq!(store.point(1), None);
        assert_eq!(store.live_ids().collect::<Vec<_>>(), vec![0, 2]);
        assert!(matches!(store.remove(1), Err(NnError::NotFound { id: 1 })));
        assert!(matches!(store.remove(9), Err(NnError::NotFound { id: 9 })));
    }
}
