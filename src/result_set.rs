//! Per-query result collectors shared by every backend.
//!
//! Backends only report candidates; ordering, truncation and radius filtering
//! happen here so that all algorithms produce identically shaped answers.

use crate::neighbor_queue::{sort_neighbors, MaxHeap, Neighbor};

/// Sink for the candidates a backend examines while answering one query.
pub trait ResultSet {
    /// Offer a candidate. Callers never offer the same id twice.
    fn add(&mut self, id: usize, distance: f32);

    /// Distance a candidate must beat (or match) to be kept.
    fn worst_distance(&self) -> f32;

    /// Whether the set holds as many results as it can use.
    fn is_full(&self) -> bool;

    /// Upper bound on the number of results, if there is one.
    fn capacity(&self) -> Option<usize>;
}

/// Keeps the `k` closest candidates.
#[derive(Debug)]
pub struct KnnResultSet {
    k: usize,
    heap: MaxHeap,
}

impl KnnResultSet {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: MaxHeap::new(),
        }
    }

    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

impl ResultSet for KnnResultSet {
    fn add(&mut self, id: usize, distance: f32) {
        if self.k == 0 {
            return;
        }
        if !self.is_full() || distance < self.worst_distance() {
            self.heap.push_bounded(Neighbor::new(id, distance), self.k);
        }
    }

    fn worst_distance(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map_or(f32::INFINITY, |n| n.distance)
        } else {
            f32::INFINITY
        }
    }

    fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.k)
    }
}

/// Keeps every candidate within `radius` (inclusive).
#[derive(Debug)]
pub struct RadiusResultSet {
    radius: f32,
    items: Vec<Neighbor>,
}

impl RadiusResultSet {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            items: Vec::new(),
        }
    }

    pub fn into_sorted_vec(mut self) -> Vec<Neighbor> {
        sort_neighbors(&mut self.items);
        self.items
    }
}

impl ResultSet for RadiusResultSet {
    fn add(&mut self, id: usize, distance: f32) {
        if distance <= self.radius {
            self.items.push(Neighbor::new(id, distance));
        }
    }

    fn worst_distance(&self) -> f32 {
        self.radius
    }

    fn is_full(&self) -> bool {
        true
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn_keeps_closest() {
        let mut set = KnnResultSet::new(2);
        assert_eq!(set.worst_distance(), f32::INFINITY);
        set.add(0, 5.0);
        set.add(1, 1.0);
        assert!(set.is_full());
        assert_eq!(set.worst_distance(), 5.0);
        set.add(2, 3.0);
        set.add(3, 9.0);

        let ids: Vec<usize> = set.into_sorted_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_knn_zero_k() {
        let mut set = KnnResultSet::new(0);
        set.add(0, 1.0);
        assert!(set.into_sorted_vec().is_empty());
    }

    #[test]
    fn test_radius_inclusive() {
        let mut set = RadiusResultSet::new(2.0);
        set.add(0, 2.0);
        set.add(1, 2.5);
        set.add(2, 0.5);
        assert_eq!(set.worst_distance(), 2.0);

        let result = set.into_sorted_vec();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, 2);
        assert_eq!(result[1].id, 0);
    }
}
