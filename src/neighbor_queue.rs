//! Priority queues of neighbors and tree branches: handles f32 ordering for BinaryHeap.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A neighbor entry with a distance and point id.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f32,
    pub id: usize,
}

impl Neighbor {
    pub fn new(id: usize, distance: f32) -> Self {
        Self { distance, id }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ascending by distance, ties broken by id, so BinaryHeap<Neighbor> is a max-heap.
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort ascending by distance, ties broken by id.
pub(crate) fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_unstable();
}

/// An unexplored tree branch, ordered by its lower-bound distance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Branch {
    pub distance: f32,
    pub tree: usize,
    pub node: usize,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| (self.tree, self.node).cmp(&(other.tree, other.node)))
    }
}

/// Max-heap of neighbors (largest distance on top). Used as a result set bounded by k or ef.
#[derive(Debug, Default)]
pub struct MaxHeap {
    heap: BinaryHeap<Neighbor>,
}

impl MaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(n);
    }

    /// Push and pop the max if size exceeds limit, keeping only the closest `limit` neighbors.
    pub fn push_bounded(&mut self, n: Neighbor, limit: usize) {
        self.heap.push(n);
        if self.heap.len() > limit {
            self.heap.pop();
        }
    }

    pub fn peek(&self) -> Option<&Neighbor> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a sorted Vec (ascending by distance).
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Min-heap (smallest entry on top). Used for HNSW candidates and tree branches.
#[derive(Debug)]
pub struct MinHeap<E: Ord = Neighbor> {
    heap: BinaryHeap<Reverse<E>>,
}

impl<E: Ord> Default for MinHeap<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}

impl<E: Ord> MinHeap<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: E) {
        self.heap.push(Reverse(entry));
    }

    pub fn peek(&self) -> Option<&E> {
        self.heap.peek().map(|r| &r.0)
    }

    pub fn pop(&mut self) -> Option<E> {
        self.heap.pop().map(|r| r.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
