//! Randomized kd-tree forest.
//!
//! Each tree splits on a dimension drawn at random from the few with the highest
//! variance, so the trees partition space differently. Approximate search walks
//! all trees at once in best-bin-first order until the check budget runs out;
//! exact search descends a single tree with per-axis lower bounds.

use std::io::{Read, Write};

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::Matrix;
use crate::neighbor_queue::{Branch, MinHeap};
use crate::params::{Algorithm, Checks, IndexParams, SearchParams};
use crate::persistence::serialization::{read_block, write_block};
use crate::point_store::PointStore;
use crate::result_set::ResultSet;

/// Points sampled when estimating split statistics.
const SAMPLE_SIZE: usize = 100;
/// Number of highest-variance dimensions a split is drawn from.
const RAND_DIM: usize = 5;

/// Configuration parameters for the kd-tree forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdTreeParams {
    /// Number of randomized trees.
    pub trees: usize,
    /// Seed for shuffling and split selection.
    pub seed: u64,
}

impl Default for KdTreeParams {
    fn default() -> Self {
        Self { trees: 4, seed: 0 }
    }
}

impl KdTreeParams {
    pub fn from_params(params: &IndexParams) -> Result<Self> {
        let defaults = Self::default();
        let trees = params.get_or("trees", defaults.trees)?;
        if trees == 0 {
            return Err(NnError::InvalidParameter("trees must be at least 1".to_string()));
        }
        Ok(Self {
            trees,
            seed: params.get_or("seed", defaults.seed)?,
        })
    }

    pub fn to_params(&self) -> IndexParams {
        IndexParams::for_algorithm(Algorithm::KdTree)
            .with("trees", self.trees)
            .with("seed", self.seed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum KdNode {
    /// Usually a single point; identical points share a leaf.
    Leaf { points: Vec<usize> },
    /// Points with `coord < value` live under `left`, the rest under `right`.
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KdTree {
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl KdTree {
    /// Every node, point and split dimension reference must be in range.
    fn validate(&self, capacity: usize, veclen: usize) -> Result<()> {
        let corrupt = |what: &str| Err(NnError::CorruptIndex(format!("kdtree {} out of range", what)));
        let node_count = self.nodes.len();
        if self.root.map_or(false, |root| root >= node_count) {
            return corrupt("root");
        }
        for node in &self.nodes {
            match node {
                KdNode::Leaf { points } => {
                    if points.iter().any(|&id| id >= capacity) {
                        return corrupt("point id");
                    }
                }
                KdNode::Split { dim, left, right, .. } => {
                    if *dim >= veclen {
                        return corrupt("split dimension");
                    }
                    if *left >= node_count || *right >= node_count {
                        return corrupt("child");
                    }
                }
            }
        }
        Ok(())
    }
}

/// A forest of randomized kd-trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdTreeIndex<T> {
    store: PointStore<T>,
    metric: DistanceMetric,
    config: KdTreeParams,
    trees: Vec<KdTree>,
}

/// Mutable state of one approximate query.
struct ApproxSearch<'a> {
    query: &'a [f32],
    max_checks: usize,
    eps_error: f32,
    checked: usize,
    visited: Vec<bool>,
    branches: MinHeap<Branch>,
}

impl<T: Element> KdTreeIndex<T> {
    /// Create an unbuilt forest over `dataset`.
    pub fn new(dataset: Matrix<T>, metric: DistanceMetric, config: KdTreeParams) -> Result<Self> {
        if !metric.supports_axis_bounds() {
            return Err(NnError::InvalidParameter(format!(
                "kdtree requires an axis-decomposable metric, got {}",
                metric
            )));
        }
        Ok(Self {
            store: PointStore::from_matrix(&dataset),
            metric,
            config,
            trees: Vec::new(),
        })
    }

    pub fn from_params(
        dataset: Matrix<T>,
        params: &IndexParams,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Self::new(dataset, metric, KdTreeParams::from_params(params)?)
    }

    #[inline]
    fn coord(&self, id: usize, dim: usize) -> f32 {
        self.store.row(id)[dim].to_f32()
    }

    fn build_trees(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let ids: Vec<usize> = self.store.live_ids().collect();

        let trees = (0..self.config.trees)
            .map(|_| {
                let mut ids = ids.clone();
                ids.shuffle(&mut rng);
                let mut tree = KdTree::default();
                if !ids.is_empty() {
                    tree.root = Some(self.divide(&mut tree, &mut ids, &mut rng));
                }
                tree
            })
            .collect();
        self.trees = trees;
    }

    /// Recursively split `ids` and return the index of the subtree root.
    fn divide(&self, tree: &mut KdTree, ids: &mut [usize], rng: &mut StdRng) -> usize {
        if ids.len() == 1 || self.store.veclen() == 0 {
            tree.nodes.push(KdNode::Leaf {
                points: ids.to_vec(),
            });
            return tree.nodes.len() - 1;
        }

        let (dim, mut value) = self.mean_split(ids, rng);
        let mut lim = partition(ids, |id| self.coord(id, dim) < value);

        if lim == 0 || lim == ids.len() {
            // Degenerate split: fall back to the median position along `dim`.
            lim = ids.len() / 2;
            ids.select_nth_unstable_by(lim, |&a, &b| {
                self.coord(a, dim).total_cmp(&self.coord(b, dim))
            });
            value = self.coord(ids[lim], dim);
        }

        let (left_ids, right_ids) = ids.split_at_mut(lim);
        let left = self.divide(tree, left_ids, rng);
        let right = self.divide(tree, right_ids, rng);
        tree.nodes.push(KdNode::Split {
            dim,
            value,
            left,
            right,
        });
        tree.nodes.len() - 1
    }

    /// Pick a split dimension among the highest-variance ones and split at the mean.
    fn mean_split(&self, ids: &[usize], rng: &mut StdRng) -> (usize, f32) {
        let veclen = self.store.veclen();
        let sample = &ids[..ids.len().min(SAMPLE_SIZE)];
        let n = sample.len() as f32;

        let mut mean = vec![0.0f32; veclen];
        for &id in sample {
            for (m, x) in mean.iter_mut().zip(self.store.row(id)) {
                *m += x.to_f32();
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance: Vec<(f32, usize)> = (0..veclen).map(|d| (0.0, d)).collect();
        for &id in sample {
            for (d, x) in self.store.row(id).iter().enumerate() {
                let dev = x.to_f32() - mean[d];
                variance[d].0 += dev * dev;
            }
        }
        variance.sort_by(|a, b| b.0.total_cmp(&a.0));

        let candidates = veclen.min(RAND_DIM);
        let dim = variance[rng.gen_range(0..candidates)].1;
        (dim, mean[dim])
    }

    /// Insert a stored point into one tree, splitting the leaf it lands in.
    fn insert_into_tree(&self, tree: &mut KdTree, id: usize) {
        let root = match tree.root {
            Some(root) => root,
            None => {
                tree.nodes.push(KdNode::Leaf { points: vec![id] });
                tree.root = Some(tree.nodes.len() - 1);
                return;
            }
        };

        let point = self.store.row(id);
        let mut node = root;
        while let KdNode::Split {
            dim,
            value,
            left,
            right,
        } = &tree.nodes[node]
        {
            node = if point[*dim].to_f32() < *value { *left } else { *right };
        }

        let existing = match &tree.nodes[node] {
            KdNode::Leaf { points } if !points.is_empty() => points[0],
            _ => {
                tree.nodes[node] = KdNode::Leaf { points: vec![id] };
                return;
            }
        };

        let other = self.store.row(existing);
        let (dim, spread) = point
            .iter()
            .zip(other)
            .map(|(a, b)| (a.to_f32() - b.to_f32()).abs())
            .enumerate()
            .fold((0, 0.0f32), |best, (d, s)| if s > best.1 { (d, s) } else { best });

        if spread == 0.0 {
            if let KdNode::Leaf { points } = &mut tree.nodes[node] {
                points.push(id);
            }
            return;
        }

        let value = (point[dim].to_f32() + other[dim].to_f32()) / 2.0;
        let old_points = match std::mem::replace(&mut tree.nodes[node], KdNode::Leaf { points: Vec::new() }) {
            KdNode::Leaf { points } => points,
            split => {
                tree.nodes[node] = split;
                return;
            }
        };

        let (mut left_points, mut right_points): (Vec<usize>, Vec<usize>) = old_points
            .into_iter()
            .partition(|&p| self.coord(p, dim) < value);
        if point[dim].to_f32() < value {
            left_points.push(id);
        } else {
            right_points.push(id);
        }

        tree.nodes.push(KdNode::Leaf { points: left_points });
        let left = tree.nodes.len() - 1;
        tree.nodes.push(KdNode::Leaf { points: right_points });
        let right = tree.nodes.len() - 1;
        tree.nodes[node] = KdNode::Split {
            dim,
            value,
            left,
            right,
        };
    }

    fn check_leaf(&self, points: &[usize], query: &[T], result: &mut dyn ResultSet) {
        for &id in points {
            if self.store.is_live(id) {
                result.add(id, self.metric.distance(query, self.store.row(id)));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn search_exact(
        &self,
        tree: &KdTree,
        node: usize,
        query: &[T],
        query_f32: &[f32],
        result: &mut dyn ResultSet,
        offsets: &mut [f32],
        bound_sum: f32,
        eps_error: f32,
    ) {
        match &tree.nodes[node] {
            KdNode::Leaf { points } => self.check_leaf(points, query, result),
            KdNode::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query_f32[*dim] - value;
                let (best, other) = if diff < 0.0 { (*left, *right) } else { (*right, *left) };

                self.search_exact(tree, best, query, query_f32, result, offsets, bound_sum, eps_error);

                let old_term = offsets[*dim];
                let new_term = self.metric.axis_term(diff);
                let new_sum = bound_sum - old_term + new_term;
                if self.metric.bound_from_terms(new_sum) * eps_error <= result.worst_distance() {
                    offsets[*dim] = new_term;
                    self.search_exact(tree, other, query, query_f32, result, offsets, new_sum, eps_error);
                    offsets[*dim] = old_term;
                }
            }
        }
    }

    fn search_level(
        &self,
        state: &mut ApproxSearch<'_>,
        tree_idx: usize,
        mut node: usize,
        mindist: f32,
        query: &[T],
        result: &mut dyn ResultSet,
    ) {
        if self.metric.bound_from_terms(mindist) > result.worst_distance() {
            return;
        }

        let tree = &self.trees[tree_idx];
        loop {
            match &tree.nodes[node] {
                KdNode::Leaf { points } => {
                    if state.checked >= state.max_checks && result.is_full() {
                        return;
                    }
                    for &id in points {
                        if state.visited[id] || !self.store.is_live(id) {
                            continue;
                        }
                        state.visited[id] = true;
                        state.checked += 1;
                        result.add(id, self.metric.distance(query, self.store.row(id)));
                    }
                    return;
                }
                KdNode::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = state.query[*dim] - value;
                    let (best, other) = if diff < 0.0 { (*left, *right) } else { (*right, *left) };

                    let other_dist = mindist + self.metric.axis_term(diff);
                    if self.metric.bound_from_terms(other_dist) * state.eps_error
                        < result.worst_distance()
                        || !result.is_full()
                    {
                        state.branches.push(Branch {
                            distance: other_dist,
                            tree: tree_idx,
                            node: other,
                        });
                    }
                    node = best;
                }
            }
        }
    }

    fn search_approximate(
        &self,
        query: &[T],
        query_f32: &[f32],
        result: &mut dyn ResultSet,
        max_checks: usize,
        eps_error: f32,
    ) {
        let mut state = ApproxSearch {
            query: query_f32,
            max_checks,
            eps_error,
            checked: 0,
            visited: vec![false; self.store.capacity()],
            branches: MinHeap::new(),
        };

        for (tree_idx, tree) in self.trees.iter().enumerate() {
            if let Some(root) = tree.root {
                self.search_level(&mut state, tree_idx, root, 0.0, query, result);
            }
        }

        while let Some(branch) = state.branches.pop() {
            if state.checked >= state.max_checks && result.is_full() {
                break;
            }
            self.search_level(&mut state, branch.tree, branch.node, branch.distance, query, result);
        }
    }
}

/// Reorder `ids` so that entries satisfying `pred` come first; returns their count.
fn partition(ids: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut lim = 0;
    for i in 0..ids.len() {
        if pred(ids[i]) {
            ids.swap(i, lim);
            lim += 1;
        }
    }
    lim
}

impl<T: Element> NnIndex<T> for KdTreeIndex<T> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::KdTree
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn build(&mut self) -> Result<()> {
        self.build_trees();
        Ok(())
    }

    fn build_with(&mut self, points: Matrix<T>) -> Result<()> {
        self.store = PointStore::from_matrix(&points);
        self.build_trees();
        Ok(())
    }

    fn add_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        let ids = self.store.append(points)?;
        let mut trees = std::mem::take(&mut self.trees);
        for tree in &mut trees {
            for id in ids.clone() {
                self.insert_into_tree(tree, id);
            }
        }
        self.trees = trees;
        Ok(())
    }

    fn append_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        self.store.append(points)?;
        Ok(())
    }

    fn remove_point(&mut self, id: usize) -> Result<()> {
        self.store.remove(id)
    }

    fn point(&self, id: usize) -> Option<&[T]> {
        self.store.point(id)
    }

    fn find_neighbors(&self, query: &[T], result: &mut dyn ResultSet, params: &SearchParams) {
        let query_f32: Vec<f32> = query.iter().map(|x| x.to_f32()).collect();
        let eps_error = 1.0 + params.eps;

        match params.checks {
            Checks::Unlimited => {
                if let Some(tree) = self.trees.first() {
                    if let Some(root) = tree.root {
                        let mut offsets = vec![0.0f32; self.store.veclen()];
                        self.search_exact(tree, root, query, &query_f32, result, &mut offsets, 0.0, eps_error);
                    }
                }
            }
            Checks::Limited(max_checks) => {
                self.search_approximate(query, &query_f32, result, max_checks, eps_error);
            }
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
        let nodes: usize = self
            .trees
            .iter()
            .map(|t| t.nodes.capacity() * std::mem::size_of::<KdNode>())
            .sum();
        self.store.used_memory() + nodes
    }

    fn parameters(&self) -> IndexParams {
        self.config.to_params()
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
        for tree in &loaded.trees {
            tree.validate(loaded.store.capacity(), loaded.store.veclen())?;
        }
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn NnIndex<T>> {
        Box::new(self.clone())
    }
}
