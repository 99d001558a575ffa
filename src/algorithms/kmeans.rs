//! Hierarchical k-means tree.
//!
//! Every internal node clusters its points into `branching` groups and recurses.
//! Nodes keep the pivot (cluster mean) and the radius of the ball enclosing their
//! points, which lets exact search skip whole subtrees for metrics obeying the
//! triangle inequality.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use ndarray::ArrayView2;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::distance::{squared_euclidean_distance, DistanceMetric};
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::Matrix;
use crate::neighbor_queue::{Branch, MinHeap};
use crate::params::{Algorithm, Checks, IndexParams, SearchParams};
use crate::persistence::serialization::{read_block, write_block};
use crate::point_store::PointStore;
use crate::result_set::ResultSet;

/// How initial cluster centers are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentersInit {
    /// Distinct points drawn uniformly.
    Random,
    /// k-means++ seeding: later centers favour points far from earlier ones.
    KMeansPlusPlus,
}

impl fmt::Display for CentersInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentersInit::Random => f.write_str("random"),
            CentersInit::KMeansPlusPlus => f.write_str("kmeanspp"),
        }
    }
}

impl FromStr for CentersInit {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(CentersInit::Random),
            "kmeanspp" | "kmeans++" => Ok(CentersInit::KMeansPlusPlus),
            other => Err(NnError::InvalidParameter(format!(
                "unknown centers_init: {}",
                other
            ))),
        }
    }
}

/// Configuration parameters for the k-means tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    /// Children per internal node; leaves hold fewer than this many points.
    pub branching: usize,
    /// Lloyd iterations per clustering, or -1 to run until assignments settle.
    pub iterations: i64,
    pub centers_init: CentersInit,
    /// Weight of a cluster's spread when ranking unexplored branches.
    pub cb_index: f32,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            branching: 32,
            iterations: 11,
            centers_init: CentersInit::Random,
            cb_index: 0.2,
            seed: 0,
        }
    }
}

impl KMeansParams {
    pub fn from_params(params: &IndexParams) -> Result<Self> {
        let defaults = Self::default();
        let branching = params.get_or("branching", defaults.branching)?;
        if branching < 2 {
            return Err(NnError::InvalidParameter(
                "branching must be at least 2".to_string(),
            ));
        }

        let cb_index = params.get_or("cb_index", defaults.cb_index)?;
        if !cb_index.is_finite() || cb_index < 0.0 {
            return Err(NnError::InvalidParameter(format!(
                "cb_index must be a non-negative number, got {}",
                cb_index
            )));
        }

        let centers_init = match params.get_value("centers_init") {
            Some(_) => params.get::<String>("centers_init")?.parse()?,
            None => defaults.centers_init,
        };

        Ok(Self {
            branching,
            iterations: params.get_or("iterations", defaults.iterations)?,
            centers_init,
            cb_index,
            seed: params.get_or("seed", defaults.seed)?,
        })
    }

    pub fn to_params(&self) -> IndexParams {
        IndexParams::kmeans(self.branching, self.iterations)
            .with("centers_init", self.centers_init.to_string())
            .with("cb_index", self.cb_index)
            .with("seed", self.seed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KMeansNode {
    pivot: Vec<f32>,
    /// Largest distance from the pivot to any point below this node.
    radius: f32,
    /// Mean distance from the pivot to the node's points.
    variance: f32,
    size: usize,
    children: Vec<usize>,
    /// Point ids; only populated on leaves.
    points: Vec<usize>,
}

impl KMeansNode {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Hierarchical k-means tree over a point store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansIndex<T> {
    store: PointStore<T>,
    metric: DistanceMetric,
    config: KMeansParams,
    nodes: Vec<KMeansNode>,
    root: Option<usize>,
}

impl<T: Element> KMeansIndex<T> {
    pub fn new(dataset: Matrix<T>, metric: DistanceMetric, config: KMeansParams) -> Self {
        Self {
            store: PointStore::from_matrix(&dataset),
            metric,
            config,
            nodes: Vec::new(),
            root: None,
        }
    }

    pub fn from_params(
        dataset: Matrix<T>,
        params: &IndexParams,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Ok(Self::new(dataset, metric, KMeansParams::from_params(params)?))
    }

    fn build_tree(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let ids: Vec<usize> = self.store.live_ids().collect();
        let mut nodes = Vec::new();
        self.root = if ids.is_empty() {
            None
        } else {
            Some(self.make_node(&mut nodes, ids, &mut rng))
        };
        self.nodes = nodes;
    }

    fn make_node(&self, nodes: &mut Vec<KMeansNode>, ids: Vec<usize>, rng: &mut StdRng) -> usize {
        let idx = nodes.len();
        nodes.push(KMeansNode {
            pivot: Vec::new(),
            radius: 0.0,
            variance: 0.0,
            size: 0,
            children: Vec::new(),
            points: Vec::new(),
        });
        self.fill_node(nodes, idx, ids, rng);
        idx
    }

    /// Recompute node `idx` from `ids`, splitting it when it holds enough points.
    fn fill_node(&self, nodes: &mut Vec<KMeansNode>, idx: usize, ids: Vec<usize>, rng: &mut StdRng) {
        let pivot = self.mean(&ids);
        let distances: Vec<f32> = ids
            .iter()
            .map(|&id| self.metric.distance(&pivot, self.store.row(id)))
            .collect();
        let radius = distances.iter().copied().fold(0.0f32, f32::max);
        let variance = distances.iter().sum::<f32>() / ids.len().max(1) as f32;

        let node = &mut nodes[idx];
        node.pivot = pivot;
        node.radius = radius;
        node.variance = variance;
        node.size = ids.len();
        node.children.clear();
        node.points.clear();

        if ids.len() < self.config.branching {
            nodes[idx].points = ids;
            return;
        }

        let clusters = self.cluster(&ids, rng);
        if clusters.len() < 2 {
            nodes[idx].points = ids;
            return;
        }

        let children: Vec<usize> = clusters
            .into_iter()
            .map(|cluster| self.make_node(nodes, cluster, rng))
            .collect();
        nodes[idx].children = children;
    }

    fn mean(&self, ids: &[usize]) -> Vec<f32> {
        let mut mean = vec![0.0f32; self.store.veclen()];
        for &id in ids {
            for (m, x) in mean.iter_mut().zip(self.store.row(id)) {
                *m += x.to_f32();
            }
        }
        let n = ids.len().max(1) as f32;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }

    fn nearest_center(&self, centers: &[Vec<f32>], id: usize) -> usize {
        let point = self.store.row(id);
        centers
            .iter()
            .map(|c| self.metric.distance(c, point))
            .enumerate()
            .fold((0, f32::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
            .0
    }

    fn initial_centers(&self, ids: &[usize], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
        let to_f32 = |id: usize| -> Vec<f32> {
            self.store.row(id).iter().map(|x| x.to_f32()).collect()
        };

        match self.config.centers_init {
            CentersInit::Random => rand::seq::index::sample(rng, ids.len(), k)
                .into_iter()
                .map(|i| to_f32(ids[i]))
                .collect(),
            CentersInit::KMeansPlusPlus => {
                let first = rand::seq::index::sample(rng, ids.len(), 1).index(0);
                let mut centers = vec![to_f32(ids[first])];
                // Seeding weights use squared L2 so that they stay non-negative for every metric.
                let mut closest: Vec<f32> = ids
                    .iter()
                    .map(|&id| squared_euclidean_distance(&centers[0], self.store.row(id)))
                    .collect();

                while centers.len() < k {
                    let chooser = match WeightedIndex::<f32>::new(&closest) {
                        Ok(chooser) => chooser,
                        // Every remaining point coincides with a center.
                        Err(_) => break,
                    };
                    let next = to_f32(ids[chooser.sample(rng)]);
                    for (d, &id) in closest.iter_mut().zip(ids) {
                        *d = d.min(squared_euclidean_distance(&next, self.store.row(id)));
                    }
                    centers.push(next);
                }
                centers
            }
        }
    }

    /// Partition `ids` into at most `branching` non-empty clusters.
    fn cluster(&self, ids: &[usize], rng: &mut StdRng) -> Vec<Vec<usize>> {
        let k = self.config.branching.min(ids.len());
        let mut centers = self.initial_centers(ids, k, rng);
        let mut assignment: Vec<usize> = ids
            .iter()
            .map(|&id| self.nearest_center(&centers, id))
            .collect();

        let max_iterations = usize::try_from(self.config.iterations).unwrap_or(usize::MAX);
        for _ in 0..max_iterations {
            let veclen = self.store.veclen();
            let mut sums = vec![vec![0.0f32; veclen]; centers.len()];
            let mut counts = vec![0usize; centers.len()];
            for (&id, &c) in ids.iter().zip(&assignment) {
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(self.store.row(id)) {
                    *s += x.to_f32();
                }
            }
            for ((center, sum), &count) in centers.iter_mut().zip(sums).zip(&counts) {
                if count > 0 {
                    *center = sum.into_iter().map(|s| s / count as f32).collect();
                }
            }

            let mut changed = false;
            for (&id, slot) in ids.iter().zip(assignment.iter_mut()) {
                let nearest = self.nearest_center(&centers, id);
                if nearest != *slot {
                    *slot = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut clusters = vec![Vec::new(); centers.len()];
        for (&id, &c) in ids.iter().zip(&assignment) {
            clusters[c].push(id);
        }
        clusters.retain(|c| !c.is_empty());
        clusters
    }

    /// Route a stored point to a leaf, widening node radii on the way down.
    fn insert_point(&mut self, id: usize) {
        let root = match self.root {
            Some(root) => root,
            None => {
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                let mut nodes = std::mem::take(&mut self.nodes);
                self.root = Some(self.make_node(&mut nodes, vec![id], &mut rng));
                self.nodes = nodes;
                return;
            }
        };

        let mut node = root;
        loop {
            let d = self.metric.distance(&self.nodes[node].pivot, self.store.row(id));
            let current = &mut self.nodes[node];
            current.radius = current.radius.max(d);
            current.size += 1;
            if current.is_leaf() {
                break;
            }
            node = self.closest_child(node, self.store.row(id));
        }

        self.nodes[node].points.push(id);
        if self.nodes[node].points.len() >= self.config.branching {
            let ids = std::mem::take(&mut self.nodes[node].points);
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(id as u64));
            let mut nodes = std::mem::take(&mut self.nodes);
            self.fill_node(&mut nodes, node, ids, &mut rng);
            self.nodes = nodes;
        }
    }

    fn closest_child<Q: Element>(&self, node: usize, point: &[Q]) -> usize {
        let children = &self.nodes[node].children;
        children
            .iter()
            .map(|&c| (c, self.metric.distance(&self.nodes[c].pivot, point)))
            .fold((children[0], f32::INFINITY), |best, (c, d)| if d < best.1 { (c, d) } else { best })
            .0
    }

    /// Whether the ball of `node` lies entirely beyond the current worst distance.
    fn prunable(&self, node: &KMeansNode, query: &[T], result: &dyn ResultSet, eps_error: f32) -> bool {
        let d = self.metric.distance(&node.pivot, query);
        match self.metric.ball_lower_bound(d, node.radius) {
            Some(bound) => bound * eps_error > result.worst_distance(),
            None => false,
        }
    }

    fn check_leaf(&self, node: &KMeansNode, query: &[T], result: &mut dyn ResultSet) -> usize {
        let mut checked = 0;
        for &id in &node.points {
            if self.store.is_live(id) {
                result.add(id, self.metric.distance(query, self.store.row(id)));
                checked += 1;
            }
        }
        checked
    }

    fn search_exact(&self, node: usize, query: &[T], result: &mut dyn ResultSet, eps_error: f32) {
        let current = &self.nodes[node];
        if self.prunable(current, query, result, eps_error) {
            return;
        }
        if current.is_leaf() {
            self.check_leaf(current, query, result);
            return;
        }

        let mut order: Vec<(f32, usize)> = current
            .children
            .iter()
            .map(|&c| (self.metric.distance(&self.nodes[c].pivot, query), c))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, child) in order {
            self.search_exact(child, query, result, eps_error);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn explore(
        &self,
        mut node: usize,
        query: &[T],
        result: &mut dyn ResultSet,
        branches: &mut MinHeap<Branch>,
        checked: &mut usize,
        max_checks: usize,
        eps_error: f32,
    ) {
        loop {
            let current = &self.nodes[node];
            if self.prunable(current, query, result, eps_error) {
                return;
            }
            if current.is_leaf() {
                if *checked >= max_checks && result.is_full() {
                    return;
                }
                *checked += self.check_leaf(current, query, result);
                return;
            }

            let distances: Vec<f32> = current
                .children
                .iter()
                .map(|&c| self.metric.distance(&self.nodes[c].pivot, query))
                .collect();
            let best = distances
                .iter()
                .enumerate()
                .fold((0, f32::INFINITY), |b, (i, &d)| if d < b.1 { (i, d) } else { b })
                .0;

            for (i, &child) in current.children.iter().enumerate() {
                if i != best {
                    branches.push(Branch {
                        distance: distances[i] - self.config.cb_index * self.nodes[child].variance,
                        tree: 0,
                        node: child,
                    });
                }
            }
            node = current.children[best];
        }
    }
}

impl<T: Element> KMeansIndex<T> {
    /// Check node, child and point references of a deserialized tree.
    fn validate_tree(&self) -> Result<()> {
        let corrupt = |what: &str| Err(NnError::CorruptIndex(format!("kmeans {} out of range", what)));
        let node_count = self.nodes.len();
        if self.root.map_or(false, |root| root >= node_count) {
            return corrupt("root");
        }
        for node in &self.nodes {
            if node.pivot.len() != self.store.veclen() {
                return corrupt("pivot length");
            }
            if node.children.iter().any(|&child| child >= node_count) {
                return corrupt("child");
            }
            if node.points.iter().any(|&id| id >= self.store.capacity()) {
                return corrupt("point id");
            }
        }
        Ok(())
    }
}

impl<T: Element> NnIndex<T> for KMeansIndex<T> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::KMeans
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn build(&mut self) -> Result<()> {
        self.build_tree();
        Ok(())
    }

    fn build_with(&mut self, points: Matrix<T>) -> Result<()> {
        self.store = PointStore::from_matrix(&points);
        self.build_tree();
        Ok(())
    }

    fn add_points(&mut self, points: ArrayView2<'_, T>) -> Result<()> {
        let ids = self.store.append(points)?;
        for id in ids {
            self.insert_point(id);
        }
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
        let root = match self.root {
            Some(root) => root,
            None => return,
        };
        let eps_error = 1.0 + params.eps;

        match params.checks {
            Checks::Unlimited => self.search_exact(root, query, result, eps_error),
            Checks::Limited(max_checks) => {
                let mut branches = MinHeap::new();
                let mut checked = 0;
                self.explore(root, query, result, &mut branches, &mut checked, max_checks, eps_error);
                while let Some(branch) = branches.pop() {
                    if checked >= max_checks && result.is_full() {
                        break;
                    }
                    self.explore(branch.node, query, result, &mut branches, &mut checked, max_checks, eps_error);
                }
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
            .nodes
            .iter()
            .map(|n| {
                std::mem::size_of::<KMeansNode>()
                    + n.pivot.capacity() * std::mem::size_of::<f32>()
                    + (n.children.capacity() + n.points.capacity()) * std::mem::size_of::<usize>()
            })
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
        loaded.validate_tree()?;
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn NnIndex<T>> {
        Box::new(self.clone())
    }
}
