//! HNSW graph: core data structures and algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! The graph only stores adjacency. Vectors live in the owning index's
//! [`PointStore`] and graph node ids are point ids.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::neighbor_queue::{sort_neighbors, MaxHeap, MinHeap, Neighbor};
use crate::params::{Algorithm, IndexParams};
use crate::point_store::PointStore;

/// Configuration parameters for the HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max number of connections per node (layers > 0).
    pub m: usize,
    /// Max connections at layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Minimum number of candidates during search.
    pub ef_search: usize,
    /// Level generation factor: 1 / ln(m).
    pub ml: f64,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for level generation.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 50)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_search,
            ml: 1.0 / (m as f64).ln(),
            max_layers: 16,
            seed: 42,
        }
    }

    pub fn from_params(params: &IndexParams) -> Result<Self> {
        let defaults = Self::default();
        let m: usize = params.get_or("m", defaults.m)?;
        if m < 2 {
            return Err(NnError::InvalidParameter("m must be at least 2".to_string()));
        }
        let ef_construction: usize = params.get_or("ef_construction", defaults.ef_construction)?;
        if ef_construction == 0 {
            return Err(NnError::InvalidParameter(
                "ef_construction must be at least 1".to_string(),
            ));
        }
        let max_layers: usize = params.get_or("max_layers", defaults.max_layers)?;
        if max_layers == 0 {
            return Err(NnError::InvalidParameter(
                "max_layers must be at least 1".to_string(),
            ));
        }

        let mut config = Self::new(m, ef_construction, params.get_or("ef_search", defaults.ef_search)?);
        config.max_layers = max_layers;
        config.seed = params.get_or("seed", defaults.seed)?;
        Ok(config)
    }

    pub fn to_params(&self) -> IndexParams {
        IndexParams::for_algorithm(Algorithm::Hnsw)
            .with("m", self.m)
            .with("ef_construction", self.ef_construction)
            .with("ef_search", self.ef_search)
            .with("max_layers", self.max_layers)
            .with("seed", self.seed)
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    /// Neighbors per layer. neighbors[l] is the list of neighbor IDs at layer l.
    neighbors: Vec<Vec<usize>>,
    /// The maximum layer this node was inserted into.
    level: usize,
}

fn unseeded_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

/// The HNSW graph structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    /// Nodes indexed by point ID. Slots are None for removed or never inserted points.
    nodes: Vec<Option<HnswNode>>,
    /// Entry point node ID (highest-level node).
    entry_point: Option<usize>,
    /// Current maximum level in the graph.
    max_level: usize,
    params: HnswParams,
    metric: DistanceMetric,
    /// RNG for level generation. Not persisted; see [`HnswGraph::reseed`].
    #[serde(skip, default = "unseeded_rng")]
    rng: StdRng,
    /// Count of linked nodes.
    count: usize,
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self {
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            params,
            metric,
            rng,
            count: 0,
        }
    }

    /// Restart level generation from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check that every node, neighbor and entry point reference fits a store of `capacity` rows.
    pub fn validate(&self, capacity: usize) -> Result<()> {
        let corrupt = |what: &str| Err(NnError::CorruptIndex(format!("hnsw {}", what)));
        if self.nodes.len() > capacity {
            return corrupt("graph has more nodes than stored points");
        }
        let linked = self.nodes.iter().flatten().count();
        if linked != self.count {
            return corrupt("node count does not match linked nodes");
        }
        match self.entry_point {
            Some(ep) if !self.contains(ep) => return corrupt("entry point is not linked"),
            None if linked > 0 => return corrupt("entry point is missing"),
            _ => {}
        }
        for node in self.nodes.iter().flatten() {
            if node.neighbors.len() != node.level + 1 {
                return corrupt("node layers do not match its level");
            }
            if node.neighbors.iter().flatten().any(|&id| id >= self.nodes.len()) {
                return corrupt("neighbor id out of range");
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: usize) -> bool {
        self.nodes.get(id).map_or(false, Option::is_some)
    }

    pub fn used_memory(&self) -> usize {
        let adjacency: usize = self
            .nodes
            .iter()
            .flatten()
            .map(|n| n.neighbors.iter().map(|l| l.capacity() * std::mem::size_of::<usize>()).sum::<usize>())
            .sum();
        self.nodes.capacity() * std::mem::size_of::<Option<HnswNode>>() + adjacency
    }

    /// Generate a random level for a new node.
    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let level = (-r.ln() * self.params.ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    #[inline]
    fn distance<T: Element>(&self, store: &PointStore<T>, query: &[T], node_id: usize) -> f32 {
        self.metric.distance(query, store.row(node_id))
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper.
    ///
    /// Returns up to `ef` closest nodes to `query` found from the entry points `ep`.
    fn search_layer<T: Element>(
        &self,
        store: &PointStore<T>,
        query: &[T],
        ep: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<Neighbor> {
        let mut visited = HashSet::new();
        let mut candidates = MinHeap::new(); // closest candidate on top
        let mut results = MaxHeap::new(); // furthest result on top

        for &ep_id in ep {
            let dist = self.distance(store, query, ep_id);
            visited.insert(ep_id);
            candidates.push(Neighbor::new(ep_id, dist));
            results.push(Neighbor::new(ep_id, dist));
        }

        while let Some(c) = candidates.pop() {
            // Stop once the closest candidate cannot improve a full result list
            let furthest_dist = results.peek().map_or(f32::MAX, |n| n.distance);
            if c.distance > furthest_dist && results.len() >= ef {
                break;
            }

            let node = match &self.nodes[c.id] {
                Some(node) if layer < node.neighbors.len() => node,
                _ => continue,
            };

            for &neighbor_id in &node.neighbors[layer] {
                if !visited.insert(neighbor_id) || !self.contains(neighbor_id) {
                    continue;
                }

                let dist = self.distance(store, query, neighbor_id);
                let furthest_dist = results.peek().map_or(f32::MAX, |n| n.distance);

                if dist < furthest_dist || results.len() < ef {
                    candidates.push(Neighbor::new(neighbor_id, dist));
                    results.push_bounded(Neighbor::new(neighbor_id, dist), ef);
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Select the M closest neighbors from candidates (simple selection, Algorithm 3).
    fn select_neighbors_simple(candidates: &[Neighbor], m: usize) -> Vec<usize> {
        candidates.iter().take(m).map(|n| n.id).collect()
    }

    /// Prune a node's neighbor list at a given layer to at most `m` neighbors.
    fn prune_neighbors<T: Element>(&mut self, store: &PointStore<T>, node_id: usize, layer: usize, m: usize) {
        let neighbor_ids = match &self.nodes[node_id] {
            Some(node) if layer < node.neighbors.len() => node.neighbors[layer].clone(),
            _ => return,
        };

        let node_vec = store.row(node_id);
        let mut scored: Vec<Neighbor> = neighbor_ids
            .into_iter()
            .filter(|&nid| self.contains(nid))
            .map(|nid| Neighbor::new(nid, self.metric.distance(node_vec, store.row(nid))))
            .collect();
        sort_neighbors(&mut scored);
        scored.truncate(m);

        if let Some(node) = &mut self.nodes[node_id] {
            node.neighbors[layer] = scored.into_iter().map(|n| n.id).collect();
        }
    }

    /// INSERT: Algorithm 1 from the HNSW paper.
    ///
    /// `id` must name a row of `store`; its vector is read from there.
    pub fn insert<T: Element>(&mut self, store: &PointStore<T>, id: usize) -> Result<()> {
        if id >= store.capacity() {
            return Err(NnError::NotFound { id });
        }
        if self.contains(id) {
            return Err(NnError::InvalidState(format!("point {} is already linked", id)));
        }

        let level = self.random_level();
        if id >= self.nodes.len() {
            self.nodes.resize_with(id + 1, || None);
        }
        self.nodes[id] = Some(HnswNode {
            neighbors: vec![Vec::new(); level + 1],
            level,
        });
        self.count += 1;

        // If this is the first node, set it as entry point
        let entry_point = match self.entry_point {
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                return Ok(());
            }
            Some(ep) => ep,
        };

        let vector = store.row(id);
        let mut ep_id = entry_point;
        let current_max_level = self.max_level;

        // Phase 1: Greedy descent from top layer down to level+1 (ef=1)
        if current_max_level > level {
            for l in (level + 1..=current_max_level).rev() {
                if let Some(n) = self.search_layer(store, vector, &[ep_id], 1, l).first() {
                    ep_id = n.id;
                }
            }
        }

        // Phase 2: Insert at layers min(level, current_max_level) down to 0
        let insert_from = level.min(current_max_level);
        for l in (0..=insert_from).rev() {
            let m = if l == 0 { self.params.m_max0 } else { self.params.m };

            let nearest = self.search_layer(store, vector, &[ep_id], self.params.ef_construction, l);
            let neighbors = Self::select_neighbors_simple(&nearest, m);

            if let Some(node) = &mut self.nodes[id] {
                node.neighbors[l] = neighbors.clone();
            }

            // Add bidirectional connections
            for &neighbor_id in &neighbors {
                let needs_pruning = match &mut self.nodes[neighbor_id] {
                    Some(neighbor_node) if l < neighbor_node.neighbors.len() => {
                        neighbor_node.neighbors[l].push(id);
                        neighbor_node.neighbors[l].len() > m
                    }
                    _ => false,
                };

                // Pruned in a separate step to avoid borrow conflicts
                if needs_pruning {
                    self.prune_neighbors(store, neighbor_id, l, m);
                }
            }

            if let Some(n) = nearest.first() {
                ep_id = n.id;
            }
        }

        // Update entry point if new node has a higher level
        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }

        Ok(())
    }

    /// Unlink a node from every neighbor list. Unknown ids are ignored.
    pub fn remove(&mut self, id: usize) {
        if self.nodes.get_mut(id).and_then(Option::take).is_none() {
            return;
        }

        // Pruning makes links one-directional, so every list is checked.
        for other in self.nodes.iter_mut().flatten() {
            for list in &mut other.neighbors {
                list.retain(|&n| n != id);
            }
        }
        self.count -= 1;

        if self.entry_point == Some(id) {
            self.entry_point = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (i, n.level)))
                .max_by_key(|&(_, level)| level)
                .map(|(i, _)| i);

            self.max_level = self
                .entry_point
                .and_then(|ep| self.nodes[ep].as_ref().map(|n| n.level))
                .unwrap_or(0);
        }
    }

    /// Up to `ef` nearest linked nodes to `query`, ascending by distance.
    pub fn search<T: Element>(&self, store: &PointStore<T>, query: &[T], ef: usize) -> Vec<Neighbor> {
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => return Vec::new(),
        };

        let mut ep_id = entry_point;

        // Phase 1: Greedy descent from top layer to layer 1 (ef=1)
        for l in (1..=self.max_level).rev() {
            if let Some(n) = self.search_layer(store, query, &[ep_id], 1, l).first() {
                ep_id = n.id;
            }
        }

        // Phase 2: Search layer 0 with ef candidates
        self.search_layer(store, query, &[ep_id], ef.max(1), 0)
    }

    /// SEARCH: Algorithm 5 from the HNSW paper.
    pub fn search_knn<T: Element>(
        &self,
        store: &PointStore<T>,
        query: &[T],
        k: usize,
        ef: usize,
    ) -> Vec<Neighbor> {
        let mut results = self.search(store, query, ef.max(k));
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn make_params() -> HnswParams {
        HnswParams::new(4, 32, 16)
    }

    fn linked(data: Array2<f32>) -> (PointStore<f32>, HnswGraph) {
        let store = PointStore::from_matrix(&data);
        let mut graph = HnswGraph::new(DistanceMetric::Euclidean, make_params());
        for id in 0..store.capacity() {
            graph.insert(&store, id).unwrap();
        }
        (store, graph)
    }

    #[test]
    fn test_insert_single() {
        let (_, graph) = linked(array![[1.0, 0.0, 0.0]]);
        assert_eq!(graph.len(), 1);
        assert!(graph.entry_point.is_some());
    }

    #[test]
    fn test_insert_twice_rejected() {
        let (store, mut graph) = linked(array![[1.0, 0.0]]);
        assert!(matches!(graph.insert(&store, 0), Err(NnError::InvalidState(_))));
        assert!(matches!(graph.insert(&store, 5), Err(NnError::NotFound { id: 5 })));
    }

    #[test]
    fn test_self_search() {
        let data = Array2::from_shape_fn((100, 3), |(i, j)| (i * [1, 7, 13][j]) as f32 * 0.1);
        let (store, graph) = linked(data);

        // The top result for each inserted vector should be itself
        for i in 0..100 {
            let results = graph.search_knn(&store, store.row(i), 1, 16);
            assert!(!results.is_empty(), "No results for vector {}", i);
            assert!(
                results[0].distance < 1e-5,
                "Self-search for {} returned distance {} (id={})",
                i,
                results[0].distance,
                results[0].id
            );
        }
    }

    #[test]
    fn test_search_knn() {
        let (store, graph) = linked(array![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]]);

        let results = graph.search_knn(&store, &[0.5, 0.0], 2, 16);
        assert_eq!(results.len(), 2);
        // id=0 and id=1 are both at distance 0.5
        let ids: HashSet<usize> = results.iter().map(|n| n.id).collect();
        assert!(ids.contains(&0));
        assert!(ids.contains(&1));
    }

    #[test]
    fn test_remove() {
        let (store, mut graph) = linked(array![[1.0, 0.0], [0.0, 1.0]]);
        graph.remove(0);
        assert_eq!(graph.len(), 1);
        assert!(!graph.contains(0));

        let results = graph.search_knn(&store, &[1.0, 0.0], 2, 16);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn test_remove_entry_point() {
        let (store, mut graph) = linked(array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);

        let ep = graph.entry_point.unwrap();
        graph.remove(ep);
        assert_eq!(graph.len(), 2);
        assert!(graph.nodes.iter().flatten().all(|n| n.neighbors.iter().all(|l| !l.contains(&ep))));

        let results = graph.search_knn(&store, &[0.0, 1.0], 1, 16);
        assert!(!results.is_empty());
        assert_ne!(results[0].id, ep);
    }

    #[test]
    fn test_seeded_levels_are_deterministic() {
        let data = Array2::from_shape_fn((50, 2), |(i, j)| (i + j) as f32);
        let (_, a) = linked(data.clone());
        let (_, b) = linked(data);
        let levels = |g: &HnswGraph| g.nodes.iter().flatten().map(|n| n.level).collect::<Vec<_>>();
        assert_eq!(levels(&a), levels(&b));
    }

    #[test]
    fn test_params_roundtrip() {
        let params = HnswParams::from_params(&IndexParams::hnsw(8, 64).with("seed", 3u64)).unwrap();
        assert_eq!(params.m_max0, 16);
        assert_eq!(params.seed, 3);
        assert_eq!(HnswParams::from_params(&params.to_params()).unwrap(), params);
        assert!(HnswParams::from_params(&IndexParams::hnsw(1, 64)).is_err());
    }
}
