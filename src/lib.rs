//! # nnsearch
//!
//! Nearest-neighbor search over dense numeric vectors with interchangeable
//! algorithms and a self-describing on-disk format.
//!
//! This library provides:
//! - Linear, randomized kd-tree, hierarchical k-means and HNSW backends
//! - Distance metrics (Euclidean, squared Euclidean, Manhattan, Cosine, Dot Product)
//! - k-NN and radius search with dense or ragged outputs
//! - Incremental insertion with amortized rebuilds, and point removal
//! - Saving and loading indexes that record their element type and algorithm
//!
//! ## Example
//!
//! ```rust
//! use ndarray::array;
//! use nnsearch::{DistanceMetric, IndexParams, SearchParams, VectorIndex};
//!
//! let data = array![[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]];
//! let index = VectorIndex::with_dataset(data, IndexParams::kdtree(2), DistanceMetric::Euclidean)?;
//! index.build()?;
//!
//! let mut ids: Vec<Vec<usize>> = Vec::new();
//! let mut dists = Vec::new();
//! index.knn_search_vec(array![[0.9f32, 0.1]].view(), &mut ids, &mut dists, 2, &SearchParams::exact())?;
//! assert_eq!(ids[0][0], 1);
//! # Ok::<(), nnsearch::NnError>(())
//! ```

pub mod algorithms;
pub mod distance;
pub mod element;
pub mod error;
pub mod index;
pub mod logging;
pub mod matrix;
pub mod neighbor_queue;
pub mod params;
pub mod persistence;
pub mod point_store;
pub mod registry;
pub mod result_set;
pub mod search;
pub mod vector_index;

pub use distance::DistanceMetric;
pub use element::{Element, ElementType};
pub use error::{NnError, Result};
pub use index::NnIndex;
pub use logging::{log_verbosity, verbosity};
pub use matrix::Matrix;
pub use neighbor_queue::Neighbor;
pub use params::{Algorithm, Checks, IndexParams, ParamValue, SearchParams};
pub use persistence::IndexHeader;
pub use registry::{create_backend, BackendRegistry};
pub use search::{NeighborId, DISTANCE_SENTINEL};
pub use vector_index::{VectorIndex, DEFAULT_REBUILD_THRESHOLD};
