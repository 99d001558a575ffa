//! Built-in nearest-neighbor backends.

pub mod hnsw;
pub mod kdtree;
pub mod kmeans;
pub mod linear;

pub use hnsw::{HnswIndex, HnswParams};
pub use kdtree::{KdTreeIndex, KdTreeParams};
pub use kmeans::{CentersInit, KMeansIndex, KMeansParams};
pub use linear::LinearIndex;
