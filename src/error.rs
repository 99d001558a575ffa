//! Error types for nearest-neighbor indexing

use std::path::PathBuf;

use thiserror::Error;

use crate::distance::DistanceMetric;
use crate::element::ElementType;
use crate::params::Algorithm;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, NnError>;

/// Error types that can occur while building, querying or persisting an index
#[derive(Error, Debug)]
pub enum NnError {
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index file not found: {}", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("Element type mismatch: requested {expected}, saved index holds {found}")]
    TypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    #[error("Distance metric mismatch: requested {expected:?}, saved index uses {found:?}")]
    MetricMismatch {
        expected: DistanceMetric,
        found: DistanceMetric,
    },

    #[error("Point not found: {id}")]
    NotFound { id: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
}
