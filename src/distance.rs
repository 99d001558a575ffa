//! Distance metrics for vector similarity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::NnError;

/// Distance metrics for measuring vector similarity.
///
/// Every metric yields a value where smaller means closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    Euclidean,
    /// Squared Euclidean distance; radii are given in squared units
    SquaredEuclidean,
    /// Manhattan (L1) distance
    Manhattan,
    /// Cosine similarity (converted to distance: 1 - similarity)
    Cosine,
    /// Dot product (negated for minimum distance)
    DotProduct,
}

impl DistanceMetric {
    /// Compute the distance between two vectors using this metric.
    ///
    /// Both slices must have the same length; callers validate dimensions up front.
    #[inline]
    pub fn distance<A: Element, B: Element>(&self, v1: &[A], v2: &[B]) -> f32 {
        debug_assert_eq!(v1.len(), v2.len());
        match self {
            DistanceMetric::Euclidean => euclidean_distance(v1, v2),
            DistanceMetric::SquaredEuclidean => squared_euclidean_distance(v1, v2),
            DistanceMetric::Manhattan => manhattan_distance(v1, v2),
            DistanceMetric::Cosine => cosine_distance(v1, v2),
            DistanceMetric::DotProduct => -dot_product(v1, v2),
        }
    }

    /// Whether distances decompose per axis, which tree pruning relies on.
    pub fn supports_axis_bounds(&self) -> bool {
        matches!(
            self,
            DistanceMetric::Euclidean | DistanceMetric::SquaredEuclidean | DistanceMetric::Manhattan
        )
    }

    /// Contribution of a single-axis difference to the accumulated bound.
    #[inline]
    pub(crate) fn axis_term(&self, diff: f32) -> f32 {
        match self {
            DistanceMetric::Manhattan => diff.abs(),
            _ => diff * diff,
        }
    }

    /// Convert an accumulated sum of axis terms into this metric's units.
    #[inline]
    pub(crate) fn bound_from_terms(&self, sum: f32) -> f32 {
        match self {
            DistanceMetric::Euclidean => sum.sqrt(),
            _ => sum,
        }
    }

    /// Lower bound on the distance from a query to any member of a ball.
    ///
    /// `center_distance` and `radius` are in this metric's units. Returns `None`
    /// when the metric does not satisfy the triangle inequality.
    pub(crate) fn ball_lower_bound(&self, center_distance: f32, radius: f32) -> Option<f32> {
        match self {
            DistanceMetric::Euclidean | DistanceMetric::Manhattan => {
                Some((center_distance - radius).max(0.0))
            }
            DistanceMetric::SquaredEuclidean => {
                let gap = (center_distance.sqrt() - radius.sqrt()).max(0.0);
                Some(gap * gap)
            }
            DistanceMetric::Cosine | DistanceMetric::DotProduct => None,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::DotProduct => "dot_product",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceMetric {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "squared_euclidean" | "l2_squared" => Ok(DistanceMetric::SquaredEuclidean),
            "manhattan" | "l1" => Ok(DistanceMetric::Manhattan),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot_product" | "dot" => Ok(DistanceMetric::DotProduct),
            other => Err(NnError::InvalidParameter(format!(
                "unknown distance metric: {}",
                other
            ))),
        }
    }
}

/// Compute squared Euclidean distance between two vectors
pub fn squared_euclidean_distance<A: Element, B: Element>(v1: &[A], v2: &[B]) -> f32 {
    v1.iter()
        .zip(v2.iter())
        .map(|(a, b)| (a.to_f32() - b.to_f32()).powi(2))
        .sum()
}

/// Compute Euclidean (L2) distance between two vectors
pub fn euclidean_distance<A: Element, B: Element>(v1: &[A], v2: &[B]) -> f32 {
    squared_euclidean_distance(v1, v2).sqrt()
}

/// Compute Manhattan (L1) distance between two vectors
pub fn manhattan_distance<A: Element, B: Element>(v1: &[A], v2: &[B]) -> f32 {
    v1.iter()
        .zip(v2.iter())
        .map(|(a, b)| (a.to_f32() - b.to_f32()).abs())
        .sum()
}

/// Compute cosine distance between two vectors (1 - cosine similarity).
///
/// A zero vector has no direction; it is treated as orthogonal to everything.
pub fn cosine_distance<A: Element, B: Element>(v1: &[A], v2: &[B]) -> f32 {
    let norm1 = norm(v1);
    let norm2 = norm(v2);

    if norm1 == 0.0 || norm2 == 0.0 {
        return 1.0;
    }

    let similarity = dot_product(v1, v2) / (norm1 * norm2);

    // Clamp to [-1, 1] to handle floating point errors
    1.0 - similarity.clamp(-1.0, 1.0)
}

/// Compute dot product of two vectors
pub fn dot_product<A: Element, B: Element>(v1: &[A], v2: &[B]) -> f32 {
    v1.iter()
        .zip(v2.iter())
        .map(|(a, b)| a.to_f32() * b.to_f32())
        .sum()
}

fn norm<A: Element>(v: &[A]) -> f32 {
    v.iter().map(|x| x.to_f32().powi(2)).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euclidean_distance() {
        let dist = euclidean_distance(&[1.0f32, 2.0, 3.0], &[4.0f32, 5.0, 6.0]);
        assert_relative_eq!(dist, 5.196152, epsilon = 1e-5);
    }

    #[test]
    fn test_euclidean_same_vector() {
        let v = [1.0f32, 2.0, 3.0];
        assert_relative_eq!(euclidean_distance(&v, &v), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_squared_and_manhattan() {
        let a = [1u8, 2, 3];
        let b = [4u8, 6, 3];
        assert_relative_eq!(squared_euclidean_distance(&a, &b), 25.0, epsilon = 1e-6);
        assert_relative_eq!(manhattan_distance(&a, &b), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dot_product() {
        let dot = dot_product(&[1.0f32, 2.0, 3.0], &[4.0f32, 5.0, 6.0]);
        assert_relative_eq!(dot, 32.0, epsilon = 1e-6);
        let dist = DistanceMetric::DotProduct.distance(&[1.0f32, 2.0, 3.0], &[4.0f32, 5.0, 6.0]);
        assert_relative_eq!(dist, -32.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_distance() {
        assert_relative_eq!(cosine_distance(&[1.0f32, 0.0], &[1.0f32, 0.0]), 0.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(&[1.0f32, 0.0], &[0.0f32, 1.0]), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(&[1.0f32, 0.0], &[-1.0f32, 0.0]), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_relative_eq!(cosine_distance(&[0.0f32, 0.0], &[1.0f32, 0.0]), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_axis_bounds() {
        assert!(DistanceMetric::Euclidean.supports_axis_bounds());
        assert!(!DistanceMetric::Cosine.supports_axis_bounds());
        let metric = DistanceMetric::Euclidean;
        let bound = metric.bound_from_terms(metric.axis_term(3.0) + metric.axis_term(4.0));
        assert_relative_eq!(bound, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ball_lower_bound() {
        assert_eq!(DistanceMetric::Euclidean.ball_lower_bound(5.0, 2.0), Some(3.0));
        assert_eq!(DistanceMetric::Euclidean.ball_lower_bound(1.0, 2.0), Some(0.0));
        assert_eq!(DistanceMetric::SquaredEuclidean.ball_lower_bound(25.0, 4.0), Some(9.0));
        assert_eq!(DistanceMetric::Cosine.ball_lower_bound(0.5, 0.1), None);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert!(matches!(
            "hamming".parse::<DistanceMetric>(),
            Err(NnError::InvalidParameter(_))
        ));
    }
}
