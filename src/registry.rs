//! Backend factory: maps algorithm tags to constructor closures.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::algorithms::{HnswIndex, KMeansIndex, KdTreeIndex, LinearIndex};
use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix::Matrix;
use crate::params::{Algorithm, IndexParams};

/// Builds an unbuilt backend over a dataset from its configuration.
pub type BackendConstructor<T> = Arc<
    dyn Fn(Matrix<T>, &IndexParams, DistanceMetric) -> Result<Box<dyn NnIndex<T>>> + Send + Sync,
>;

/// Tag-indexed set of backend constructors.
///
/// `BackendRegistry::default()` knows every built-in algorithm. Callers add their
/// own variants under [`Algorithm::Custom`] tags.
pub struct BackendRegistry<T: Element> {
    constructors: BTreeMap<Algorithm, BackendConstructor<T>>,
}

impl<T: Element> BackendRegistry<T> {
    /// A registry with no backends at all.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A registry with the linear, kd-tree, k-means and HNSW backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(Algorithm::Linear, |dataset, params, metric| {
            Ok(Box::new(LinearIndex::from_params(dataset, params, metric)) as Box<dyn NnIndex<T>>)
        });
        registry.insert(Algorithm::KdTree, |dataset, params, metric| {
            Ok(Box::new(KdTreeIndex::from_params(dataset, params, metric)?) as Box<dyn NnIndex<T>>)
        });
        registry.insert(Algorithm::KMeans, |dataset, params, metric| {
            Ok(Box::new(KMeansIndex::from_params(dataset, params, metric)?) as Box<dyn NnIndex<T>>)
        });
        registry.insert(Algorithm::Hnsw, |dataset, params, metric| {
            Ok(Box::new(HnswIndex::from_params(dataset, params, metric)?) as Box<dyn NnIndex<T>>)
        });
        registry
    }

    fn insert<F>(&mut self, algorithm: Algorithm, constructor: F)
    where
        F: Fn(Matrix<T>, &IndexParams, DistanceMetric) -> Result<Box<dyn NnIndex<T>>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(algorithm, Arc::new(constructor));
    }

    /// Add or replace the constructor for `algorithm`.
    pub fn register<F>(&mut self, algorithm: Algorithm, constructor: F) -> Result<()>
    where
        F: Fn(Matrix<T>, &IndexParams, DistanceMetric) -> Result<Box<dyn NnIndex<T>>>
            + Send
            + Sync
            + 'static,
    {
        if algorithm == Algorithm::Saved {
            return Err(NnError::InvalidParameter(
                "the saved pseudo-algorithm cannot be registered".to_string(),
            ));
        }
        // Saved headers only record the tag, so it must decode back to the same variant.
        let decoded = Algorithm::from_tag(algorithm.tag());
        if decoded != algorithm {
            return Err(NnError::InvalidParameter(format!(
                "custom tag {} is reserved for {}",
                algorithm.tag(),
                decoded
            )));
        }
        self.insert(algorithm, constructor);
        Ok(())
    }

    /// Construct the backend registered for `algorithm`.
    pub fn create(
        &self,
        algorithm: Algorithm,
        dataset: Matrix<T>,
        params: &IndexParams,
        metric: DistanceMetric,
    ) -> Result<Box<dyn NnIndex<T>>> {
        let constructor = self
            .constructors
            .get(&algorithm)
            .ok_or(NnError::UnsupportedAlgorithm(algorithm))?;
        constructor(dataset, params, metric)
    }

    pub fn supports(&self, algorithm: Algorithm) -> bool {
        self.constructors.contains_key(&algorithm)
    }

    /// Registered algorithms in tag order.
    pub fn algorithms(&self) -> Vec<Algorithm> {
        let mut algorithms: Vec<Algorithm> = self.constructors.keys().copied().collect();
        algorithms.sort_by_key(|a| a.tag());
        algorithms
    }
}

impl<T: Element> Default for BackendRegistry<T> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<T: Element> Clone for BackendRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            constructors: self.constructors.clone(),
        }
    }
}

impl<T: Element> fmt::Debug for BackendRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("algorithms", &self.algorithms())
            .finish()
    }
}

/// Construct a built-in backend.
pub fn create_backend<T: Element>(
    algorithm: Algorithm,
    dataset: Matrix<T>,
    params: &IndexParams,
    metric: DistanceMetric,
) -> Result<Box<dyn NnIndex<T>>> {
    BackendRegistry::with_defaults().create(algorithm, dataset, params, metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_algorithms() {
        let registry = BackendRegistry::<f32>::default();
        assert_eq!(
            registry.algorithms(),
            vec![Algorithm::Linear, Algorithm::KdTree, Algorithm::KMeans, Algorithm::Hnsw]
        );
        assert!(!registry.supports(Algorithm::Saved));
    }

    #[test]
    fn test_create_dispatches_on_tag() {
        for algorithm in [Algorithm::Linear, Algorithm::KdTree, Algorithm::KMeans, Algorithm::Hnsw] {
            let backend = create_backend(
                algorithm,
                array![[1.0f32, 2.0], [3.0, 4.0]],
                &IndexParams::for_algorithm(algorithm),
                DistanceMetric::Euclidean,
            )
            .unwrap();
            assert_eq!(backend.algorithm(), algorithm);
            assert_eq!(backend.size(), 2);
        }
    }

    #[test]
    fn test_unknown_and_saved_unsupported() {
        for algorithm in [Algorithm::Custom(99), Algorithm::Saved] {
            let result = create_backend::<f32>(
                algorithm,
                crate::matrix::empty(),
                &IndexParams::new(),
                DistanceMetric::Euclidean,
            );
            assert!(matches!(result, Err(NnError::UnsupportedAlgorithm(a)) if a == algorithm));
        }
    }

    #[test]
    fn test_register_custom() {
        let mut registry = BackendRegistry::<u8>::new();
        registry
            .register(Algorithm::Custom(300), |dataset, params, metric| {
                Ok(Box::new(LinearIndex::from_params(dataset, params, metric)) as Box<dyn NnIndex<u8>>)
            })
            .unwrap();
        assert!(registry.supports(Algorithm::Custom(300)));
        assert!(!registry.supports(Algorithm::Linear));

        let backend = registry
            .create(
                Algorithm::Custom(300),
                array![[1u8, 2]],
                &IndexParams::new(),
                DistanceMetric::Manhattan,
            )
            .unwrap();
        assert_eq!(backend.veclen(), 2);
    }

    #[test]
    fn test_register_reserved_custom_tag_rejected() {
        let mut registry = BackendRegistry::<f32>::new();
        for tag in [0, 1, 2, 7, 254] {
            let result = registry.register(Algorithm::Custom(tag), |dataset, params, metric| {
                Ok(Box::new(LinearIndex::from_params(dataset, params, metric)) as Box<dyn NnIndex<f32>>)
            });
            assert!(matches!(result, Err(NnError::InvalidParameter(_))));
        }
        assert!(registry.algorithms().is_empty());
    }

    #[test]
    fn test_register_saved_rejected() {
        let mut registry = BackendRegistry::<f32>::new();
        let result = registry.register(Algorithm::Saved, |dataset, params, metric| {
            Ok(Box::new(LinearIndex::from_params(dataset, params, metric)) as Box<dyn NnIndex<f32>>)
        });
        assert!(matches!(result, Err(NnError::InvalidParameter(_))));
    }
}
