//! Index configuration: algorithm tags, typed parameter dictionaries and search options.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

/// Key holding the algorithm selector.
pub const ALGORITHM_KEY: &str = "algorithm";
/// Key holding the saved index path when the algorithm is [`Algorithm::Saved`].
pub const FILENAME_KEY: &str = "filename";

/// Indexing algorithm selector.
///
/// Tags `0..=255` are reserved for built-in variants; [`Algorithm::Custom`] carries
/// the tag of a backend registered by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    Linear,
    KdTree,
    KMeans,
    Hnsw,
    /// Pseudo-algorithm: load a previously saved index from `filename`.
    Saved,
    Custom(u32),
}

impl Algorithm {
    /// The persisted tag value.
    pub fn tag(self) -> u32 {
        match self {
            Algorithm::Linear => 0,
            Algorithm::KdTree => 1,
            Algorithm::KMeans => 2,
            Algorithm::Hnsw => 7,
            Algorithm::Saved => 254,
            Algorithm::Custom(tag) => tag,
        }
    }

    /// Decode a persisted tag. Unknown values become [`Algorithm::Custom`].
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Algorithm::Linear,
            1 => Algorithm::KdTree,
            2 => Algorithm::KMeans,
            7 => Algorithm::Hnsw,
            254 => Algorithm::Saved,
            other => Algorithm::Custom(other),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Linear => f.write_str("linear"),
            Algorithm::KdTree => f.write_str("kdtree"),
            Algorithm::KMeans => f.write_str("kmeans"),
            Algorithm::Hnsw => f.write_str("hnsw"),
            Algorithm::Saved => f.write_str("saved"),
            Algorithm::Custom(tag) => write!(f, "custom({})", tag),
        }
    }
}

impl FromStr for Algorithm {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" | "flat" => Ok(Algorithm::Linear),
            "kdtree" => Ok(Algorithm::KdTree),
            "kmeans" => Ok(Algorithm::KMeans),
            "hnsw" => Ok(Algorithm::Hnsw),
            "saved" => Ok(Algorithm::Saved),
            other => Err(NnError::InvalidParameter(format!("unknown algorithm: {}", other))),
        }
    }
}

/// A single typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    /// Unsigned values above `i64::MAX`.
    UInt(u64),
    Float(f64),
    Str(String),
    Algorithm(Algorithm),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::from(v as u64)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => ParamValue::Int(v),
            Err(_) => ParamValue::UInt(v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v as f64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Algorithm> for ParamValue {
    fn from(v: Algorithm) -> Self {
        ParamValue::Algorithm(v)
    }
}

/// Conversion out of a [`ParamValue`] for typed lookups.
pub trait FromParamValue: Sized {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self>;
}

fn wrong_type(key: &str, expected: &str, value: &ParamValue) -> NnError {
    NnError::InvalidParameter(format!("{} must be {}, got {:?}", key, expected, value))
}

impl FromParamValue for bool {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(wrong_type(key, "a bool", other)),
        }
    }
}

impl FromParamValue for i64 {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Int(v) => Ok(*v),
            ParamValue::UInt(v) => Err(NnError::InvalidParameter(format!(
                "{} is out of range: {}",
                key, v
            ))),
            other => Err(wrong_type(key, "an integer", other)),
        }
    }
}

impl FromParamValue for usize {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Int(_) | ParamValue::UInt(_) => {
                let v = u64::from_param(key, value)?;
                usize::try_from(v)
                    .map_err(|_| NnError::InvalidParameter(format!("{} is out of range: {}", key, v)))
            }
            other => Err(wrong_type(key, "an integer", other)),
        }
    }
}

impl FromParamValue for u64 {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Int(v) => u64::try_from(*v)
                .map_err(|_| NnError::InvalidParameter(format!("{} must be non-negative", key))),
            ParamValue::UInt(v) => Ok(*v),
            other => Err(wrong_type(key, "an integer", other)),
        }
    }
}

impl FromParamValue for f64 {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            ParamValue::UInt(v) => Ok(*v as f64),
            other => Err(wrong_type(key, "a number", other)),
        }
    }
}

impl FromParamValue for f32 {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        f64::from_param(key, value).map(|v| v as f32)
    }
}

impl FromParamValue for String {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Str(v) => Ok(v.clone()),
            other => Err(wrong_type(key, "a string", other)),
        }
    }
}

impl FromParamValue for Algorithm {
    fn from_param(key: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Algorithm(v) => Ok(*v),
            ParamValue::Str(s) => s.parse(),
            ParamValue::Int(tag) => u32::try_from(*tag)
                .map(Algorithm::from_tag)
                .map_err(|_| wrong_type(key, "an algorithm tag", value)),
            other => Err(wrong_type(key, "an algorithm", other)),
        }
    }
}

/// Key-value configuration dictionary captured by an index at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    values: BTreeMap<String, ParamValue>,
}

impl IndexParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters selecting `algorithm` with every hyperparameter left at its default.
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        Self::new().with(ALGORITHM_KEY, algorithm)
    }

    pub fn linear() -> Self {
        Self::for_algorithm(Algorithm::Linear)
    }

    pub fn kdtree(trees: usize) -> Self {
        Self::for_algorithm(Algorithm::KdTree).with("trees", trees)
    }

    pub fn kmeans(branching: usize, iterations: i64) -> Self {
        Self::for_algorithm(Algorithm::KMeans)
            .with("branching", branching)
            .with("iterations", iterations)
    }

    pub fn hnsw(m: usize, ef_construction: usize) -> Self {
        Self::for_algorithm(Algorithm::Hnsw)
            .with("m", m)
            .with("ef_construction", ef_construction)
    }

    /// Parameters that load a previously saved index from `path`.
    pub fn saved(path: impl AsRef<Path>) -> Self {
        Self::for_algorithm(Algorithm::Saved)
            .with(FILENAME_KEY, path.as_ref().to_string_lossy().into_owned())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get_value(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Typed lookup that fails when the key is absent.
    pub fn get<T: FromParamValue>(&self, key: &str) -> Result<T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| NnError::MissingParameter(key.to_string()))?;
        T::from_param(key, value)
    }

    /// Typed lookup with a default for absent keys. Present keys of the wrong type still fail.
    pub fn get_or<T: FromParamValue>(&self, key: &str, default: T) -> Result<T> {
        match self.values.get(key) {
            Some(value) => T::from_param(key, value),
            None => Ok(default),
        }
    }

    /// The algorithm selector.
    pub fn algorithm(&self) -> Result<Algorithm> {
        self.get(ALGORITHM_KEY)
    }

    /// Path of the saved index for [`Algorithm::Saved`].
    pub fn filename(&self) -> Result<PathBuf> {
        self.get::<String>(FILENAME_KEY).map(PathBuf::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a flat JSON object, e.g. `{"algorithm": "kdtree", "trees": 8}`.
    ///
    /// The `algorithm` key accepts a name or a numeric tag.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| NnError::Serialization(e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            NnError::InvalidParameter("index parameters must be a JSON object".to_string())
        })?;

        let mut params = IndexParams::new();
        for (key, value) in object {
            let param = match value {
                serde_json::Value::Bool(b) => ParamValue::Bool(*b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => ParamValue::Int(i),
                    None => match n.as_u64() {
                        Some(u) => ParamValue::UInt(u),
                        None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                    },
                },
                serde_json::Value::String(s) => ParamValue::Str(s.clone()),
                other => {
                    return Err(NnError::InvalidParameter(format!(
                        "unsupported value for {}: {}",
                        key, other
                    )))
                }
            };
            params.set(key.clone(), param);
        }

        if let Some(value) = params.get_value(ALGORITHM_KEY) {
            let algorithm = Algorithm::from_param(ALGORITHM_KEY, value)?;
            params.set(ALGORITHM_KEY, algorithm);
        }
        Ok(params)
    }

    /// Render as a flat JSON object.
    pub fn to_json_string(&self) -> Result<String> {
        let mut object = serde_json::Map::new();
        for (key, value) in &self.values {
            let json = match value {
                ParamValue::Bool(b) => serde_json::Value::from(*b),
                ParamValue::Int(i) => serde_json::Value::from(*i),
                ParamValue::UInt(u) => serde_json::Value::from(*u),
                ParamValue::Float(f) => serde_json::Value::from(*f),
                ParamValue::Str(s) => serde_json::Value::from(s.clone()),
                ParamValue::Algorithm(a) => serde_json::Value::from(a.to_string()),
            };
            object.insert(key.clone(), json);
        }
        serde_json::to_string_pretty(&object).map_err(|e| NnError::Serialization(e.to_string()))
    }
}

/// How much work an approximate backend may do per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checks {
    /// Examine as much of the index as needed for an exact answer.
    Unlimited,
    /// Stop after examining this many candidate points.
    Limited(usize),
}

/// Options for a single search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub checks: Checks,
    /// Approximation slack for tree pruning: branches are skipped when
    /// `bound * (1 + eps)` exceeds the current worst distance.
    pub eps: f32,
    /// Per-query capacity for dense radius search output.
    pub max_neighbors: Option<usize>,
    /// 1 = sequential, 0 = global rayon pool, n = dedicated pool of n threads.
    pub cores: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            checks: Checks::Limited(32),
            eps: 0.0,
            max_neighbors: None,
            cores: 1,
        }
    }
}

impl SearchParams {
    /// Options requesting exact results from every backend that can provide them.
    pub fn exact() -> Self {
        Self {
            checks: Checks::Unlimited,
            ..Default::default()
        }
    }

    pub fn with_checks(mut self, checks: usize) -> Self {
        self.checks = Checks::Limited(checks);
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_max_neighbors(mut self, max_neighbors: usize) -> Self {
        self.max_neighbors = Some(max_neighbors);
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }
}
