//! Batch query execution and result packaging.
//!
//! Searches produce one ascending `Neighbor` list per query; this module turns those
//! lists into the dense (fixed-width matrix) or ragged (per-query vector) output shapes.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::element::Element;
use crate::error::{NnError, Result};
use crate::matrix::{check_veclen, row_slice};
use crate::neighbor_queue::Neighbor;
use crate::params::SearchParams;

/// Distance written into dense output slots that hold no neighbor.
pub const DISTANCE_SENTINEL: f32 = f32::INFINITY;

/// Integer type used to report neighbor ids.
///
/// Unsigned ids use `MAX` as the empty-slot sentinel, signed ids use `-1`.
pub trait NeighborId: Copy + Send + Sync + std::fmt::Debug + PartialEq + 'static {
    const SENTINEL: Self;

    /// Convert an internal id, failing if it does not fit.
    fn from_id(id: usize) -> Option<Self>;
}

macro_rules! impl_neighbor_id {
    ($($ty:ty => $sentinel:expr),* $(,)?) => {
        $(
            impl NeighborId for $ty {
                const SENTINEL: Self = $sentinel;

                #[inline]
                fn from_id(id: usize) -> Option<Self> {
                    <$ty>::try_from(id).ok().filter(|v| *v != Self::SENTINEL)
                }
            }
        )*
    };
}

impl_neighbor_id! {
    usize => usize::MAX,
    u32 => u32::MAX,
    u64 => u64::MAX,
    i32 => -1,
    i64 => -1,
}

fn convert_id<I: NeighborId>(id: usize) -> Result<I> {
    I::from_id(id).ok_or_else(|| {
        NnError::InvalidParameter(format!(
            "point id {} does not fit the requested id type",
            id
        ))
    })
}

/// Run `query_fn` for every row of `queries`, in parallel when `params.cores != 1`.
pub(crate) fn run_queries<T, F>(
    queries: ArrayView2<'_, T>,
    veclen: usize,
    params: &SearchParams,
    query_fn: F,
) -> Result<Vec<Vec<Neighbor>>>
where
    T: Element,
    F: Fn(&[T]) -> Vec<Neighbor> + Send + Sync,
{
    check_veclen(&queries, veclen)?;

    let run_one = |i: usize| {
        let row = row_slice(queries.row(i));
        query_fn(&row)
    };

    match params.cores {
        1 => Ok((0..queries.nrows()).map(run_one).collect()),
        0 => Ok((0..queries.nrows()).into_par_iter().map(run_one).collect()),
        cores => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cores)
                .build()
                .map_err(|e| NnError::InvalidParameter(format!("thread pool: {}", e)))?;
            Ok(pool.install(|| (0..queries.nrows()).into_par_iter().map(run_one).collect()))
        }
    }
}

fn check_dense_shape<A, B>(
    indices: &Array2<A>,
    dists: &Array2<B>,
    nqueries: usize,
    min_cols: usize,
) -> Result<()> {
    for (rows, cols) in [indices.dim(), dists.dim()] {
        if rows < nqueries || cols < min_cols {
            return Err(NnError::InvalidParameter(format!(
                "output matrix is {}x{}, need at least {}x{}",
                rows, cols, nqueries, min_cols
            )));
        }
    }
    Ok(())
}

/// Copy results into fixed-width rows, writing at most `width` entries per row and
/// filling the remaining slots in `0..width` with sentinels. Returns entries written.
pub(crate) fn fill_dense<I: NeighborId>(
    results: &[Vec<Neighbor>],
    indices: &mut Array2<I>,
    dists: &mut Array2<f32>,
    width: usize,
) -> Result<usize> {
    check_dense_shape(indices, dists, results.len(), width)?;

    // Convert every id before touching the outputs so a failure leaves them unchanged.
    let converted = results
        .iter()
        .map(|neighbors| {
            neighbors
                .iter()
                .take(width)
                .map(|n| convert_id::<I>(n.id))
                .collect::<Result<Vec<I>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut count = 0;
    for (row, (neighbors, ids)) in results.iter().zip(&converted).enumerate() {
        for col in 0..width {
            match (neighbors.get(col), ids.get(col)) {
                (Some(n), Some(&id)) => {
                    indices[[row, col]] = id;
                    dists[[row, col]] = n.distance;
                    count += 1;
                }
                _ => {
                    indices[[row, col]] = I::SENTINEL;
                    dists[[row, col]] = DISTANCE_SENTINEL;
                }
            }
        }
    }
    Ok(count)
}

/// Copy results into one vector per query, sized to the actual result count.
pub(crate) fn fill_ragged<I: NeighborId>(
    results: Vec<Vec<Neighbor>>,
    indices: &mut Vec<Vec<I>>,
    dists: &mut Vec<Vec<f32>>,
) -> Result<usize> {
    let mut new_indices = Vec::with_capacity(results.len());
    let mut new_dists = Vec::with_capacity(results.len());
    let mut count = 0;

    for neighbors in results {
        count += neighbors.len();
        new_indices.push(
            neighbors
                .iter()
                .map(|n| convert_id(n.id))
                .collect::<Result<Vec<I>>>()?,
        );
        new_dists.push(neighbors.iter().map(|n| n.distance).collect());
    }

    *indices = new_indices;
    *dists = new_dists;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_results() -> Vec<Vec<Neighbor>> {
        vec![
            vec![Neighbor::new(3, 0.1), Neighbor::new(1, 0.4)],
            vec![Neighbor::new(7, 0.2)],
        ]
    }

    #[test]
    fn test_fill_dense_sentinels() {
        let mut indices = Array2::<i32>::zeros((2, 2));
        let mut dists = Array2::<f32>::zeros((2, 2));
        let count = fill_dense(&sample_results(), &mut indices, &mut dists, 2).unwrap();

        assert_eq!(count, 3);
        assert_eq!(indices, array![[3, 1], [7, -1]]);
        assert_eq!(dists[[1, 1]], DISTANCE_SENTINEL);
    }

    #[test]
    fn test_fill_dense_unsigned_sentinel() {
        let mut indices = Array2::<usize>::zeros((2, 3));
        let mut dists = Array2::<f32>::zeros((2, 3));
        fill_dense(&sample_results(), &mut indices, &mut dists, 3).unwrap();
        assert_eq!(indices[[0, 2]], usize::MAX);
    }

    #[test]
    fn test_fill_dense_too_small() {
        let mut indices = Array2::<usize>::zeros((1, 2));
        let mut dists = Array2::<f32>::zeros((1, 2));
        assert!(matches!(
            fill_dense(&sample_results(), &mut indices, &mut dists, 2),
            Err(NnError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_fill_dense_failure_leaves_outputs_untouched() {
        let results = vec![
            vec![Neighbor::new(2, 0.1)],
            vec![Neighbor::new(u32::MAX as usize, 0.3)],
        ];
        let mut indices = Array2::<u32>::from_elem((2, 1), 5);
        let mut dists = Array2::<f32>::from_elem((2, 1), 9.0);

        assert!(matches!(
            fill_dense(&results, &mut indices, &mut dists, 1),
            Err(NnError::InvalidParameter(_))
        ));
        assert_eq!(indices, array![[5], [5]]);
        assert_eq!(dists, array![[9.0], [9.0]]);
    }

    #[test]
    fn test_fill_ragged() {
        let mut indices: Vec<Vec<u32>> = vec![vec![99]];
        let mut dists = Vec::new();
        let count = fill_ragged(sample_results(), &mut indices, &mut dists).unwrap();

        assert_eq!(count, 3);
        assert_eq!(indices, vec![vec![3, 1], vec![7]]);
        assert_eq!(dists[1], vec![0.2]);
    }

    #[test]
    fn test_id_conversion_overflow() {
        assert_eq!(<i32 as NeighborId>::from_id(5), Some(5));
        assert_eq!(<i32 as NeighborId>::from_id(usize::MAX), None);
        assert_eq!(<u32 as NeighborId>::from_id(u32::MAX as usize), None);
    }

    #[test]
    fn test_run_queries_parallel_matches_sequential() {
        let queries = array![[0.0f32, 1.0], [2.0, 3.0], [4.0, 5.0]];
        let f = |q: &[f32]| vec![Neighbor::new(q[0] as usize, q[1])];

        let sequential = run_queries(queries.view(), 2, &SearchParams::default(), f).unwrap();
        let parallel =
            run_queries(queries.view(), 2, &SearchParams::default().with_cores(2), f).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_run_queries_dimension_mismatch() {
        let queries = array![[0.0f32, 1.0]];
        assert!(matches!(
            run_queries(queries.view(), 3, &SearchParams::default(), |_| Vec::new()),
            Err(NnError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }
}
