//! Dense row-major datasets and query batches.

use std::borrow::Cow;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::element::Element;
use crate::error::{NnError, Result};

/// A dataset or query batch: one point per row, `veclen` columns.
pub type Matrix<T> = Array2<T>;

/// An empty 0 x 0 matrix, used as the dataset placeholder for deferred builds.
pub fn empty<T: Element>() -> Matrix<T> {
    Array2::default((0, 0))
}

/// Build a matrix from equally sized rows.
pub fn from_rows<T: Element>(rows: Vec<Vec<T>>) -> Result<Matrix<T>> {
    let veclen = rows.first().map_or(0, Vec::len);
    let nrows = rows.len();
    let mut data = Vec::with_capacity(nrows * veclen);
    for row in rows {
        if row.len() != veclen {
            return Err(NnError::DimensionMismatch {
                expected: veclen,
                actual: row.len(),
            });
        }
        data.extend(row);
    }
    Array2::from_shape_vec((nrows, veclen), data)
        .map_err(|e| NnError::InvalidParameter(e.to_string()))
}

/// Borrow a row as a contiguous slice, copying only for non-standard layouts.
pub(crate) fn row_slice<'a, T: Element>(row: ArrayView1<'a, T>) -> Cow<'a, [T]> {
    match row.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(row.to_vec()),
    }
}

/// Verify that a batch has the expected number of columns.
pub(crate) fn check_veclen<T>(points: &ArrayView2<'_, T>, veclen: usize) -> Result<()> {
    if points.ncols() != veclen {
        return Err(NnError::DimensionMismatch {
            expected: veclen,
            actual: points.ncols(),
        });
    }
    Ok(())
}

/// Parse a vector from a comma-separated string
pub fn parse_row(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .map_err(|_| NnError::InvalidParameter(format!("Invalid float: {}", x)))
        })
        .collect()
}
