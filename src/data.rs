use crate::errors::TgbmError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{self, Debug, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Data trait used throughout the package
/// to control for floating point numbers.
pub trait FloatData<T>:
    Mul<Output = T>
    + Display
    + Add<Output = T>
    + Div<Output = T>
    + Neg<Output = T>
    + Copy
    + Debug
    + PartialEq
    + PartialOrd
    + AddAssign
    + Sub<Output = T>
    + SubAssign
    + Sum
    + std::marker::Send
    + std::marker::Sync
{
    const ZERO: T;
    const ONE: T;
    const INFINITY: T;
    fn from_u16(v: u16) -> T;
    fn is_nan(self) -> bool;
}

impl FloatData<f64> for f64 {
    const ZERO: f64 = 0.0;
    const ONE: f64 = 1.0;
    const INFINITY: f64 = f64::INFINITY;

    fn from_u16(v: u16) -> f64 {
        f64::from(v)
    }
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

impl FloatData<f32> for f32 {
    const ZERO: f32 = 0.0;
    const ONE: f32 = 1.0;
    const INFINITY: f32 = f32::INFINITY;

    fn from_u16(v: u16) -> f32 {
        f32::from(v)
    }
    fn is_nan(self) -> bool {
        self.is_nan()
    }
}

/// Contiguous column major dense matrix.
///
/// Training only accepts sparse input, this container exists so callers
/// holding dense data get an explicit [`TgbmError::UnsupportedInput`]
/// rather than a silent conversion.
pub struct Matrix<'a, T> {
    /// The raw data stored in a single slice.
    pub data: &'a [T],
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
}

impl<'a, T> Matrix<'a, T> {
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Self {
        Matrix { data, rows, cols }
    }
}

/// Compressed sparse row matrix.
///
/// Entries absent from a row are treated as missing, as are explicit NaN values.
/// Once constructed, the column indices of every row are strictly ascending,
/// which lets lookups use a binary search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    /// Non-zero values, row after row.
    pub values: Vec<f64>,
    /// Column index of every stored value.
    pub indices: Vec<u32>,
    /// Row pointers, row `i` spans `indptr[i]..indptr[i + 1]`.
    pub indptr: Vec<usize>,
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
}

impl SparseMatrix {
    /// Build a CSR matrix from raw buffers, validating the layout and sorting
    /// the column indices of every row.
    ///
    /// * `values` - Stored values.
    /// * `indices` - Column index for each stored value.
    /// * `indptr` - Row pointers, of length `rows + 1`.
    /// * `rows` - Number of rows.
    /// * `cols` - Number of columns.
    pub fn new(
        values: Vec<f64>,
        indices: Vec<u32>,
        indptr: Vec<usize>,
        rows: usize,
        cols: usize,
    ) -> Result<Self, TgbmError> {
        let mut matrix = SparseMatrix {
            values,
            indices,
            indptr,
            rows,
            cols,
        };
        matrix.validate()?;
        matrix.sort_indices()?;
        Ok(matrix)
    }

    /// Build a CSR matrix from `(column, value)` pairs for each row.
    pub fn from_rows(rows: &[Vec<(u32, f64)>], cols: usize) -> Result<Self, TgbmError> {
        let mut values = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        indptr.push(0);
        for row in rows {
            for (j, v) in row {
                indices.push(*j);
                values.push(*v);
            }
            indptr.push(indices.len());
        }
        SparseMatrix::new(values, indices, indptr, rows.len(), cols)
    }

    /// Check the buffer lengths and index bounds of the matrix.
    pub fn validate(&self) -> Result<(), TgbmError> {
        if self.indptr.len() != self.rows + 1 {
            return Err(TgbmError::ShapeMismatch(format!(
                "row pointer array has length {}, expected {}",
                self.indptr.len(),
                self.rows + 1
            )));
        }
        if self.indptr[0] != 0 {
            return Err(TgbmError::ShapeMismatch(format!(
                "row pointer array must start at 0, found {}",
                self.indptr[0]
            )));
        }
        if let Some(i) = self.indptr.windows(2).position(|w| w[1] < w[0]) {
            return Err(TgbmError::ShapeMismatch(format!(
                "row pointer array decreases at row {}",
                i
            )));
        }
        let nnz = self.indptr[self.rows];
        if self.values.len() != nnz || self.indices.len() != nnz {
            return Err(TgbmError::ShapeMismatch(format!(
                "row pointers describe {} entries, but {} values and {} column indices were provided",
                nnz,
                self.values.len(),
                self.indices.len()
            )));
        }
        if let Some(j) = self.indices.iter().find(|j| **j as usize >= self.cols) {
            return Err(TgbmError::ShapeMismatch(format!(
                "column index {} out of range for {} columns",
                j, self.cols
            )));
        }
        Ok(())
    }

    /// Sort the column indices within every row, rejecting duplicates.
    fn sort_indices(&mut self) -> Result<(), TgbmError> {
        for i in 0..self.rows {
            let (start, stop) = (self.indptr[i], self.indptr[i + 1]);
            let row_idx = &self.indices[start..stop];
            if row_idx.windows(2).all(|w| w[0] < w[1]) {
                continue;
            }
            let mut order: Vec<usize> = (start..stop).collect();
            order.sort_by_key(|k| self.indices[*k]);
            let indices: Vec<u32> = order.iter().map(|k| self.indices[*k]).collect();
            let values: Vec<f64> = order.iter().map(|k| self.values[*k]).collect();
            if let Some(w) = indices.windows(2).find(|w| w[0] == w[1]) {
                return Err(TgbmError::ShapeMismatch(format!(
                    "duplicate column index {} in row {}",
                    w[0], i
                )));
            }
            self.indices[start..stop].copy_from_slice(&indices);
            self.values[start..stop].copy_from_slice(&values);
        }
        Ok(())
    }

    /// The matrix with ascending column indices in every row, copied and
    /// sorted only when some row is out of order.
    pub fn sorted(&self) -> Result<Cow<'_, SparseMatrix>, TgbmError> {
        if self.has_sorted_indices() {
            return Ok(Cow::Borrowed(self));
        }
        let mut matrix = self.clone();
        matrix.sort_indices()?;
        Ok(Cow::Owned(matrix))
    }

    /// True when every row holds strictly ascending column indices.
    pub fn has_sorted_indices(&self) -> bool {
        (0..self.rows).all(|i| {
            self.indices[self.indptr[i]..self.indptr[i + 1]]
                .windows(2)
                .all(|w| w[0] < w[1])
        })
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of a row.
    pub fn row(&self, i: usize) -> (&[u32], &[f64]) {
        let (start, stop) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..stop], &self.values[start..stop])
    }

    /// Stored value at `(i, j)`, `None` if the entry is absent.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let (indices, values) = self.row(i);
        row_value(indices, values, j)
    }
}

/// Look up a column in one sorted CSR row.
#[inline]
pub fn row_value(indices: &[u32], values: &[f64], col: usize) -> Option<f64> {
    let col = u32::try_from(col).ok()?;
    indices.binary_search(&col).ok().map(|k| values[k])
}

/// Feature matrices accepted at the engine boundary.
pub enum Features<'a> {
    Sparse(&'a SparseMatrix),
    Dense(&'a Matrix<'a, f64>),
}

impl<'a> Features<'a> {
    pub fn rows(&self) -> usize {
        match self {
            Features::Sparse(m) => m.rows,
            Features::Dense(m) => m.rows,
        }
    }

    /// The sparse matrix, or an error for dense input.
    pub fn as_sparse(&self) -> Result<&'a SparseMatrix, TgbmError> {
        match self {
            Features::Sparse(m) => Ok(*m),
            Features::Dense(m) => Err(TgbmError::UnsupportedInput(format!(
                "dense matrix ({} x {}) not supported yet, provide a CSR matrix",
                m.rows, m.cols
            ))),
        }
    }
}

/// A jagged column aligned matrix, that owns its data contents.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct JaggedMatrix<T> {
    /// The contents of the matrix.
    pub data: Vec<T>,
    /// The end index's of the matrix.
    pub ends: Vec<usize>,
    /// Number of columns in the matrix
    pub cols: usize,
    /// The number of elements in the matrix.
    pub n_records: usize,
}

impl<T> JaggedMatrix<T>
where
    T: Copy,
{
    /// Generate a jagged array from a vector of vectors
    pub fn from_vecs(vecs: &[Vec<T>]) -> Self {
        let mut data = Vec::new();
        let mut ends = Vec::with_capacity(vecs.len());
        for vec in vecs {
            data.extend_from_slice(vec);
            ends.push(data.len());
        }
        JaggedMatrix {
            n_records: data.len(),
            data,
            ends,
            cols: vecs.len(),
        }
    }
}

impl<T> JaggedMatrix<T> {
    /// Get the column of a jagged array.
    pub fn get_col(&self, col: usize) -> &[T] {
        assert!(col < self.ends.len());
        let (i, j) = if col == 0 {
            (0, self.ends[col])
        } else {
            (self.ends[col - 1], self.ends[col])
        };
        &self.data[i..j]
    }

    /// Check that the column ends describe the data buffer.
    pub fn is_consistent(&self) -> bool {
        self.cols == self.ends.len()
            && self.n_records == self.data.len()
            && self.ends.windows(2).all(|w| w[0] <= w[1])
            && self.ends.last().map_or(self.data.is_empty(), |e| *e == self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_sorts_row_indices() {
        let m = SparseMatrix::new(vec![3.0, 1.0, 2.0, 9.0], vec![2, 0, 1, 1], vec![0, 3, 4], 2, 3).unwrap();
        assert!(m.has_sorted_indices());
        assert_eq!(m.row(0), (&[0u32, 1, 2][..], &[1.0, 2.0, 3.0][..]));
        assert_eq!(m.get(1, 1), Some(9.0));
        assert_eq!(m.get(1, 0), None);
        assert_eq!(m.nnz(), 4);
    }

    #[test]
    fn test_sparse_shape_errors() {
        let bad_ptr = SparseMatrix::new(vec![1.0], vec![0], vec![0, 1], 2, 1);
        assert!(matches!(bad_ptr, Err(TgbmError::ShapeMismatch(_))));

        let bad_len = SparseMatrix::new(vec![1.0, 2.0], vec![0], vec![0, 1], 1, 1);
        assert!(matches!(bad_len, Err(TgbmError::ShapeMismatch(_))));

        let bad_col = SparseMatrix::new(vec![1.0], vec![4], vec![0, 1], 1, 3);
        assert!(matches!(bad_col, Err(TgbmError::ShapeMismatch(_))));

        let decreasing = SparseMatrix::new(vec![1.0], vec![0], vec![0, 1, 0], 2, 1);
        assert!(matches!(decreasing, Err(TgbmError::ShapeMismatch(_))));

        let duplicate = SparseMatrix::new(vec![1.0, 2.0], vec![1, 1], vec![0, 2], 1, 2);
        assert!(matches!(duplicate, Err(TgbmError::ShapeMismatch(_))));
    }

    #[test]
    fn test_from_rows_with_empty_row() {
        let m = SparseMatrix::from_rows(&[vec![(1, 0.5)], vec![], vec![(0, -1.0), (2, 4.0)]], 3).unwrap();
        assert_eq!(m.indptr, vec![0, 1, 1, 3]);
        assert_eq!(m.row(1).0.len(), 0);
        assert_eq!(m.get(2, 2), Some(4.0));
    }

    #[test]
    fn test_dense_features_rejected() {
        let v = vec![1.0, 2.0];
        let dense = Matrix::new(&v, 2, 1);
        let features = Features::Dense(&dense);
        assert_eq!(features.rows(), 2);
        assert!(matches!(features.as_sparse(), Err(TgbmError::UnsupportedInput(_))));
    }

    #[test]
    fn test_jaggedmatrix_get_col() {
        let vecs = vec![vec![0], vec![5, 4, 3, 2], vec![4, 5]];
        let jmatrix = JaggedMatrix::from_vecs(&vecs);
        assert_eq!(jmatrix.get_col(1), vec![5, 4, 3, 2]);
        assert_eq!(jmatrix.get_col(0), vec![0]);
        assert_eq!(jmatrix.get_col(2), vec![4, 5]);
        assert!(jmatrix.is_consistent());
        assert_eq!(jmatrix.n_records, 7);
    }
}
