//! Dataset
//!
//! Adapts validated CSR input and labels into the form the trainer consumes,
//! including a column oriented view used for computing cut points.
use crate::constants::MAX_LIBSVM_FEATURE;
use crate::data::{Features, SparseMatrix};
use crate::errors::TgbmError;
use std::fs;
use std::path::Path;

/// Column major (CSC) copy of a sparse matrix.
#[derive(Debug, Clone)]
pub struct SparseColumns {
    /// Values, column after column.
    pub csc_val: Vec<f64>,
    /// Row index of every value.
    pub csc_row_idx: Vec<usize>,
    /// Column pointers, column `j` spans `csc_col_ptr[j]..csc_col_ptr[j + 1]`.
    pub csc_col_ptr: Vec<usize>,
    pub n_column: usize,
    pub n_row: usize,
}

impl SparseColumns {
    /// Transpose a CSR matrix. Rows are visited in order, so the row
    /// indices of every column come out ascending.
    pub fn from_csr(matrix: &SparseMatrix) -> Self {
        let mut counts = vec![0usize; matrix.cols + 1];
        for j in matrix.indices.iter() {
            counts[*j as usize + 1] += 1;
        }
        for j in 0..matrix.cols {
            counts[j + 1] += counts[j];
        }
        let csc_col_ptr = counts.clone();
        let mut next = counts;
        let mut csc_val = vec![0.0; matrix.nnz()];
        let mut csc_row_idx = vec![0; matrix.nnz()];
        for i in 0..matrix.rows {
            let (indices, values) = matrix.row(i);
            for (j, v) in indices.iter().zip(values) {
                let dest = next[*j as usize];
                csc_val[dest] = *v;
                csc_row_idx[dest] = i;
                next[*j as usize] += 1;
            }
        }
        SparseColumns {
            csc_val,
            csc_row_idx,
            csc_col_ptr,
            n_column: matrix.cols,
            n_row: matrix.rows,
        }
    }

    /// Row indices and values stored for a column.
    pub fn column(&self, j: usize) -> (&[usize], &[f64]) {
        let (start, stop) = (self.csc_col_ptr[j], self.csc_col_ptr[j + 1]);
        (&self.csc_row_idx[start..stop], &self.csc_val[start..stop])
    }
}

/// Training data, a validated sparse feature matrix with one label per row.
#[derive(Debug, Clone)]
pub struct SparseDataset {
    pub matrix: SparseMatrix,
    pub labels: Vec<f32>,
}

impl SparseDataset {
    /// Validate features and labels.
    ///
    /// Dense features are rejected with [`TgbmError::UnsupportedInput`],
    /// and any disagreement between the matrix and labels with
    /// [`TgbmError::ShapeMismatch`].
    pub fn new(features: Features, labels: &[f32]) -> Result<Self, TgbmError> {
        let matrix = features.as_sparse()?;
        matrix.validate()?;
        let matrix = matrix.sorted()?;
        if matrix.rows == 0 {
            return Err(TgbmError::ShapeMismatch("dataset has no rows".to_string()));
        }
        if labels.len() != matrix.rows {
            return Err(TgbmError::ShapeMismatch(format!(
                "{} labels provided for {} rows",
                labels.len(),
                matrix.rows
            )));
        }
        if let Some(i) = labels.iter().position(|y| !y.is_finite()) {
            return Err(TgbmError::ShapeMismatch(format!("label of row {} is not finite", i)));
        }
        Ok(SparseDataset {
            matrix: matrix.into_owned(),
            labels: labels.to_vec(),
        })
    }

    /// Read a LibSVM formatted file, `label index:value ...` per line,
    /// with feature indices starting at 1.
    pub fn from_libsvm_file<P: AsRef<Path>>(path: P) -> Result<Self, TgbmError> {
        let content = fs::read_to_string(path).map_err(|e| TgbmError::IoError(e.to_string()))?;
        Self::from_libsvm_str(&content)
    }

    /// Parse LibSVM formatted text.
    pub fn from_libsvm_str(content: &str) -> Result<Self, TgbmError> {
        let mut labels = Vec::new();
        let mut rows = Vec::new();
        let mut n_cols = 0;
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let label = tokens
                .next()
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| TgbmError::ShapeMismatch(format!("line {}: missing or invalid label", n + 1)))?;
            let mut row = Vec::new();
            for token in tokens {
                let (idx, value) = token
                    .split_once(':')
                    .ok_or_else(|| TgbmError::ShapeMismatch(format!("line {}: malformed entry {}", n + 1, token)))?;
                let idx = idx
                    .parse::<u32>()
                    .ok()
                    .filter(|i| *i > 0 && *i <= MAX_LIBSVM_FEATURE)
                    .ok_or_else(|| TgbmError::ShapeMismatch(format!("line {}: invalid feature index {}", n + 1, idx)))?;
                let value = value
                    .parse::<f64>()
                    .map_err(|_| TgbmError::ShapeMismatch(format!("line {}: invalid value {}", n + 1, value)))?;
                n_cols = n_cols.max(idx as usize);
                row.push((idx - 1, value));
            }
            labels.push(label);
            rows.push(row);
        }
        let matrix = SparseMatrix::from_rows(&rows, n_cols)?;
        SparseDataset::new(Features::Sparse(&matrix), &labels)
    }

    pub fn n_rows(&self) -> usize {
        self.matrix.rows
    }

    pub fn n_cols(&self) -> usize {
        self.matrix.cols
    }

    /// Column oriented copy of the features.
    pub fn columns(&self) -> SparseColumns {
        SparseColumns::from_csr(&self.matrix)
    }
}
