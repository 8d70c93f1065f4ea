use crate::config::TreeMethod;
use crate::constants::MAX_BIN_LIMIT;
use crate::data::{FloatData, JaggedMatrix, SparseMatrix};
use crate::dataset::SparseColumns;
use crate::errors::TgbmError;
use crate::utils::{map_bin, percentiles};
use rayon::prelude::*;
use rayon::ThreadPool;

/// If there are no more unique values than percentiles,
/// just return the unique values of the vector.
///
/// * `v` - Non missing values of a feature.
/// * `pcts` - Percentiles to compute otherwise.
fn percentiles_or_value(v: &[f64], pcts: &[f64]) -> Vec<f64> {
    let mut v_u = v.to_owned();
    v_u.sort_by(|a, b| a.total_cmp(b));
    v_u.dedup();
    if v_u.len() <= pcts.len() {
        v_u
    } else {
        let w = vec![1.0; v.len()];
        let mut p = percentiles(v, &w, pcts);
        p.dedup();
        p
    }
}

fn percentile_grid(nbins: u16) -> Vec<f64> {
    let nbins_ = f64::from_u16(nbins);
    (0..nbins).map(|i| f64::from_u16(i) / nbins_).collect()
}

// Bins of a feature are numbered from 0, which holds the missing values.
// With cuts c_0 < c_1 < ... < c_k = f64::MAX, a present value v lands in
// bin max(1, #{c_j <= v}), so bin b >= 1 covers [c_{b-1}, c_b) and a split
// "bin <= b" is the same as "v < c_b".
#[derive(Debug, Clone)]
pub struct BinnedData {
    /// Bin of every stored value, parallel to the CSR values.
    pub bins: Vec<u16>,
    /// Cut points of every feature, the last one is always `f64::MAX`.
    pub cuts: JaggedMatrix<f64>,
    /// Number of bins per feature, including the missing bin.
    pub nunique: Vec<usize>,
}

impl BinnedData {
    /// Bin of a row's value for a feature, 0 when the entry is absent.
    #[inline]
    pub fn bin_of(&self, matrix: &SparseMatrix, row: usize, feature: usize) -> u16 {
        let (start, stop) = (matrix.indptr[row], matrix.indptr[row + 1]);
        match u32::try_from(feature) {
            Ok(f) => match matrix.indices[start..stop].binary_search(&f) {
                Ok(k) => self.bins[start + k],
                Err(_) => 0,
            },
            Err(_) => 0,
        }
    }
}

/// Cut points for the non missing values of a single feature.
fn column_cuts(values: &[f64], pcts: &[f64], tree_method: TreeMethod) -> Vec<f64> {
    let no_miss: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let mut col_cuts = match tree_method {
        TreeMethod::Exact => {
            let mut v_u = no_miss.clone();
            v_u.sort_by(|a, b| a.total_cmp(b));
            v_u.dedup();
            if v_u.len() < usize::from(MAX_BIN_LIMIT) {
                v_u
            } else {
                percentiles_or_value(&no_miss, &percentile_grid(MAX_BIN_LIMIT - 1))
            }
        }
        TreeMethod::Auto | TreeMethod::Hist => percentiles_or_value(&no_miss, pcts),
    };
    // Infinite values fall into the first or last bin, they are never cuts.
    col_cuts.retain(|c| c.is_finite() && *c < f64::MAX);
    col_cuts.push(f64::MAX);
    col_cuts
}

/// Compute the cut points of every column.
///
/// * `columns` - Column oriented view of the features.
/// * `nbins` - The maximum number of value bins of each column.
/// * `tree_method` - `Exact` uses every distinct value.
pub fn compute_cuts(columns: &SparseColumns, nbins: u16, tree_method: TreeMethod) -> JaggedMatrix<f64> {
    let pcts = percentile_grid(nbins);
    let col_cuts: Vec<Vec<f64>> = (0..columns.n_column)
        .into_par_iter()
        .map(|j| column_cuts(columns.column(j).1, &pcts, tree_method))
        .collect();
    JaggedMatrix::from_vecs(&col_cuts)
}

/// Map every stored value of the matrix to its bin.
pub fn bin_values_from_cuts(matrix: &SparseMatrix, cuts: &JaggedMatrix<f64>) -> Result<Vec<u16>, TgbmError> {
    matrix
        .values
        .par_iter()
        .zip(matrix.indices.par_iter())
        .map(|(v, j)| {
            let col_cuts = cuts.get_col(*j as usize);
            let last = col_cuts.len().saturating_sub(1);
            map_bin(col_cuts, v)
                .map(|b| if v.is_nan() || last == 0 { 0 } else { b.clamp(1, last as u16) })
                .ok_or_else(|| TgbmError::ShapeMismatch(format!("value {} of column {} cannot be binned", v, j)))
        })
        .collect()
}

/// Bin a sparse matrix.
///
/// * `matrix` - Sparse matrix with sorted rows.
/// * `nbins` - The number of value bins each column should be binned into.
/// * `tree_method` - How the cut points are chosen.
/// * `pool` - Thread pool the work runs on.
pub fn bin_sparse(
    matrix: &SparseMatrix,
    nbins: u16,
    tree_method: TreeMethod,
    pool: &ThreadPool,
) -> Result<BinnedData, TgbmError> {
    pool.install(|| {
        let columns = SparseColumns::from_csr(matrix);
        let cuts = compute_cuts(&columns, nbins, tree_method);
        let nunique = (0..cuts.cols).map(|j| cuts.get_col(j).len()).collect();
        let bins = bin_values_from_cuts(matrix, &cuts)?;
        Ok(BinnedData { bins, cuts, nunique })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_bin_sparse_respects_cuts() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut rows: Vec<Vec<(u32, f64)>> = Vec::new();
        for _ in 0..500 {
            let mut row = Vec::new();
            for j in 0..4u32 {
                if rng.gen::<f64>() < 0.7 {
                    row.push((j, rng.gen::<f64>() * 100.0));
                }
            }
            rows.push(row);
        }
        let matrix = SparseMatrix::from_rows(&rows, 4).unwrap();
        let b = bin_sparse(&matrix, 16, TreeMethod::Hist, &pool()).unwrap();
        assert_eq!(b.bins.len(), matrix.nnz());
        for j in 0..4 {
            let cuts = b.cuts.get_col(j);
            assert!(cuts.len() <= 17);
            assert_eq!(*cuts.last().unwrap(), f64::MAX);
            assert!(cuts.windows(2).all(|w| w[0] < w[1]));
        }
        for i in 0..matrix.rows {
            let (indices, values) = matrix.row(i);
            for (j, v) in indices.iter().zip(values) {
                let bin = b.bin_of(&matrix, i, *j as usize) as usize;
                let cuts = b.cuts.get_col(*j as usize);
                assert!(bin >= 1);
                assert!(*v < cuts[bin]);
                if bin > 1 {
                    assert!(cuts[bin - 1] <= *v);
                }
            }
        }
    }

    #[test]
    fn test_absent_and_nan_are_missing() {
        let matrix = SparseMatrix::from_rows(&[vec![(0, 1.0)], vec![(0, f64::NAN), (1, 2.0)], vec![]], 2).unwrap();
        let b = bin_sparse(&matrix, 255, TreeMethod::Auto, &pool()).unwrap();
        assert_eq!(b.bin_of(&matrix, 0, 0), 1);
        assert_eq!(b.bin_of(&matrix, 1, 0), 0);
        assert_eq!(b.bin_of(&matrix, 2, 0), 0);
        assert_eq!(b.bin_of(&matrix, 0, 1), 0);
        assert_eq!(b.cuts.get_col(0), &[1.0, f64::MAX]);
        assert_eq!(b.nunique, vec![2, 2]);
    }

    #[test]
    fn test_infinite_values_are_not_cuts() {
        let rows: Vec<Vec<(u32, f64)>> = [f64::NEG_INFINITY, 1.0, 5.0, 9.0, f64::INFINITY]
            .iter()
            .map(|v| vec![(0, *v)])
            .collect();
        let matrix = SparseMatrix::from_rows(&rows, 1).unwrap();
        for method in [TreeMethod::Hist, TreeMethod::Exact] {
            let b = bin_sparse(&matrix, 255, method, &pool()).unwrap();
            assert_eq!(b.cuts.get_col(0), &[1.0, 5.0, 9.0, f64::MAX]);
            let bins: Vec<u16> = (0..5).map(|i| b.bin_of(&matrix, i, 0)).collect();
            assert_eq!(bins, vec![1, 1, 2, 3, 3]);
        }
    }

    #[test]
    fn test_empty_column_has_only_sentinel() {
        let matrix = SparseMatrix::from_rows(&[vec![(0, 1.0)], vec![(0, 2.0)]], 3).unwrap();
        let b = bin_sparse(&matrix, 255, TreeMethod::Hist, &pool()).unwrap();
        assert_eq!(b.cuts.get_col(2), &[f64::MAX]);
        assert_eq!(b.nunique[2], 1);
    }

    #[test]
    fn test_exact_uses_all_unique_values() {
        let rows: Vec<Vec<(u32, f64)>> = (0..50).map(|i| vec![(0, f64::from(i % 25))]).collect();
        let matrix = SparseMatrix::from_rows(&rows, 1).unwrap();
        let hist = bin_sparse(&matrix, 4, TreeMethod::Hist, &pool()).unwrap();
        let exact = bin_sparse(&matrix, 4, TreeMethod::Exact, &pool()).unwrap();
        assert!(hist.cuts.get_col(0).len() <= 5);
        assert_eq!(exact.cuts.get_col(0).len(), 26);
    }

    #[test]
    fn test_infinite_values_stay_in_range() {
        let matrix = SparseMatrix::from_rows(&[vec![(0, f64::INFINITY)], vec![(0, 1.0)], vec![(0, f64::MAX)]], 1).unwrap();
        let b = bin_sparse(&matrix, 255, TreeMethod::Hist, &pool()).unwrap();
        let last = (b.cuts.get_col(0).len() - 1) as u16;
        assert!(b.bins.iter().all(|bin| *bin >= 1 && *bin <= last));
    }
}
