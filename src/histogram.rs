//! Histogram
//!
//! Per node gradient histograms. Bins of all features are laid out in one
//! flat buffer, feature after feature, and bin 0 of every feature holds the
//! rows where that feature is missing.
use crate::bin::Bin;
use crate::constants::HISTOGRAM_CHUNK_SIZE;
use crate::data::{JaggedMatrix, SparseMatrix};
use rayon::prelude::*;
use std::ops::Range;

/// Offsets of every feature in the flat histogram buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramLayout {
    pub offsets: Vec<usize>,
    pub n_bins: usize,
}

impl HistogramLayout {
    /// One bin per cut, the missing bin plus one bin for every interval.
    pub fn from_cuts(cuts: &JaggedMatrix<f64>) -> Self {
        let mut offsets = Vec::with_capacity(cuts.cols);
        let mut n_bins = 0;
        for j in 0..cuts.cols {
            offsets.push(n_bins);
            n_bins += cuts.get_col(j).len();
        }
        HistogramLayout { offsets, n_bins }
    }

    pub fn n_features(&self) -> usize {
        self.offsets.len()
    }

    pub fn feature_range(&self, feature: usize) -> Range<usize> {
        let end = self.offsets.get(feature + 1).copied().unwrap_or(self.n_bins);
        self.offsets[feature]..end
    }
}

/// Everything needed to accumulate gradients of training rows.
pub struct HistogramSource<'a> {
    pub matrix: &'a SparseMatrix,
    /// Bins parallel to `matrix.values`.
    pub bins: &'a [u16],
    pub grad: &'a [f32],
    pub hess: &'a [f32],
    pub layout: &'a HistogramLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeHistogram {
    pub bins: Vec<Bin>,
    /// Statistics of every row of the node.
    pub total: Bin,
}

impl NodeHistogram {
    pub fn empty(layout: &HistogramLayout) -> Self {
        NodeHistogram {
            bins: vec![Bin::default(); layout.n_bins],
            total: Bin::default(),
        }
    }

    /// Add the present entries of one row. Missing entries are derived
    /// later in [`NodeHistogram::finalize_missing`].
    #[inline]
    pub fn add_row(&mut self, layout: &HistogramLayout, indices: &[u32], bins: &[u16], g: f32, h: f32) {
        self.total.add(g, h);
        for (j, b) in indices.iter().zip(bins) {
            if *b != 0 {
                self.bins[layout.offsets[*j as usize] + usize::from(*b)].add(g, h);
            }
        }
    }

    pub fn merge(&mut self, other: &NodeHistogram) {
        self.total.merge(&other.total);
        self.bins.iter_mut().zip(other.bins.iter()).for_each(|(a, b)| a.merge(b));
    }

    /// Fill the missing bin of every feature with the node total minus the
    /// present bins.
    pub fn finalize_missing(&mut self, layout: &HistogramLayout) {
        for f in 0..layout.n_features() {
            let range = layout.feature_range(f);
            if range.is_empty() {
                continue;
            }
            let mut present = Bin::default();
            for b in &self.bins[range.start + 1..range.end] {
                present.merge(b);
            }
            self.bins[range.start] = self.total.subtract(&present);
        }
    }

    /// Histogram of a sibling, given the parent and the other child.
    pub fn from_parent_child(parent: &NodeHistogram, child: &NodeHistogram) -> Self {
        NodeHistogram {
            bins: parent
                .bins
                .iter()
                .zip(child.bins.iter())
                .map(|(p, c)| p.subtract(c))
                .collect(),
            total: parent.total.subtract(&child.total),
        }
    }

    pub fn feature(&self, layout: &HistogramLayout, feature: usize) -> &[Bin] {
        &self.bins[layout.feature_range(feature)]
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite() && self.bins.iter().all(|b| b.is_finite())
    }
}

/// Accumulate the rows of a node. Rows are processed in fixed size chunks
/// on the current rayon pool and the partial histograms are merged in chunk
/// order, so the result does not depend on the number of threads.
///
/// The missing bins are left empty.
pub fn build_histogram(source: &HistogramSource, rows: &[usize]) -> NodeHistogram {
    let layout = source.layout;
    let partials: Vec<NodeHistogram> = rows
        .par_chunks(HISTOGRAM_CHUNK_SIZE)
        .map(|chunk| {
            let mut hist = NodeHistogram::empty(layout);
            for row in chunk {
                let (start, stop) = (source.matrix.indptr[*row], source.matrix.indptr[*row + 1]);
                hist.add_row(
                    layout,
                    &source.matrix.indices[start..stop],
                    &source.bins[start..stop],
                    source.grad[*row],
                    source.hess[*row],
                );
            }
            hist
        })
        .collect();
    let mut partials = partials.into_iter();
    match partials.next() {
        Some(mut hist) => {
            for p in partials {
                hist.merge(&p);
            }
            hist
        }
        None => NodeHistogram::empty(layout),
    }
}
