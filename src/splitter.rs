use crate::bin::Bin;
use crate::data::JaggedMatrix;
use crate::histogram::{HistogramLayout, NodeHistogram};
use crate::utils::{gain, weight};
use rayon::prelude::*;

/// Statistics of one side of a candidate split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeInfo {
    pub grad: f64,
    pub hess: f64,
    pub counts: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitInfo {
    pub split_gain: f64,
    pub split_feature: usize,
    /// Rows with a bin at most this value go left.
    pub split_bin: u16,
    /// Cut value matching `split_bin`, values below it go left.
    pub split_value: f64,
    /// Direction of rows where the feature is missing.
    pub default_right: bool,
    pub left_node: NodeInfo,
    pub right_node: NodeInfo,
}

impl SplitInfo {
    /// Is `self` strictly better than `other`? Ties keep `other`, which
    /// has the lower feature or bin when candidates are visited in order.
    fn better_than(&self, other: &Option<SplitInfo>) -> bool {
        match other {
            Some(o) => self.split_gain > o.split_gain,
            None => true,
        }
    }
}

/// Search the histogram of a node for its best split.
pub trait Splitter: Sync {
    fn get_lambda(&self) -> f64;
    fn get_gamma(&self) -> f64;

    /// Best split of a single feature, if any candidate is valid.
    ///
    /// * `bins` - Histogram of the feature, bin 0 holds missing rows.
    /// * `total` - Statistics of every row in the node.
    /// * `feature` - Index of the feature.
    /// * `cuts` - Cut points of the feature.
    fn best_feature_split(&self, bins: &[Bin], total: &Bin, feature: usize, cuts: &[f64]) -> Option<SplitInfo>;

    /// Best split over the columns in `col_index`, which must be ascending.
    /// Splits with a gain not above `gamma` are discarded.
    fn best_split(
        &self,
        hist: &NodeHistogram,
        layout: &HistogramLayout,
        cuts: &JaggedMatrix<f64>,
        col_index: &[usize],
    ) -> Option<SplitInfo> {
        let candidates: Vec<Option<SplitInfo>> = col_index
            .par_iter()
            .map(|f| self.best_feature_split(hist.feature(layout, *f), &hist.total, *f, cuts.get_col(*f)))
            .collect();
        let mut best: Option<SplitInfo> = None;
        for s in candidates.into_iter().flatten() {
            if s.better_than(&best) {
                best = Some(s);
            }
        }
        best.filter(|s| s.split_gain > self.get_gamma())
    }
}

/// Splitter that learns a default direction for missing values, sending
/// them to whichever side gives the larger gain.
pub struct MissingImputerSplitter {
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
}

impl MissingImputerSplitter {
    pub fn new(lambda: f64, gamma: f64, min_child_weight: f64) -> Self {
        MissingImputerSplitter {
            lambda,
            gamma,
            min_child_weight,
        }
    }

    fn node_info(&self, b: &Bin) -> NodeInfo {
        NodeInfo {
            grad: b.g,
            hess: b.h,
            counts: b.counts,
            weight: weight(b.g, b.h, self.lambda),
        }
    }
}

impl Splitter for MissingImputerSplitter {
    fn get_lambda(&self) -> f64 {
        self.lambda
    }

    fn get_gamma(&self) -> f64 {
        self.gamma
    }

    fn best_feature_split(&self, bins: &[Bin], total: &Bin, feature: usize, cuts: &[f64]) -> Option<SplitInfo> {
        // Missing bin plus at least two value bins are needed to split.
        if bins.len() < 3 {
            return None;
        }
        let missing = bins[0];
        let mut present = Bin::default();
        for b in &bins[1..] {
            present.merge(b);
        }
        let parent_score = gain(total.g, total.h, self.lambda);

        let mut best: Option<SplitInfo> = None;
        let mut left_present = Bin::default();
        for split_bin in 1..bins.len() - 1 {
            left_present.merge(&bins[split_bin]);
            let right_present = present.subtract(&left_present);
            if left_present.counts == 0 || right_present.counts == 0 {
                continue;
            }
            for default_right in [true, false] {
                let (mut left, mut right) = (left_present, right_present);
                if default_right {
                    right.merge(&missing);
                } else {
                    left.merge(&missing);
                }
                if left.h < self.min_child_weight || right.h < self.min_child_weight {
                    continue;
                }
                let split_gain = 0.5
                    * (gain(left.g, left.h, self.lambda) + gain(right.g, right.h, self.lambda) - parent_score);
                let candidate = SplitInfo {
                    split_gain,
                    split_feature: feature,
                    split_bin: split_bin as u16,
                    split_value: cuts[split_bin],
                    default_right,
                    left_node: self.node_info(&left),
                    right_node: self.node_info(&right),
                };
                if candidate.better_than(&best) {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}
