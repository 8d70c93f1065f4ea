use crate::binning::BinnedData;
use crate::config::ColumnSampleMethod;
use crate::data::{row_value, JaggedMatrix, SparseMatrix};
use crate::device::DeviceDispatcher;
use crate::errors::TgbmError;
use crate::grower::Grower;
use crate::histogram::{HistogramLayout, HistogramSource, NodeHistogram};
use crate::node::{Node, NodeType, SplittableNode};
use crate::sampler::sample_columns;
use crate::splitter::Splitter;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Display};

/// Progress of a [`TreeBuilder`] through a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Initialized,
    NodeQueued,
    SplitEvaluated,
    SplitApplied,
    LeafFinalized,
    Done,
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// Shrinkage applied to every leaf.
    pub eta: f64,
    pub column_sampling_rate: f32,
    pub column_sampling_method: ColumnSampleMethod,
}

/// Read only training state shared by every tree of a run.
pub struct TrainingContext<'a> {
    pub matrix: &'a SparseMatrix,
    pub binned: &'a BinnedData,
    pub layout: &'a HistogramLayout,
    pub dispatcher: &'a DeviceDispatcher,
}

/// Grows trees level by level. Every level first evaluates all queued
/// nodes, then builds the histograms of the next level in one dispatcher
/// call, where only the smaller child of each split is built from rows and
/// its sibling is the parent minus that child.
pub struct TreeBuilder<S: Splitter> {
    splitter: S,
    params: TreeParams,
    state: BuildState,
}

impl<S: Splitter> TreeBuilder<S> {
    pub fn new(splitter: S, params: TreeParams) -> Self {
        TreeBuilder {
            splitter,
            params,
            state: BuildState::Initialized,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Fit a tree to the gradients of one output.
    ///
    /// * `ctx` - Binned training matrix and the devices.
    /// * `index` - Ascending rows the tree is trained on.
    /// * `grad` - Gradient of every training row.
    /// * `hess` - Hessian of every training row.
    /// * `rng` - Generator of this tree, used for column sampling.
    pub fn build(
        &mut self,
        ctx: &TrainingContext,
        mut index: Vec<usize>,
        grad: &[f32],
        hess: &[f32],
        rng: &mut StdRng,
    ) -> Result<Tree, TgbmError> {
        self.state = BuildState::Initialized;
        let n_rows = ctx.matrix.rows;
        let n_cols = ctx.matrix.cols;
        let eta = self.params.eta;
        let source = HistogramSource {
            matrix: ctx.matrix,
            bins: &ctx.binned.bins,
            grad,
            hess,
            layout: ctx.layout,
        };
        let tree_cols = match self.params.column_sampling_method {
            ColumnSampleMethod::ByTree => sample_columns(rng, n_cols, self.params.column_sampling_rate),
            ColumnSampleMethod::ByNode => Vec::new(),
        };

        let root_hist = ctx
            .dispatcher
            .build_histograms(&source, n_rows, &[index.as_slice()])?
            .pop()
            .ok_or_else(|| TgbmError::DeviceError(0, "no histogram returned for the root".to_string()))?;
        let root = SplittableNode::root(
            root_hist.total.g,
            root_hist.total.h,
            index.len(),
            self.splitter.get_lambda(),
        );

        let mut tree = Tree::new();
        tree.nodes.push(root.as_node(eta));
        let mut growable: VecDeque<SplittableNode> = VecDeque::new();
        growable.add_node(root);
        let mut level_hists = vec![root_hist];
        self.state = BuildState::NodeQueued;

        while !growable.is_empty() {
            let level: Vec<SplittableNode> = (0..growable.len()).filter_map(|_| growable.get_next_node()).collect();
            let mut pending: Vec<(SplittableNode, SplittableNode, NodeHistogram)> = Vec::new();

            for (node, hist) in level.into_iter().zip(std::mem::take(&mut level_hists)) {
                self.state = BuildState::SplitEvaluated;
                if node.depth >= self.params.max_depth || node.hessian_sum < self.params.min_child_weight {
                    self.state = BuildState::LeafFinalized;
                    continue;
                }
                let node_cols;
                let cols = match self.params.column_sampling_method {
                    ColumnSampleMethod::ByTree => &tree_cols,
                    ColumnSampleMethod::ByNode => {
                        node_cols = sample_columns(rng, n_cols, self.params.column_sampling_rate);
                        &node_cols
                    }
                };
                let split = match self.splitter.best_split(&hist, ctx.layout, &ctx.binned.cuts, cols) {
                    Some(s) => s,
                    None => {
                        self.state = BuildState::LeafFinalized;
                        continue;
                    }
                };

                let left_num = tree.nodes.len();
                let right_num = left_num + 1;
                tree.nodes[node.num].make_parent_node(&split, left_num, right_num);
                let split_at = node.start_idx
                    + partition_rows(
                        &mut index[node.start_idx..node.stop_idx],
                        ctx.matrix,
                        ctx.binned,
                        &tree.nodes[node.num],
                    );
                let left = SplittableNode::from_node_info(
                    left_num,
                    node.depth + 1,
                    node.start_idx,
                    split_at,
                    &split.left_node,
                    NodeType::Left,
                    node.num,
                );
                let right = SplittableNode::from_node_info(
                    right_num,
                    node.depth + 1,
                    split_at,
                    node.stop_idx,
                    &split.right_node,
                    NodeType::Right,
                    node.num,
                );
                tree.nodes.push(left.as_node(eta));
                tree.nodes.push(right.as_node(eta));
                self.state = BuildState::SplitApplied;

                // Children at the depth limit are final, no histogram needed.
                if node.depth + 1 < self.params.max_depth {
                    pending.push((left, right, hist));
                }
            }

            if pending.is_empty() {
                break;
            }
            let tasks: Vec<&[usize]> = pending
                .iter()
                .map(|(l, r, _)| {
                    let small = if l.counts_sum <= r.counts_sum { l } else { r };
                    &index[small.start_idx..small.stop_idx]
                })
                .collect();
            let built = ctx.dispatcher.build_histograms(&source, n_rows, &tasks)?;
            for ((left, right, parent), small_hist) in pending.into_iter().zip(built) {
                let sibling = NodeHistogram::from_parent_child(&parent, &small_hist);
                let (left_hist, right_hist) = if left.counts_sum <= right.counts_sum {
                    (small_hist, sibling)
                } else {
                    (sibling, small_hist)
                };
                growable.add_node(left);
                level_hists.push(left_hist);
                growable.add_node(right);
                level_hists.push(right_hist);
                self.state = BuildState::NodeQueued;
            }
        }

        tree.depth = tree.nodes.iter().map(|n| n.depth).max().unwrap_or(0);
        tree.n_leaves = tree.nodes.iter().filter(|n| n.is_leaf).count();
        self.state = BuildState::Done;
        Ok(tree)
    }
}

/// Stable partition of a node's rows, rows going left first. Returns the
/// number of rows sent left.
fn partition_rows(rows: &mut [usize], matrix: &SparseMatrix, binned: &BinnedData, node: &Node) -> usize {
    let (left, right): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .copied()
        .partition(|r| node.get_child_idx_binned(binned.bin_of(matrix, *r, node.split_feature)) == node.left_child);
    let n_left = left.len();
    rows[..n_left].copy_from_slice(&left);
    rows[n_left..].copy_from_slice(&right);
    n_left
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Tree {
    /// Node `i` is stored at position `i`, the root first.
    pub nodes: Vec<Node>,
    pub depth: usize,
    pub n_leaves: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: Vec::new(),
            depth: 0,
            n_leaves: 0,
        }
    }

    /// Leaf weight reached by a sparse row, given its sorted indices.
    pub fn predict_row(&self, indices: &[u32], values: &[f64]) -> f64 {
        let mut node_idx = 0;
        loop {
            let node = &self.nodes[node_idx];
            if node.is_leaf {
                return node.weight_value;
            }
            node_idx = node.get_child_idx(row_value(indices, values, node.split_feature));
        }
    }

    /// Leaf weight reached by a training row, routed by its bins.
    pub fn predict_row_binned(&self, matrix: &SparseMatrix, binned: &BinnedData, row: usize) -> f64 {
        let mut node_idx = 0;
        loop {
            let node = &self.nodes[node_idx];
            if node.is_leaf {
                return node.weight_value;
            }
            node_idx = node.get_child_idx_binned(binned.bin_of(matrix, row, node.split_feature));
        }
    }

    fn predict_single_threaded(&self, matrix: &SparseMatrix) -> Vec<f64> {
        (0..matrix.rows)
            .map(|i| {
                let (indices, values) = matrix.row(i);
                self.predict_row(indices, values)
            })
            .collect()
    }

    fn predict_parallel(&self, matrix: &SparseMatrix) -> Vec<f64> {
        (0..matrix.rows)
            .into_par_iter()
            .map(|i| {
                let (indices, values) = matrix.row(i);
                self.predict_row(indices, values)
            })
            .collect()
    }

    pub fn predict(&self, matrix: &SparseMatrix, parallel: bool) -> Vec<f64> {
        if parallel {
            self.predict_parallel(matrix)
        } else {
            self.predict_single_threaded(matrix)
        }
    }

    /// Check the structure of a tree read from a model file.
    ///
    /// * `n_features` - Number of features the model was trained on.
    /// * `cuts` - Cut points of every feature.
    /// * `max_num_bin` - Largest bin a split may use.
    pub fn validate(&self, n_features: usize, cuts: &JaggedMatrix<f64>, max_num_bin: u16) -> Result<(), TgbmError> {
        if self.nodes.is_empty() {
            return Err(TgbmError::CorruptModel("tree without nodes".to_string()));
        }
        let n_nodes = self.nodes.len();
        let mut referenced = vec![false; n_nodes];
        for (i, node) in self.nodes.iter().enumerate() {
            if node.num != i {
                return Err(TgbmError::CorruptModel(format!(
                    "node stored at {} is numbered {}",
                    i, node.num
                )));
            }
            if !node.weight_value.is_finite() {
                return Err(TgbmError::CorruptModel(format!("node {} has a non-finite weight", i)));
            }
            if node.is_leaf {
                continue;
            }
            for child in [node.left_child, node.right_child] {
                if child <= i || child >= n_nodes {
                    return Err(TgbmError::CorruptModel(format!(
                        "node {} references child {} out of bounds",
                        i, child
                    )));
                }
                if referenced[child] {
                    return Err(TgbmError::CorruptModel(format!("node {} has more than one parent", child)));
                }
                referenced[child] = true;
            }
            if node.split_feature >= n_features || node.split_feature >= cuts.cols {
                return Err(TgbmError::CorruptModel(format!(
                    "node {} splits on feature {} of {}",
                    i, node.split_feature, n_features
                )));
            }
            let feature_cuts = cuts.get_col(node.split_feature);
            let bin = usize::from(node.split_bin);
            if bin == 0 || bin + 1 >= feature_cuts.len() || node.split_bin > max_num_bin {
                return Err(TgbmError::CorruptModel(format!(
                    "node {} splits on bin {} outside the bins of feature {}",
                    i, node.split_bin, node.split_feature
                )));
            }
            if feature_cuts[bin] != node.split_value {
                return Err(TgbmError::CorruptModel(format!(
                    "node {} split value {} does not match cut {}",
                    i, node.split_value, feature_cuts[bin]
                )));
            }
        }
        if let Some(orphan) = referenced.iter().skip(1).position(|r| !r) {
            return Err(TgbmError::CorruptModel(format!("node {} is unreachable", orphan + 1)));
        }
        Ok(())
    }

    fn calc_feature_node_stats<F>(&self, calc_stat: &F, node: &Node, stats: &mut HashMap<usize, (f64, usize)>)
    where
        F: Fn(&Node) -> f64,
    {
        if node.is_leaf {
            return;
        }
        stats
            .entry(node.split_feature)
            .and_modify(|(v, c)| {
                *v += calc_stat(node);
                *c += 1;
            })
            .or_insert((calc_stat(node), 1));
        self.calc_feature_node_stats(calc_stat, &self.nodes[node.left_child], stats);
        self.calc_feature_node_stats(calc_stat, &self.nodes[node.right_child], stats);
    }

    fn get_node_stats<F>(&self, calc_stat: &F, stats: &mut HashMap<usize, (f64, usize)>)
    where
        F: Fn(&Node) -> f64,
    {
        if let Some(root) = self.nodes.first() {
            self.calc_feature_node_stats(calc_stat, root, stats);
        }
    }

    pub fn calculate_importance_weight(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        self.get_node_stats(&|_: &Node| 1., stats);
    }

    pub fn calculate_importance_gain(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        self.get_node_stats(&|n: &Node| n.split_gain, stats);
    }

    pub fn calculate_importance_cover(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        self.get_node_stats(&|n: &Node| n.hessian_sum, stats);
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut print_buffer: Vec<usize> = if self.nodes.is_empty() { Vec::new() } else { vec![0] };
        let mut r = String::new();
        while let Some(idx) = print_buffer.pop() {
            let node = &self.nodes[idx];
            r += format!("{}{}\n", "\t".repeat(node.depth).as_str(), node).as_str();
            if !node.is_leaf {
                print_buffer.push(node.right_child);
                print_buffer.push(node.left_child);
            }
        }
        write!(f, "{}", r)
    }
}
