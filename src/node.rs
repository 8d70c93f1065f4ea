use crate::splitter::{NodeInfo, SplitInfo};
use crate::utils::weight;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Left,
    Right,
}

/// A node waiting in the grower, owning the rows `start_idx..stop_idx` of
/// the tree's index.
#[derive(Debug, Clone)]
pub struct SplittableNode {
    pub num: usize,
    pub depth: usize,
    pub start_idx: usize,
    pub stop_idx: usize,
    pub gradient_sum: f64,
    pub hessian_sum: f64,
    pub counts_sum: usize,
    pub weight_value: f64,
    pub node_type: NodeType,
    pub parent_node: usize,
}

impl SplittableNode {
    #[allow(clippy::too_many_arguments)]
    pub fn from_node_info(
        num: usize,
        depth: usize,
        start_idx: usize,
        stop_idx: usize,
        node_info: &NodeInfo,
        node_type: NodeType,
        parent_node: usize,
    ) -> Self {
        SplittableNode {
            num,
            depth,
            start_idx,
            stop_idx,
            gradient_sum: node_info.grad,
            hessian_sum: node_info.hess,
            counts_sum: node_info.counts,
            weight_value: node_info.weight,
            node_type,
            parent_node,
        }
    }

    pub fn root(gradient_sum: f64, hessian_sum: f64, counts_sum: usize, lambda: f64) -> Self {
        SplittableNode {
            num: 0,
            depth: 0,
            start_idx: 0,
            stop_idx: counts_sum,
            gradient_sum,
            hessian_sum,
            counts_sum,
            weight_value: weight(gradient_sum, hessian_sum, lambda),
            node_type: NodeType::Root,
            parent_node: 0,
        }
    }

    /// Finalized tree node, a leaf until a split is applied.
    pub fn as_node(&self, eta: f64) -> Node {
        Node {
            num: self.num,
            weight_value: self.weight_value * eta,
            hessian_sum: self.hessian_sum,
            depth: self.depth,
            split_value: 0.0,
            split_feature: 0,
            split_bin: 0,
            split_gain: 0.0,
            default_right: true,
            left_child: 0,
            right_child: 0,
            is_leaf: true,
            node_type: self.node_type,
            parent_node: self.parent_node,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Node {
    pub num: usize,
    /// Output of the node, already scaled by the shrinkage.
    pub weight_value: f64,
    pub hessian_sum: f64,
    pub depth: usize,
    pub split_value: f64,
    pub split_feature: usize,
    pub split_bin: u16,
    pub split_gain: f64,
    pub default_right: bool,
    pub left_child: usize,
    pub right_child: usize,
    pub is_leaf: bool,
    pub node_type: NodeType,
    pub parent_node: usize,
}

impl Node {
    /// Turn a leaf into an internal node.
    pub fn make_parent_node(&mut self, split_info: &SplitInfo, left_child: usize, right_child: usize) {
        self.is_leaf = false;
        self.split_value = split_info.split_value;
        self.split_feature = split_info.split_feature;
        self.split_bin = split_info.split_bin;
        self.split_gain = split_info.split_gain;
        self.default_right = split_info.default_right;
        self.left_child = left_child;
        self.right_child = right_child;
    }

    pub fn missing_node(&self) -> usize {
        if self.default_right {
            self.right_child
        } else {
            self.left_child
        }
    }

    /// Get the path that should be traveled down, given a value.
    #[inline]
    pub fn get_child_idx(&self, v: Option<f64>) -> usize {
        match v {
            Some(v) if !v.is_nan() => {
                if v < self.split_value {
                    self.left_child
                } else {
                    self.right_child
                }
            }
            _ => self.missing_node(),
        }
    }

    /// Same as [`Node::get_child_idx`], for a binned training value.
    #[inline]
    pub fn get_child_idx_binned(&self, bin: u16) -> usize {
        if bin == 0 {
            self.missing_node()
        } else if bin <= self.split_bin {
            self.left_child
        } else {
            self.right_child
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_leaf {
            write!(f, "{}:leaf={},cover={}", self.num, self.weight_value, self.hessian_sum)
        } else {
            write!(
                f,
                "{}:[f{} < {}] yes={},no={},missing={},gain={},cover={}",
                self.num,
                self.split_feature,
                self.split_value,
                self.left_child,
                self.right_child,
                self.missing_node(),
                self.split_gain,
                self.hessian_sum
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> Node {
        let mut n = SplittableNode::root(-4.0, 3.0, 3, 1.0).as_node(0.5);
        let info = NodeInfo {
            grad: 0.0,
            hess: 1.0,
            counts: 1,
            weight: 0.0,
        };
        let split = SplitInfo {
            split_gain: 2.0,
            split_feature: 3,
            split_bin: 2,
            split_value: 7.5,
            default_right: false,
            left_node: info,
            right_node: info,
        };
        n.make_parent_node(&split, 1, 2);
        n
    }

    #[test]
    fn test_root_weight_scaled() {
        let n = SplittableNode::root(-4.0, 3.0, 3, 1.0).as_node(0.5);
        assert_eq!(n.weight_value, 0.5);
        assert!(n.is_leaf);
    }

    #[test]
    fn test_child_routing() {
        let n = parent();
        assert_eq!(n.get_child_idx(Some(1.0)), 1);
        assert_eq!(n.get_child_idx(Some(7.5)), 2);
        assert_eq!(n.get_child_idx(None), 1);
        assert_eq!(n.get_child_idx(Some(f64::NAN)), 1);
        assert_eq!(n.get_child_idx_binned(2), 1);
        assert_eq!(n.get_child_idx_binned(3), 2);
        assert_eq!(n.get_child_idx_binned(0), 1);
    }

    #[test]
    fn test_display() {
        let n = parent();
        assert_eq!(
            n.to_string(),
            "0:[f3 < 7.5] yes=1,no=2,missing=1,gain=2,cover=3"
        );
    }
}
