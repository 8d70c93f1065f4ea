use crate::node::SplittableNode;
use std::collections::VecDeque;

/// Trait for handling the growth of the tree.
pub trait Grower {
    /// Add a node to the grower.
    fn add_node(&mut self, node: SplittableNode);
    /// Get the next node to split.
    fn get_next_node(&mut self) -> Option<SplittableNode>;
    /// Check if the grower is empty.
    fn is_empty(&self) -> bool;
    /// Number of queued nodes.
    fn len(&self) -> usize;
}

// First in, first out, so nodes come back level by level.
impl Grower for VecDeque<SplittableNode> {
    fn add_node(&mut self, node: SplittableNode) {
        self.push_front(node);
    }

    fn get_next_node(&mut self) -> Option<SplittableNode> {
        self.pop_back()
    }

    fn is_empty(&self) -> bool {
        VecDeque::is_empty(self)
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}
