use std::hash::{DefaultHasher, Hash, Hasher};

use crate::config::ResolvedNode;

/// Weighted set of cache nodes.
///
/// A node with weight `w` owns a range of `w` points out of the pool's total
/// weight; a key hashes onto one point, so a node with weight 2 receives
/// roughly twice the keys of a node with weight 1. The mapping is stable for a
/// given pool.
pub struct ServerPool<T> {
    nodes: Vec<(ResolvedNode, T)>,
    /// Running sum of weights; `bounds[i]` is the end of node `i`'s range.
    bounds: Vec<u64>,
}

impl<T> Default for ServerPool<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            bounds: Vec::new(),
        }
    }
}

impl<T: Clone> Clone for ServerPool<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            bounds: self.bounds.clone(),
        }
    }
}

impl<T> ServerPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: ResolvedNode, conn: T) {
        let total = self.total_weight() + u64::from(node.weight.max(1));
        self.bounds.push(total);
        self.nodes.push((node, conn));
    }

    /// Node responsible for `key`.
    pub fn pick(&self, key: &str) -> Option<&(ResolvedNode, T)> {
        let total = self.total_weight();
        if total == 0 {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let point = hasher.finish() % total;
        let index = self.bounds.partition_point(|&end| end <= point);
        self.nodes.get(index)
    }

    fn total_weight(&self) -> u64 {
        self.bounds.last().copied().unwrap_or(0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter().map(|(node, _)| node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.bounds.clear();
    }
}
