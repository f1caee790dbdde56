//! The core insertion algorithm and the immutable, queryable tree it
//! produces. Shared by every concurrency model in [`crate::builders`]:
//! each model differs only in how it synchronizes mutation of this same
//! node shape, and all of them converge on a [`PerformanceTree`] once
//! building finishes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::node_key::{BuildMode, CountMode, NodeKey};
use crate::resolved_frame::ResolvedFrame;

pub const ROOT_INDEX: usize = 0;

/// One vertex's mutable state during tree construction. Kept as plain,
/// unsynchronized fields; the synchronization strategy lives one layer up,
/// in whichever `builders::*` type owns an arena of these.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub key: NodeKey,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub children_by_key: FxHashMap<NodeKey, usize>,
    /// Edge weight: how many insertions traversed parent → this child.
    pub call_counts: FxHashMap<usize, u64>,
    pub sampling_counts: Vec<u64>,
    pub self_samples: Vec<u64>,
    pub execution_times: Vec<f64>,
}

impl NodeData {
    pub fn new(key: NodeKey, parent: Option<usize>, process_count: usize) -> Self {
        Self {
            key,
            parent,
            children: Vec::new(),
            children_by_key: FxHashMap::default(),
            call_counts: FxHashMap::default(),
            sampling_counts: vec![0; process_count],
            self_samples: vec![0; process_count],
            execution_times: vec![0.0; process_count],
        }
    }
}

/// The plain (unsynchronized) tree used as the common mutation target for
/// every concurrency model's serial fast path, and as the shape every
/// model ultimately produces.
#[derive(Debug, Clone)]
pub struct TreeInner {
    pub nodes: Vec<NodeData>,
    pub process_count: usize,
    pub build_mode: BuildMode,
    pub count_mode: CountMode,
}

impl TreeInner {
    pub fn new(process_count: usize, build_mode: BuildMode, count_mode: CountMode) -> Self {
        Self { nodes: vec![NodeData::new(NodeKey::Root, None, process_count)], process_count, build_mode, count_mode }
    }

    fn find_or_create_child(&mut self, parent_idx: usize, key: NodeKey) -> usize {
        if let Some(&idx) = self.nodes[parent_idx].children_by_key.get(&key) {
            return idx;
        }
        let new_idx = self.nodes.len();
        self.nodes.push(NodeData::new(key.clone(), Some(parent_idx), self.process_count));
        let parent = &mut self.nodes[parent_idx];
        parent.children.push(new_idx);
        parent.children_by_key.insert(key, new_idx);
        new_idx
    }

    /// The `insert(frames, process_rank, count, time)` algorithm: walks
    /// `frames` root-first, creating nodes as needed, and attributes
    /// `count`/`time` per the tree's `count_mode`.
    pub fn insert(&mut self, frames: &[ResolvedFrame], rank: usize, count: u64, time_micros: f64) {
        let mut current = ROOT_INDEX;
        if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
            self.nodes[ROOT_INDEX].sampling_counts[rank] += count;
        }

        for frame in frames {
            let key = NodeKey::frame(
                self.build_mode,
                frame.node_function_name(),
                frame.library_path.clone(),
                frame.offset_within_library,
            );
            let child = self.find_or_create_child(current, key);
            *self.nodes[current].call_counts.entry(child).or_insert(0) += 1;

            if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
                self.nodes[child].sampling_counts[rank] += count;
                self.nodes[child].execution_times[rank] += time_micros;
            }
            current = child;
        }

        if matches!(self.count_mode, CountMode::Exclusive | CountMode::Both) {
            self.nodes[current].self_samples[rank] += count;
            if self.count_mode == CountMode::Exclusive {
                self.nodes[current].sampling_counts[rank] += count;
            }
        }
    }

    /// Recursive structural union used by the thread-local-merge model:
    /// folds `other` into `self`, matching nodes by key under the same
    /// parent and summing counters additively.
    pub fn merge(&mut self, other: &TreeInner) {
        self.merge_subtree(ROOT_INDEX, other, ROOT_INDEX);
    }

    fn merge_subtree(&mut self, dst_idx: usize, other: &TreeInner, src_idx: usize) {
        let src = &other.nodes[src_idx];
        for (rank, &count) in src.sampling_counts.iter().enumerate() {
            self.nodes[dst_idx].sampling_counts[rank] += count;
        }
        for (rank, &count) in src.self_samples.iter().enumerate() {
            self.nodes[dst_idx].self_samples[rank] += count;
        }
        for (rank, &time) in src.execution_times.iter().enumerate() {
            self.nodes[dst_idx].execution_times[rank] += time;
        }

        for &src_child_idx in &src.children {
            let child_key = other.nodes[src_child_idx].key.clone();
            let dst_child_idx = self.find_or_create_child(dst_idx, child_key);
            let edge_count = *src.call_counts.get(&src_child_idx).unwrap_or(&0);
            *self.nodes[dst_idx].call_counts.entry(dst_child_idx).or_insert(0) += edge_count;
            self.merge_subtree(dst_child_idx, other, src_child_idx);
        }
    }

    pub fn into_tree(self) -> PerformanceTree {
        PerformanceTree { inner: self }
    }
}

/// The finished, immutable tree every concurrency model converges on.
/// Safe to query and share across threads (plain `&self` methods, no
/// interior mutability).
#[derive(Debug, Clone)]
pub struct PerformanceTree {
    inner: TreeInner,
}

impl PerformanceTree {
    pub fn build_mode(&self) -> BuildMode {
        self.inner.build_mode
    }

    pub fn count_mode(&self) -> CountMode {
        self.inner.count_mode
    }

    pub fn process_count(&self) -> usize {
        self.inner.process_count
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn total_samples(&self) -> u64 {
        self.node(ROOT_INDEX).sampling_counts().iter().sum()
    }

    pub fn max_depth(&self) -> usize {
        self.inner.nodes.iter().enumerate().map(|(i, _)| self.depth_of(i)).max().unwrap_or(0)
    }

    fn depth_of(&self, idx: usize) -> usize {
        let mut depth = 0;
        let mut current = idx;
        while let Some(parent) = self.inner.nodes[current].parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.node(ROOT_INDEX)
    }

    pub fn node(&self, idx: usize) -> NodeRef<'_> {
        NodeRef { tree: self, idx }
    }

    pub fn all_nodes(&self) -> Vec<NodeRef<'_>> {
        (0..self.inner.nodes.len()).map(|i| self.node(i)).collect()
    }

    pub fn leaf_nodes(&self) -> Vec<NodeRef<'_>> {
        self.all_nodes().into_iter().filter(|n| n.is_leaf()).collect()
    }

    pub fn nodes_at_depth(&self, depth: usize) -> Vec<NodeRef<'_>> {
        self.all_nodes().into_iter().filter(|n| n.depth() == depth).collect()
    }

    pub fn find_nodes_by_name(&self, name: &str) -> Vec<NodeRef<'_>> {
        self.all_nodes().into_iter().filter(|n| n.key().function_name() == Some(name)).collect()
    }

    pub fn filter_by_samples(&self, min: u64) -> Vec<NodeRef<'_>> {
        self.all_nodes().into_iter().filter(|n| n.total_samples() >= min).collect()
    }

    pub fn traverse_preorder(&self, mut visitor: impl FnMut(NodeRef<'_>)) {
        self.preorder_from(ROOT_INDEX, &mut visitor);
    }

    fn preorder_from(&self, idx: usize, visitor: &mut impl FnMut(NodeRef<'_>)) {
        visitor(self.node(idx));
        for &child in &self.inner.nodes[idx].children {
            self.preorder_from(child, visitor);
        }
    }

    pub fn traverse_levelorder(&self, mut visitor: impl FnMut(NodeRef<'_>)) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(ROOT_INDEX);
        while let Some(idx) = queue.pop_front() {
            visitor(self.node(idx));
            queue.extend(self.inner.nodes[idx].children.iter().copied());
        }
    }
}

/// A borrowed view of one `TreeNode`, bounded by the tree's lifetime.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a PerformanceTree,
    idx: usize,
}

impl<'a> NodeRef<'a> {
    fn data(&self) -> &'a NodeData {
        &self.tree.inner.nodes[self.idx]
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn key(&self) -> &'a NodeKey {
        &self.data().key
    }

    pub fn function_name(&self) -> Option<&'a str> {
        self.key().function_name()
    }

    pub fn library_path(&self) -> Option<&'a str> {
        self.key().library_path()
    }

    pub fn sampling_counts(&self) -> &'a [u64] {
        &self.data().sampling_counts
    }

    pub fn self_samples(&self) -> &'a [u64] {
        &self.data().self_samples
    }

    pub fn execution_times(&self) -> &'a [f64] {
        &self.data().execution_times
    }

    pub fn total_samples(&self) -> u64 {
        self.sampling_counts().iter().sum()
    }

    pub fn self_samples_total(&self) -> u64 {
        self.self_samples().iter().sum()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth_of(self.idx)
    }

    pub fn is_root(&self) -> bool {
        self.data().parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.data().children.is_empty()
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.data().parent.map(|p| self.tree.node(p))
    }

    pub fn children(&self) -> Vec<NodeRef<'a>> {
        self.data().children.iter().map(|&c| self.tree.node(c)).collect()
    }

    pub fn siblings(&self) -> Vec<NodeRef<'a>> {
        match self.parent() {
            Some(parent) => parent.children().into_iter().filter(|n| n.idx != self.idx).collect(),
            None => Vec::new(),
        }
    }

    pub fn call_count_to(&self, child: &NodeRef<'_>) -> u64 {
        *self.data().call_counts.get(&child.idx).unwrap_or(&0)
    }

    pub fn find_child_by_name(&self, name: &str) -> Option<NodeRef<'a>> {
        self.children().into_iter().find(|c| c.function_name() == Some(name))
    }

    /// Function names from root to this node, excluding the synthetic
    /// root itself.
    pub fn get_path(&self) -> Vec<Arc<str>> {
        let mut path = Vec::new();
        let mut current = *self;
        loop {
            if let NodeKey::Frame { function_name, .. } = current.key() {
                path.push(function_name.clone());
            }
            match current.parent() {
                Some(p) => current = p,
                None => break,
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, lib: &str, offset: u64) -> ResolvedFrame {
        ResolvedFrame { raw_address: offset, library_path: Arc::from(lib), offset_within_library: offset, function_name: Some(Arc::from(name)), source_file: None, line_number: None }
    }

    #[test]
    fn single_stack_exclusive_mode_matches_scenario_s2() {
        let mut tree = TreeInner::new(1, BuildMode::ContextFree, CountMode::Exclusive);
        let frames = vec![frame("a", "/app", 0x0), frame("b", "/app", 0x1000), frame("c", "/app", 0x2000)];
        for _ in 0..4 {
            tree.insert(&frames, 0, 1, 1.0);
        }
        let tree = tree.into_tree();
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.total_samples(), 4);
        let leaf = tree.find_nodes_by_name("c").remove(0);
        assert_eq!(leaf.self_samples_total(), 4);
        let root = tree.find_nodes_by_name("a").remove(0);
        assert_eq!(root.self_samples_total(), 0);
    }

    #[test]
    fn context_free_merges_call_sites_context_aware_splits() {
        let stack_a = vec![frame("outer", "/app", 0x0), frame("shared", "/app", 0x100)];
        let stack_b = vec![frame("outer", "/app", 0x0), frame("shared", "/app", 0x200)];

        let mut free_tree = TreeInner::new(1, BuildMode::ContextFree, CountMode::Inclusive);
        free_tree.insert(&stack_a, 0, 1, 0.0);
        free_tree.insert(&stack_b, 0, 1, 0.0);
        assert_eq!(free_tree.into_tree().node_count(), 3); // root, outer, shared

        let mut aware_tree = TreeInner::new(1, BuildMode::ContextAware, CountMode::Inclusive);
        aware_tree.insert(&stack_a, 0, 1, 0.0);
        aware_tree.insert(&stack_b, 0, 1, 0.0);
        assert_eq!(aware_tree.into_tree().node_count(), 4); // root, outer, shared@0x100, shared@0x200
    }

    #[test]
    fn merge_is_additive_and_order_independent() {
        let frames = vec![frame("f", "/app", 0x0)];
        let mut a = TreeInner::new(1, BuildMode::ContextFree, CountMode::Both);
        a.insert(&frames, 0, 3, 0.0);
        let mut b = TreeInner::new(1, BuildMode::ContextFree, CountMode::Both);
        b.insert(&frames, 0, 5, 0.0);

        let mut merged = TreeInner::new(1, BuildMode::ContextFree, CountMode::Both);
        merged.merge(&a);
        merged.merge(&b);
        assert_eq!(merged.into_tree().total_samples(), 8);
    }

    #[test]
    fn empty_run_has_only_root() {
        let tree = TreeInner::new(1, BuildMode::ContextFree, CountMode::Both).into_tree();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.total_samples(), 0);
    }
}
