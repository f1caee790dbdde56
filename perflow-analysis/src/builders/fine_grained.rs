use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::builders::{RankSample, TreeBuilderStrategy};
use crate::node_key::{BuildMode, CountMode, NodeKey};
use crate::resolved_frame::ResolvedFrame;
use crate::tree::{PerformanceTree, TreeInner, ROOT_INDEX};

struct Node {
    parent: Option<usize>,
    children: FxHashMap<NodeKey, usize>,
    call_counts: FxHashMap<usize, u64>,
    sampling_counts: Vec<u64>,
    self_samples: Vec<u64>,
    execution_times: Vec<f64>,
}

impl Node {
    fn new(parent: Option<usize>, process_count: usize) -> Self {
        Self {
            parent,
            children: FxHashMap::default(),
            call_counts: FxHashMap::default(),
            sampling_counts: vec![0; process_count],
            self_samples: vec![0; process_count],
            execution_times: vec![0.0; process_count],
        }
    }
}

/// An append-only arena where each node's counters and child map are
/// guarded by their own `Mutex`. Traversal always acquires locks
/// root-to-leaf and releases a node's lock before acquiring its child's,
/// so no thread ever holds two locks at once — that ordering, plus never
/// locking a descendant while holding an ancestor's lock, rules out
/// deadlock between concurrent inserters.
pub struct FineGrainedBuilder {
    nodes: RwLock<Vec<Arc<Mutex<Node>>>>,
    process_count: usize,
    build_mode: BuildMode,
    count_mode: CountMode,
    keys: RwLock<Vec<NodeKey>>,
}

impl FineGrainedBuilder {
    pub fn new(process_count: usize, build_mode: BuildMode, count_mode: CountMode) -> Self {
        let root = Arc::new(Mutex::new(Node::new(None, process_count)));
        Self {
            nodes: RwLock::new(vec![root]),
            process_count,
            build_mode,
            count_mode,
            keys: RwLock::new(vec![NodeKey::Root]),
        }
    }

    fn node_at(&self, idx: usize) -> Arc<Mutex<Node>> {
        self.nodes.read()[idx].clone()
    }

    /// Finds `key` among `parent_idx`'s children, or appends a new node and
    /// registers it as a child. The parent's own lock is held for the
    /// duration (it owns the child map being mutated); the global arena's
    /// write lock is taken only for the brief append, never nested inside
    /// another node's lock.
    fn find_or_create_child(&self, parent_idx: usize, key: NodeKey) -> usize {
        let parent_arc = self.node_at(parent_idx);
        let mut parent = parent_arc.lock();
        if let Some(&idx) = parent.children.get(&key) {
            return idx;
        }

        let new_idx = {
            let mut nodes = self.nodes.write();
            let mut keys = self.keys.write();
            let idx = nodes.len();
            nodes.push(Arc::new(Mutex::new(Node::new(Some(parent_idx), self.process_count))));
            keys.push(key.clone());
            idx
        };
        parent.children.insert(key, new_idx);
        new_idx
    }
}

impl TreeBuilderStrategy for FineGrainedBuilder {
    fn insert(&self, sample: RankSample<'_>) {
        let RankSample { rank, frames, count, time_micros } = sample;
        let mut current = ROOT_INDEX;

        if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
            self.node_at(ROOT_INDEX).lock().sampling_counts[rank] += count;
        }

        for frame in frames {
            let key = NodeKey::frame(self.build_mode, frame.node_function_name(), frame.library_path.clone(), frame.offset_within_library);
            let child_idx = self.find_or_create_child(current, key);

            {
                let parent_arc = self.node_at(current);
                let mut parent = parent_arc.lock();
                *parent.call_counts.entry(child_idx).or_insert(0) += 1;
            }

            if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
                let child_arc = self.node_at(child_idx);
                let mut child = child_arc.lock();
                child.sampling_counts[rank] += count;
                child.execution_times[rank] += time_micros;
            }
            current = child_idx;
        }

        if matches!(self.count_mode, CountMode::Exclusive | CountMode::Both) {
            let leaf_arc = self.node_at(current);
            let mut leaf = leaf_arc.lock();
            leaf.self_samples[rank] += count;
            if self.count_mode == CountMode::Exclusive {
                leaf.sampling_counts[rank] += count;
            }
        }
    }

    fn finalize(self: Box<Self>) -> PerformanceTree {
        let nodes = self.nodes.into_inner();
        let keys = self.keys.into_inner();
        let mut inner = TreeInner::new(self.process_count, self.build_mode, self.count_mode);
        inner.nodes.clear();

        for (idx, node_arc) in nodes.into_iter().enumerate() {
            let node = match Arc::try_unwrap(node_arc) {
                Ok(mutex) => mutex.into_inner(),
                Err(arc) => {
                    let guard = arc.lock();
                    Node {
                        parent: guard.parent,
                        children: guard.children.clone(),
                        call_counts: guard.call_counts.clone(),
                        sampling_counts: guard.sampling_counts.clone(),
                        self_samples: guard.self_samples.clone(),
                        execution_times: guard.execution_times.clone(),
                    }
                }
            };

            let mut data = crate::tree::NodeData::new(keys[idx].clone(), node.parent, self.process_count);
            data.sampling_counts = node.sampling_counts;
            data.self_samples = node.self_samples;
            data.execution_times = node.execution_times;
            data.call_counts = node.call_counts;
            data.children = {
                let mut children: Vec<usize> = node.children.values().copied().collect();
                children.sort_unstable();
                children
            };
            data.children_by_key = node.children;
            inner.nodes.push(data);
        }

        inner.into_tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TreeBuilderStrategy;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame::without_symbols(0, StdArc::from(name), 0).with_symbol(&perflow_symbols::SymbolInfo::function_only(StdArc::from(name)))
    }

    #[test]
    fn concurrent_inserts_from_many_threads_sum_correctly() {
        let builder = StdArc::new(FineGrainedBuilder::new(4, BuildMode::ContextFree, CountMode::Both));
        let frames = StdArc::new(vec![frame("a"), frame("b")]);

        let mut handles = Vec::new();
        for rank in 0..4 {
            let builder = builder.clone();
            let frames = frames.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    builder.insert(RankSample { rank, frames: &frames, count: 1, time_micros: 0.0 });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let builder = StdArc::try_unwrap(builder).unwrap_or_else(|_| panic!("threads not joined"));
        let tree = Box::new(builder).finalize();
        assert_eq!(tree.total_samples(), 400);
        assert_eq!(tree.node_count(), 3);
    }
}
