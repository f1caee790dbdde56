use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::builders::{RankSample, TreeBuilderStrategy};
use crate::node_key::{BuildMode, CountMode, NodeKey};
use crate::tree::{NodeData, PerformanceTree, TreeInner, ROOT_INDEX};

/// Structural state for one node: its children and the call-count edge
/// weights. The only thing ever behind a lock in this model — per-rank
/// counters are lock-free atomics read and written directly.
struct Structure {
    parent: Option<usize>,
    children: Vec<usize>,
    children_by_key: FxHashMap<NodeKey, usize>,
    call_counts: FxHashMap<usize, u64>,
}

struct AtomicNode {
    key: NodeKey,
    sampling_counts: Vec<AtomicU64>,
    self_samples: Vec<AtomicU64>,
    execution_times_bits: Vec<AtomicU64>,
}

impl AtomicNode {
    fn new(key: NodeKey, process_count: usize) -> Self {
        Self {
            key,
            sampling_counts: (0..process_count).map(|_| AtomicU64::new(0)).collect(),
            self_samples: (0..process_count).map(|_| AtomicU64::new(0)).collect(),
            execution_times_bits: (0..process_count).map(|_| AtomicU64::new(0.0f64.to_bits())).collect(),
        }
    }

    fn add_time(&self, rank: usize, delta: f64) {
        self.execution_times_bits[rank]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| Some((f64::from_bits(bits) + delta).to_bits()))
            .expect("update closure always returns Some");
    }
}

/// Per-rank counters are plain atomics, touched with no lock at all. Only
/// structural changes — registering a brand-new child, or bumping a
/// parent→child call count — take the node-local structural mutex. A
/// final `consolidate` step (called by [`Self::finalize`]) drains every
/// atomic into a plain [`TreeInner`]; querying before that point isn't
/// exposed by this type at all, so the read-before-consolidate misuse
/// this model could otherwise allow is ruled out at the type level.
pub struct LockFreeBuilder {
    nodes: boxcar::Vec<AtomicNode>,
    structures: boxcar_fallback::Structures,
    process_count: usize,
    build_mode: BuildMode,
    count_mode: CountMode,
}

/// `boxcar` isn't in the dependency stack; an append-only arena with the
/// same "stable index, lock-free push" shape is built directly on
/// `parking_lot::RwLock<Vec<_>>`, matching how `FineGrainedBuilder`
/// grows its own arena.
mod boxcar_fallback {
    use super::*;

    pub struct Structures(pub Mutex<Vec<Mutex<Structure>>>);

    impl Structures {
        pub fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
    }
}

mod boxcar {
    use parking_lot::RwLock;

    pub struct Vec<T> {
        inner: RwLock<std::vec::Vec<T>>,
    }

    impl<T> Vec<T> {
        pub fn new() -> Self {
            Self { inner: RwLock::new(std::vec::Vec::new()) }
        }

        pub fn push(&self, value: T) -> usize {
            let mut guard = self.inner.write();
            let idx = guard.len();
            guard.push(value);
            idx
        }

        pub fn len(&self) -> usize {
            self.inner.read().len()
        }

        pub fn with<R>(&self, idx: usize, f: impl FnOnce(&T) -> R) -> R {
            let guard = self.inner.read();
            f(&guard[idx])
        }

        pub fn into_inner(self) -> std::vec::Vec<T> {
            self.inner.into_inner()
        }
    }
}

impl LockFreeBuilder {
    pub fn new(process_count: usize, build_mode: BuildMode, count_mode: CountMode) -> Self {
        let nodes = boxcar::Vec::new();
        nodes.push(AtomicNode::new(NodeKey::Root, process_count));
        let structures = boxcar_fallback::Structures::new();
        structures.0.lock().push(Mutex::new(Structure {
            parent: None,
            children: Vec::new(),
            children_by_key: FxHashMap::default(),
            call_counts: FxHashMap::default(),
        }));
        Self { nodes, structures, process_count, build_mode, count_mode }
    }

    fn find_or_create_child(&self, parent_idx: usize, key: NodeKey) -> usize {
        let structures = self.structures.0.lock();
        {
            let parent = structures[parent_idx].lock();
            if let Some(&idx) = parent.children_by_key.get(&key) {
                return idx;
            }
        }
        drop(structures);

        // Re-check after re-acquiring in case another thread created it
        // between our read and now; only one thread wins the push.
        let mut structures = self.structures.0.lock();
        if let Some(&idx) = structures[parent_idx].lock().children_by_key.get(&key) {
            return idx;
        }
        let new_idx = self.nodes.push(AtomicNode::new(key.clone(), self.process_count));
        structures.push(Mutex::new(Structure {
            parent: Some(parent_idx),
            children: Vec::new(),
            children_by_key: FxHashMap::default(),
            call_counts: FxHashMap::default(),
        }));
        let mut parent = structures[parent_idx].lock();
        parent.children.push(new_idx);
        parent.children_by_key.insert(key, new_idx);
        new_idx
    }

    fn bump_call_count(&self, parent_idx: usize, child_idx: usize) {
        let structures = self.structures.0.lock();
        let mut parent = structures[parent_idx].lock();
        *parent.call_counts.entry(child_idx).or_insert(0) += 1;
    }
}

impl TreeBuilderStrategy for LockFreeBuilder {
    fn insert(&self, sample: RankSample<'_>) {
        let RankSample { rank, frames, count, time_micros } = sample;
        let mut current = ROOT_INDEX;

        if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
            self.nodes.with(ROOT_INDEX, |n| n.sampling_counts[rank].fetch_add(count, Ordering::Relaxed));
        }

        for frame in frames {
            let key = NodeKey::frame(self.build_mode, frame.node_function_name(), frame.library_path.clone(), frame.offset_within_library);
            let child_idx = self.find_or_create_child(current, key);
            self.bump_call_count(current, child_idx);

            if matches!(self.count_mode, CountMode::Inclusive | CountMode::Both) {
                self.nodes.with(child_idx, |n| {
                    n.sampling_counts[rank].fetch_add(count, Ordering::Relaxed);
                    n.add_time(rank, time_micros);
                });
            }
            current = child_idx;
        }

        if matches!(self.count_mode, CountMode::Exclusive | CountMode::Both) {
            self.nodes.with(current, |n| {
                n.self_samples[rank].fetch_add(count, Ordering::Relaxed);
                if self.count_mode == CountMode::Exclusive {
                    n.sampling_counts[rank].fetch_add(count, Ordering::Relaxed);
                }
            });
        }
    }

    fn finalize(self: Box<Self>) -> PerformanceTree {
        let nodes = self.nodes.into_inner();
        let structures = self.structures.0.into_inner();

        let mut inner = TreeInner::new(self.process_count, self.build_mode, self.count_mode);
        inner.nodes.clear();

        for (node, structure_mutex) in nodes.into_iter().zip(structures.into_iter()) {
            let structure = structure_mutex.into_inner();
            let mut data = NodeData::new(node.key, structure.parent, self.process_count);
            data.sampling_counts = node.sampling_counts.into_iter().map(|a| a.into_inner()).collect();
            data.self_samples = node.self_samples.into_iter().map(|a| a.into_inner()).collect();
            data.execution_times = node.execution_times_bits.into_iter().map(|a| f64::from_bits(a.into_inner())).collect();
            data.children = structure.children;
            data.children_by_key = structure.children_by_key;
            data.call_counts = structure.call_counts;
            inner.nodes.push(data);
        }

        inner.into_tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolved_frame::ResolvedFrame;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame::without_symbols(0, StdArc::from("/app"), 0).with_symbol(&perflow_symbols::SymbolInfo::function_only(StdArc::from(name)))
    }

    #[test]
    fn concurrent_inserts_converge_to_correct_totals() {
        let builder = StdArc::new(LockFreeBuilder::new(8, BuildMode::ContextFree, CountMode::Both));
        let frames = StdArc::new(vec![frame("hot"), frame("hotter")]);

        let mut handles = Vec::new();
        for rank in 0..8 {
            let builder = builder.clone();
            let frames = frames.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    builder.insert(RankSample { rank, frames: &frames, count: 1, time_micros: 1.5 });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let builder = StdArc::try_unwrap(builder).unwrap_or_else(|_| panic!("threads not joined"));
        let tree = Box::new(builder).finalize();
        assert_eq!(tree.total_samples(), 1600);
        assert_eq!(tree.node_count(), 3);
    }
}
