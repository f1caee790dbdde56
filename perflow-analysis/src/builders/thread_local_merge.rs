use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::builders::{RankSample, TreeBuilderStrategy};
use crate::node_key::{BuildMode, CountMode};
use crate::tree::{PerformanceTree, TreeInner};

/// Each inserting thread gets its own private `TreeInner`, built without
/// any synchronization at all; a final structural merge (see
/// [`TreeInner::merge`]) folds every thread's tree into one. Since
/// `merge` is additive and commutative, the result is independent of
/// which thread inserted which rank or what order the merge runs in —
/// this is what makes this model converge to the same tree as the
/// others despite never taking a lock on the hot insert path.
pub struct ThreadLocalMergeBuilder {
    process_count: usize,
    build_mode: BuildMode,
    count_mode: CountMode,
    /// A brief lock only to look up or register a thread's own tree; the
    /// actual insert work happens under the per-thread inner mutex, which
    /// in practice is contended by exactly one thread.
    per_thread: Mutex<FxHashMap<ThreadId, Arc<Mutex<TreeInner>>>>,
}

impl ThreadLocalMergeBuilder {
    pub fn new(process_count: usize, build_mode: BuildMode, count_mode: CountMode) -> Self {
        Self { process_count, build_mode, count_mode, per_thread: Mutex::new(FxHashMap::default()) }
    }

    fn local_tree(&self) -> Arc<Mutex<TreeInner>> {
        let id = std::thread::current().id();
        let mut map = self.per_thread.lock();
        map.entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(TreeInner::new(self.process_count, self.build_mode, self.count_mode))))
            .clone()
    }
}

impl TreeBuilderStrategy for ThreadLocalMergeBuilder {
    fn insert(&self, sample: RankSample<'_>) {
        let local = self.local_tree();
        let mut tree = local.lock();
        tree.insert(sample.frames, sample.rank, sample.count, sample.time_micros);
    }

    fn finalize(self: Box<Self>) -> PerformanceTree {
        let per_thread = self.per_thread.into_inner();
        let mut merged = TreeInner::new(self.process_count, self.build_mode, self.count_mode);
        for (_, local) in per_thread {
            let local_tree = Arc::try_unwrap(local).map(Mutex::into_inner).unwrap_or_else(|arc| arc.lock().clone());
            merged.merge(&local_tree);
        }
        merged.into_tree()
    }
}
