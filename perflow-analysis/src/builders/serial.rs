use parking_lot::RwLock;

use crate::builders::{RankSample, TreeBuilderStrategy};
use crate::node_key::{BuildMode, CountMode};
use crate::tree::{PerformanceTree, TreeInner};

/// The simplest model: one `RwLock<TreeInner>`, a write lock taken for
/// every insertion. Correct by construction; throughput is bounded by
/// lock contention once more than a couple of ranks insert concurrently.
pub struct SerialBuilder {
    tree: RwLock<TreeInner>,
}

impl SerialBuilder {
    pub fn new(process_count: usize, build_mode: BuildMode, count_mode: CountMode) -> Self {
        Self { tree: RwLock::new(TreeInner::new(process_count, build_mode, count_mode)) }
    }
}

impl TreeBuilderStrategy for SerialBuilder {
    fn insert(&self, sample: RankSample<'_>) {
        let mut tree = self.tree.write();
        tree.insert(sample.frames, sample.rank, sample.count, sample.time_micros);
    }

    fn finalize(self: Box<Self>) -> PerformanceTree {
        self.tree.into_inner().into_tree()
    }
}
