//! Four interchangeable strategies for building a [`crate::tree::PerformanceTree`]
//! concurrently across ranks. All four insert the same frames through
//! [`crate::tree::TreeInner::insert`] and must converge on semantically
//! identical trees (same node set, same counters) regardless of the order
//! ranks happen to finish in; they differ only in how they synchronize
//! access to the shared structure while that's happening.

mod fine_grained;
mod lock_free;
mod serial;
mod thread_local_merge;

pub use fine_grained::FineGrainedBuilder;
pub use lock_free::LockFreeBuilder;
pub use serial::SerialBuilder;
pub use thread_local_merge::ThreadLocalMergeBuilder;

use crate::node_key::{BuildMode, CountMode};
use crate::resolved_frame::ResolvedFrame;
use crate::tree::PerformanceTree;

/// One rank's worth of work handed to a builder: its frames for every
/// captured stack, with the repeat count and the cumulative time spent
/// there.
pub struct RankSample<'a> {
    pub rank: usize,
    pub frames: &'a [ResolvedFrame],
    pub count: u64,
    pub time_micros: f64,
}

/// Implemented by each concurrency model. `insert` may be called from any
/// number of threads concurrently (that's the whole point); `finalize`
/// consumes the builder and produces the immutable tree.
pub trait TreeBuilderStrategy: Send + Sync {
    fn insert(&self, sample: RankSample<'_>);
    fn finalize(self: Box<Self>) -> PerformanceTree;
}

pub fn new_strategy(
    concurrency: ConcurrencyModel,
    process_count: usize,
    build_mode: BuildMode,
    count_mode: CountMode,
) -> Box<dyn TreeBuilderStrategy> {
    match concurrency {
        ConcurrencyModel::Serial => Box::new(SerialBuilder::new(process_count, build_mode, count_mode)),
        ConcurrencyModel::FineGrained => Box::new(FineGrainedBuilder::new(process_count, build_mode, count_mode)),
        ConcurrencyModel::ThreadLocalMerge => {
            Box::new(ThreadLocalMergeBuilder::new(process_count, build_mode, count_mode))
        }
        ConcurrencyModel::LockFree => Box::new(LockFreeBuilder::new(process_count, build_mode, count_mode)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyModel {
    Serial,
    FineGrained,
    ThreadLocalMerge,
    LockFree,
}
