use crate::call_stack::CallStack;
use crate::static_hash_map::{InsertResult, StaticHashMap};

/// A `StaticHashMap<CallStack>` with a capacity fixed at construction, plus
/// the convenience methods the sampler's control path (never the handler)
/// uses to drain it.
pub struct SampleMap {
    table: StaticHashMap<CallStack>,
}

impl SampleMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { table: StaticHashMap::with_capacity(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.table.dropped_count()
    }

    /// Async-signal-safe record of one observation of `stack`.
    pub fn record(&self, stack: CallStack) -> InsertResult {
        self.table.insert_or_increment(stack, 1)
    }

    pub fn count_of(&self, stack: &CallStack) -> Option<u64> {
        self.table.get(stack)
    }

    /// Snapshot of every `(stack, count)` pair. Not async-signal-safe;
    /// intended for `flush`/export, which always run off-signal.
    pub fn snapshot(&self) -> Vec<(CallStack, u64)> {
        let mut out = Vec::with_capacity(self.len());
        self.table.for_each(|k, v| out.push((*k, v)));
        out
    }
}
