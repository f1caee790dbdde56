use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// A key usable in a [`StaticHashMap`]. Implementors must be cheap to copy
/// and must not allocate to compute `hash_key`/`key_eq` — both are called
/// from async-signal-handler context.
pub trait StaticHashKey: Copy {
    fn hash_key(&self) -> u64;
    fn key_eq(&self, other: &Self) -> bool;
}

impl StaticHashKey for crate::call_stack::CallStack {
    fn hash_key(&self) -> u64 {
        self.hash()
    }
    fn key_eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

const EMPTY: u8 = 0;
const INSTALLING: u8 = 1;
const OCCUPIED: u8 = 2;
const TOMBSTONE: u8 = 3;

/// Operational load-factor target; informational only, never enforced by
/// growing the table (the table never grows).
pub const TARGET_LOAD_FACTOR: f64 = 0.7;

struct Slot<K> {
    state: AtomicU8,
    key: UnsafeCell<K>,
    value: AtomicU64,
}

// SAFETY: all access to `key` is gated by the `state` atomic, which acts as
// the synchronizing memory fence (Acquire observing an OCCUPIED written with
// Release happens-after the key write that preceded it). Exactly one thread
// ever transitions a slot out of EMPTY/TOMBSTONE via a successful CAS, and
// only that thread writes `key` before publishing OCCUPIED.
unsafe impl<K: Send> Sync for Slot<K> {}

enum ProbeOutcome {
    Inserted,
    Incremented,
    Full,
    /// Lost a race claiming a reusable slot; caller should retry the probe
    /// from scratch. Bounded by the caller so the handler never spins
    /// unboundedly.
    Contended,
}

/// Result of [`StaticHashMap::insert_or_increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// A new key was installed with the given initial count.
    Inserted,
    /// An existing key's counter was incremented.
    Incremented,
    /// The table has no room for a new key; the sample was dropped.
    CapacityExceeded,
}

/// A fixed-capacity, open-addressed map from `K` to a 64-bit counter.
///
/// Capacity is fixed at construction and never grows. Linear probing is
/// used; erased slots become tombstones that later probes must traverse but
/// that later inserts may reclaim. It is safe to call
/// [`insert_or_increment`] from an async-signal handler — no allocation, no
/// blocking locks, wait-free under the single-writer-per-new-key
/// assumption.
///
/// [`insert_or_increment`]: StaticHashMap::insert_or_increment
pub struct StaticHashMap<K> {
    slots: Box<[Slot<K>]>,
    capacity: usize,
    len: AtomicUsize,
    dropped: AtomicU64,
}

/// Bound on retries when a claim attempt loses a race to another thread.
/// Keeps the handler's worst case bounded instead of spinning forever.
const MAX_CONTENTION_RETRIES: usize = 8;

impl<K: StaticHashKey + Default> StaticHashMap<K> {
    /// Preallocates a table with room for `capacity` unique keys. This does
    /// allocate (it must run before sampling starts, never from a signal
    /// handler).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "StaticHashMap capacity must be nonzero");
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                state: AtomicU8::new(EMPTY),
                key: UnsafeCell::new(K::default()),
                value: AtomicU64::new(0),
            });
        }
        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of distinct keys currently present (not counting
    /// tombstones). Exact in the absence of concurrent mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Number of samples dropped because the table was full when a *new*
    /// key needed inserting. Increments to existing keys always succeed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Async-signal-safe. Increments the counter for `key` by `delta`,
    /// inserting it with an initial value of `delta` if it is not already
    /// present and the table has room. Never allocates, never blocks.
    pub fn insert_or_increment(&self, key: K, delta: u64) -> InsertResult {
        for _ in 0..MAX_CONTENTION_RETRIES {
            match self.probe(&key, delta) {
                ProbeOutcome::Inserted => return InsertResult::Inserted,
                ProbeOutcome::Incremented => return InsertResult::Incremented,
                ProbeOutcome::Full => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return InsertResult::CapacityExceeded;
                }
                ProbeOutcome::Contended => continue,
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        InsertResult::CapacityExceeded
    }

    fn probe(&self, key: &K, delta: u64) -> ProbeOutcome {
        let start = (key.hash_key() as usize) % self.capacity;
        let mut first_tombstone: Option<usize> = None;
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => {
                    let claim_idx = first_tombstone.unwrap_or(idx);
                    return self.try_claim(claim_idx, key, delta);
                }
                TOMBSTONE => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                OCCUPIED => {
                    // SAFETY: OCCUPIED was published with Release after the
                    // key write; our Acquire load above synchronizes-with it.
                    let existing = unsafe { &*slot.key.get() };
                    if existing.key_eq(key) {
                        slot.value.fetch_add(delta, Ordering::Relaxed);
                        return ProbeOutcome::Incremented;
                    }
                }
                INSTALLING => {
                    // A concurrent insert is in flight for this slot; we
                    // cannot yet tell whether it is our key. Ask the caller
                    // to retry rather than spin here.
                    return ProbeOutcome::Contended;
                }
                _ => unreachable!("invalid slot state"),
            }
        }
        match first_tombstone {
            Some(idx) => self.try_claim(idx, key, delta),
            None => ProbeOutcome::Full,
        }
    }

    fn try_claim(&self, idx: usize, key: &K, delta: u64) -> ProbeOutcome {
        let slot = &self.slots[idx];
        let cur = slot.state.load(Ordering::Acquire);
        if cur != EMPTY && cur != TOMBSTONE {
            if cur == OCCUPIED {
                let existing = unsafe { &*slot.key.get() };
                if existing.key_eq(key) {
                    slot.value.fetch_add(delta, Ordering::Relaxed);
                    return ProbeOutcome::Incremented;
                }
            }
            return ProbeOutcome::Contended;
        }
        match slot.state.compare_exchange(cur, INSTALLING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // SAFETY: we are the sole owner of this slot until we
                // publish OCCUPIED below.
                unsafe {
                    *slot.key.get() = *key;
                }
                slot.value.store(delta, Ordering::Relaxed);
                slot.state.store(OCCUPIED, Ordering::Release);
                self.len.fetch_add(1, Ordering::Relaxed);
                ProbeOutcome::Inserted
            }
            Err(_) => ProbeOutcome::Contended,
        }
    }

    /// Looks up `key` without mutating the table. Not restricted to
    /// signal-handler context but safe to call from one.
    pub fn get(&self, key: &K) -> Option<u64> {
        let start = (key.hash_key() as usize) % self.capacity;
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => return None,
                OCCUPIED => {
                    let existing = unsafe { &*slot.key.get() };
                    if existing.key_eq(key) {
                        return Some(slot.value.load(Ordering::Relaxed));
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Marks `key`'s slot as a tombstone if present. Not used by the
    /// sampler's hot path; intended for off-signal maintenance and tests
    /// exercising P2.
    pub fn erase(&self, key: &K) -> bool {
        let start = (key.hash_key() as usize) % self.capacity;
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => return false,
                OCCUPIED => {
                    let existing = unsafe { &*slot.key.get() };
                    if existing.key_eq(key) {
                        slot.state.store(TOMBSTONE, Ordering::Release);
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Linear scan over every occupied `(key, count)` pair. Not
    /// async-signal-safe (unbounded-ish loop, intended for post-run use
    /// only).
    pub fn for_each(&self, mut f: impl FnMut(&K, u64)) {
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) == OCCUPIED {
                let key = unsafe { &*slot.key.get() };
                let value = slot.value.load(Ordering::Relaxed);
                f(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_stack::CallStack;

    fn stack_of(addrs: &[u64]) -> CallStack {
        addrs.iter().copied().collect()
    }

    #[test]
    fn insert_new_then_increment_existing() {
        let map: StaticHashMap<CallStack> = StaticHashMap::with_capacity(16);
        let key = stack_of(&[1, 2, 3]);
        assert_eq!(map.insert_or_increment(key, 1), InsertResult::Inserted);
        assert_eq!(map.insert_or_increment(key, 1), InsertResult::Incremented);
        assert_eq!(map.get(&key), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn full_table_refuses_new_keys_but_increments_existing() {
        let map: StaticHashMap<CallStack> = StaticHashMap::with_capacity(2);
        let a = stack_of(&[1]);
        let b = stack_of(&[2]);
        let c = stack_of(&[3]);
        assert_eq!(map.insert_or_increment(a, 1), InsertResult::Inserted);
        assert_eq!(map.insert_or_increment(b, 1), InsertResult::Inserted);
        assert_eq!(map.insert_or_increment(c, 1), InsertResult::CapacityExceeded);
        assert_eq!(map.dropped_count(), 1);
        // existing keys still succeed
        assert_eq!(map.insert_or_increment(a, 5), InsertResult::Incremented);
        assert_eq!(map.get(&a), Some(6));
    }

    #[test]
    fn erase_then_reinsert_reuses_tombstone() {
        let map: StaticHashMap<CallStack> = StaticHashMap::with_capacity(4);
        let a = stack_of(&[10]);
        let b = stack_of(&[20]);
        map.insert_or_increment(a, 1);
        map.insert_or_increment(b, 1);
        assert!(map.erase(&a));
        assert_eq!(map.get(&a), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.insert_or_increment(a, 7), InsertResult::Inserted);
        assert_eq!(map.get(&a), Some(7));
    }

    #[test]
    fn for_each_visits_all_occupied_entries() {
        let map: StaticHashMap<CallStack> = StaticHashMap::with_capacity(8);
        let keys: Vec<CallStack> = (0..5).map(|i| stack_of(&[i as u64])).collect();
        for k in &keys {
            map.insert_or_increment(*k, 3);
        }
        let mut seen = 0;
        map.for_each(|_k, v| {
            assert_eq!(v, 3);
            seen += 1;
        });
        assert_eq!(seen, 5);
    }

    #[test]
    fn concurrent_increments_from_multiple_threads_are_exact() {
        use std::sync::Arc;
        let map: Arc<StaticHashMap<CallStack>> = Arc::new(StaticHashMap::with_capacity(64));
        let key = stack_of(&[0xAAAA]);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    map.insert_or_increment(key, 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.get(&key), Some(8000));
        assert_eq!(map.len(), 1);
    }
}
