use perflow_core::{CallStack, InsertResult, StaticHashMap};
use proptest::prelude::*;

fn arb_stack() -> impl Strategy<Value = CallStack> {
    prop::collection::vec(any::<u64>(), 0..16).prop_map(|v| v.into_iter().collect())
}

proptest! {
    /// P1: equal stacks hash equal.
    #[test]
    fn p1_equal_stacks_hash_equal(frames in prop::collection::vec(any::<u64>(), 0..16)) {
        let a: CallStack = frames.iter().copied().collect();
        let b: CallStack = frames.iter().copied().collect();
        prop_assert!(a.equals(&b));
        prop_assert_eq!(a.hash(), b.hash());
    }

    /// P2: for unique keys up to capacity, size == k and each key is
    /// findable until erased.
    #[test]
    fn p2_static_hash_map_size_and_membership(
        unique_frames in prop::collection::vec(any::<u64>(), 1..40)
    ) {
        // Turn each scalar into a distinct single-frame stack so all keys
        // in the batch are unique by construction.
        let mut seen = std::collections::HashSet::new();
        let mut stacks = Vec::new();
        for f in unique_frames {
            if seen.insert(f) {
                stacks.push(CallStack::from_iter([f]));
            }
        }
        let k = stacks.len();
        let capacity = k.max(1) * 4; // comfortably under load-factor target
        let map: StaticHashMap<CallStack> = StaticHashMap::with_capacity(capacity);
        for s in &stacks {
            prop_assert_eq!(map.insert_or_increment(*s, 1), InsertResult::Inserted);
        }
        prop_assert_eq!(map.len(), k);
        for s in &stacks {
            prop_assert_eq!(map.get(s), Some(1));
        }
        // erase half of them; they should no longer be findable, the rest
        // should remain so.
        for s in stacks.iter().step_by(2) {
            prop_assert!(map.erase(s));
        }
        for (i, s) in stacks.iter().enumerate() {
            if i % 2 == 0 {
                prop_assert_eq!(map.get(s), None);
            } else {
                prop_assert_eq!(map.get(s), Some(1));
            }
        }
    }

    #[test]
    fn hash_is_deterministic_across_instances(s in arb_stack()) {
        prop_assert_eq!(s.hash(), s.hash());
    }
}
