use std::sync::Arc;

use perflow_analysis::builders::{new_strategy, ConcurrencyModel, RankSample};
use perflow_analysis::node_key::{BuildMode, CountMode};
use perflow_analysis::resolved_frame::ResolvedFrame;
use perflow_analysis::tree::{PerformanceTree, TreeInner};
use proptest::prelude::*;

const FUNCTION_NAMES: [&str; 4] = ["main", "work", "helper", "leaf"];
const LIBRARY_NAMES: [&str; 2] = ["/app", "/lib/libfoo.so"];

fn arb_frame() -> impl Strategy<Value = ResolvedFrame> {
    (0..FUNCTION_NAMES.len(), 0..LIBRARY_NAMES.len(), 0u64..8).prop_map(|(f, l, offset)| {
        ResolvedFrame {
            raw_address: offset,
            library_path: Arc::from(LIBRARY_NAMES[l]),
            offset_within_library: offset,
            function_name: Some(Arc::from(FUNCTION_NAMES[f])),
            source_file: None,
            line_number: None,
        }
    })
}

fn arb_stack() -> impl Strategy<Value = Vec<ResolvedFrame>> {
    prop::collection::vec(arb_frame(), 1..5)
}

/// One insertion: a stack, a rank, and a count.
fn arb_insertion(process_count: usize) -> impl Strategy<Value = (Vec<ResolvedFrame>, usize, u64)> {
    (arb_stack(), 0..process_count, 1u64..50)
}

/// Canonical per-node summary used to compare trees that should be
/// structurally and numerically identical regardless of insertion order:
/// the root-to-node path of function names plus its counters, sorted so
/// the comparison doesn't depend on child insertion order either.
fn canonical_summary(tree: &PerformanceTree) -> Vec<(Vec<String>, Vec<u64>, Vec<u64>)> {
    let mut rows: Vec<_> = tree
        .all_nodes()
        .into_iter()
        .map(|n| {
            let path: Vec<String> = n.get_path().iter().map(|s| s.to_string()).collect();
            (path, n.sampling_counts().to_vec(), n.self_samples().to_vec())
        })
        .collect();
    rows.sort();
    rows
}

proptest! {
    /// P5: the same insertion multiset in any order produces a structurally
    /// and numerically identical tree.
    #[test]
    fn p5_insertion_order_independence(
        insertions in prop::collection::vec(arb_insertion(3), 1..30),
        seed in any::<u64>(),
    ) {
        let mut forward = TreeInner::new(3, BuildMode::ContextFree, CountMode::Both);
        for (frames, rank, count) in &insertions {
            forward.insert(frames, *rank, *count, 0.0);
        }

        // A cheap deterministic shuffle keyed on `seed`, avoiding the
        // forbidden `rand`/`Math.random` sources: rotate by a
        // seed-derived amount.
        let mut shuffled = insertions.clone();
        if !shuffled.is_empty() {
            let rotate_by = (seed as usize) % shuffled.len();
            shuffled.rotate_left(rotate_by);
        }
        let mut reordered = TreeInner::new(3, BuildMode::ContextFree, CountMode::Both);
        for (frames, rank, count) in &shuffled {
            reordered.insert(frames, *rank, *count, 0.0);
        }

        let forward_tree = forward.into_tree();
        let reordered_tree = reordered.into_tree();
        prop_assert_eq!(canonical_summary(&forward_tree), canonical_summary(&reordered_tree));
        prop_assert_eq!(forward_tree.total_samples(), reordered_tree.total_samples());
    }

    /// P7: root total samples equals the sum of all inserted counts.
    #[test]
    fn p7_root_total_equals_sum_of_insertions(
        insertions in prop::collection::vec(arb_insertion(2), 0..30),
    ) {
        let mut tree = TreeInner::new(2, BuildMode::ContextFree, CountMode::Inclusive);
        let expected: u64 = insertions.iter().map(|(_, _, c)| c).sum();
        for (frames, rank, count) in &insertions {
            tree.insert(frames, *rank, *count, 0.0);
        }
        prop_assert_eq!(tree.into_tree().total_samples(), expected);
    }

    /// P8: in exclusive mode, self_samples summed over every node equals
    /// the sum of all inserted counts.
    #[test]
    fn p8_exclusive_self_samples_sum_to_total_insertions(
        insertions in prop::collection::vec(arb_insertion(2), 0..30),
    ) {
        let mut tree = TreeInner::new(2, BuildMode::ContextFree, CountMode::Exclusive);
        let expected: u64 = insertions.iter().map(|(_, _, c)| c).sum();
        for (frames, rank, count) in &insertions {
            tree.insert(frames, *rank, *count, 0.0);
        }
        let tree = tree.into_tree();
        let total_self: u64 = tree.all_nodes().iter().map(|n| n.self_samples_total()).sum();
        prop_assert_eq!(total_self, expected);
    }

    /// P9: in inclusive mode, every parent's total is at least the sum of
    /// its children's totals.
    #[test]
    fn p9_inclusive_parent_dominates_children(
        insertions in prop::collection::vec(arb_insertion(2), 1..30),
    ) {
        let mut tree = TreeInner::new(2, BuildMode::ContextFree, CountMode::Inclusive);
        for (frames, rank, count) in &insertions {
            tree.insert(frames, *rank, *count, 0.0);
        }
        let tree = tree.into_tree();
        for node in tree.all_nodes() {
            let children_total: u64 = node.children().iter().map(|c| c.total_samples()).sum();
            prop_assert!(node.total_samples() >= children_total);
        }
    }
}

/// P6: all four concurrency models converge to the same consolidated tree
/// for the same insertion multiset.
#[test]
fn p6_concurrency_models_agree() {
    let insertions: Vec<(Vec<ResolvedFrame>, usize, u64)> = vec![
        (vec![frame("main"), frame("work")], 0, 10),
        (vec![frame("main"), frame("helper")], 1, 5),
        (vec![frame("main"), frame("work"), frame("leaf")], 0, 3),
    ];

    let models = [
        ConcurrencyModel::Serial,
        ConcurrencyModel::FineGrained,
        ConcurrencyModel::ThreadLocalMerge,
        ConcurrencyModel::LockFree,
    ];

    let mut summaries = Vec::new();
    for model in models {
        let strategy = new_strategy(model, 2, BuildMode::ContextFree, CountMode::Both);
        for (frames, rank, count) in &insertions {
            strategy.insert(RankSample { rank: *rank, frames, count: *count, time_micros: 0.0 });
        }
        summaries.push(canonical_summary(&strategy.finalize()));
    }

    for window in summaries.windows(2) {
        assert_eq!(window[0], window[1]);
    }
}

fn frame(name: &str) -> ResolvedFrame {
    ResolvedFrame::without_symbols(0, Arc::from("/app"), 0)
        .with_symbol(&perflow_symbols::SymbolInfo::function_only(Arc::from(name)))
}
