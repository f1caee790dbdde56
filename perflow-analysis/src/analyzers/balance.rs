//! Per-rank load-balance statistics over a node's `sampling_counts`
//! vector, and the whole-tree summary (the same statistics applied to the
//! root).

use crate::tree::{NodeRef, PerformanceTree};

/// Summary statistics over one node's per-rank sample counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceStats {
    pub mean: f64,
    pub stddev: f64,
    pub min: u64,
    pub max: u64,
    /// `(max - mean) / mean`, or `0.0` when `mean == 0`.
    pub imbalance_factor: f64,
    /// Rank index holding `min`; `None` when there are no ranks.
    pub argmin: Option<usize>,
    /// Rank index holding `max`; `None` when there are no ranks.
    pub argmax: Option<usize>,
}

impl BalanceStats {
    fn from_counts(counts: &[u64]) -> Self {
        if counts.is_empty() {
            return Self { mean: 0.0, stddev: 0.0, min: 0, max: 0, imbalance_factor: 0.0, argmin: None, argmax: None };
        }

        let n = counts.len() as f64;
        let sum: u64 = counts.iter().sum();
        let mean = sum as f64 / n;

        let variance = counts.iter().map(|&c| { let d = c as f64 - mean; d * d }).sum::<f64>() / n;
        let stddev = variance.sqrt();

        let (argmin, &min) = counts.iter().enumerate().min_by_key(|&(_, &c)| c).unwrap();
        let (argmax, &max) = counts.iter().enumerate().max_by_key(|&(_, &c)| c).unwrap();

        let imbalance_factor = if mean == 0.0 { 0.0 } else { (max as f64 - mean) / mean };

        Self { mean, stddev, min, max, imbalance_factor, argmin: Some(argmin), argmax: Some(argmax) }
    }
}

/// Computes [`BalanceStats`] for any node, and for the whole tree (the
/// root's per-rank totals).
pub struct BalanceAnalyzer;

impl BalanceAnalyzer {
    pub fn node_stats(node: &NodeRef<'_>) -> BalanceStats {
        BalanceStats::from_counts(node.sampling_counts())
    }

    pub fn tree_stats(tree: &PerformanceTree) -> BalanceStats {
        Self::node_stats(&tree.root())
    }

    /// `node_stats` for every node in the tree, in the same order as
    /// [`PerformanceTree::all_nodes`].
    pub fn all_node_stats(tree: &PerformanceTree) -> Vec<(NodeRef<'_>, BalanceStats)> {
        tree.all_nodes().into_iter().map(|n| { let stats = Self::node_stats(&n); (n, stats) }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_key::{BuildMode, CountMode};
    use crate::resolved_frame::ResolvedFrame;
    use crate::tree::TreeInner;
    use std::sync::Arc;

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame::without_symbols(0, Arc::from("/app"), 0).with_symbol(&perflow_symbols::SymbolInfo::function_only(Arc::from(name)))
    }

    #[test]
    fn balanced_ranks_matches_scenario_s4() {
        let mut tree = TreeInner::new(4, BuildMode::ContextFree, CountMode::Both);
        let frames = vec![frame("work")];
        for rank in 0..4 {
            tree.insert(&frames, rank, 100, 0.0);
        }
        let tree = tree.into_tree();
        let stats = BalanceAnalyzer::tree_stats(&tree);
        assert_eq!(stats.mean, 100.0);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.imbalance_factor, 0.0);
    }

    #[test]
    fn imbalanced_ranks_matches_scenario_s5() {
        let mut tree = TreeInner::new(4, BuildMode::ContextFree, CountMode::Both);
        let frames = vec![frame("work")];
        for (rank, count) in [50u64, 100, 150, 200].into_iter().enumerate() {
            tree.insert(&frames, rank, count, 0.0);
        }
        let tree = tree.into_tree();
        let stats = BalanceAnalyzer::tree_stats(&tree);
        assert_eq!(stats.mean, 125.0);
        assert_eq!(stats.min, 50);
        assert_eq!(stats.max, 200);
        assert_eq!(stats.argmin, Some(0));
        assert_eq!(stats.argmax, Some(3));
        assert!((stats.imbalance_factor - 0.6).abs() < 1e-9);
    }

    #[test]
    fn zero_mean_has_zero_imbalance() {
        let tree = TreeInner::new(2, BuildMode::ContextFree, CountMode::Both).into_tree();
        let stats = BalanceAnalyzer::tree_stats(&tree);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.imbalance_factor, 0.0);
    }
}
