//! Top-N ranking over a tree's nodes, by inclusive or self sample count.

use crate::tree::{NodeRef, PerformanceTree};

/// Which counter [`HotspotAnalyzer`] ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotMode {
    /// Rank by `total_samples` (inclusive accounting).
    Inclusive,
    /// Rank by `self_samples_total`.
    SelfTime,
}

/// One ranked entry. `percentage` is relative to the whole tree's
/// `total_samples`, regardless of `mode`.
#[derive(Debug, Clone)]
pub struct Hotspot<'a> {
    pub node: NodeRef<'a>,
    pub samples: u64,
    pub percentage: f64,
    pub function_name: Option<&'a str>,
    pub library_path: Option<&'a str>,
}

pub struct HotspotAnalyzer;

impl HotspotAnalyzer {
    /// Returns the top `n` nodes by `mode`'s counter, root excluded (the
    /// synthetic root carries no function identity and is never a useful
    /// hotspot). Ties keep the earlier-inserted node first — a stable sort
    /// over nodes already in insertion order achieves this.
    pub fn top_n(tree: &PerformanceTree, n: usize, mode: HotspotMode) -> Vec<Hotspot<'_>> {
        let total = tree.total_samples();
        let mut candidates: Vec<NodeRef<'_>> = tree.all_nodes().into_iter().filter(|node| !node.is_root()).collect();

        candidates.sort_by(|a, b| {
            let va = Self::metric(a, mode);
            let vb = Self::metric(b, mode);
            vb.cmp(&va)
        });

        candidates
            .into_iter()
            .take(n)
            .map(|node| {
                let samples = Self::metric(&node, mode);
                let percentage = if total == 0 { 0.0 } else { 100.0 * samples as f64 / total as f64 };
                Hotspot { node, samples, percentage, function_name: node.function_name(), library_path: node.library_path() }
            })
            .collect()
    }

    fn metric(node: &NodeRef<'_>, mode: HotspotMode) -> u64 {
        match mode {
            HotspotMode::Inclusive => node.total_samples(),
            HotspotMode::SelfTime => node.self_samples_total(),
        }
    }
}
