use std::fmt::Write as _;

use perflow_analysis::{BalanceAnalyzer, BuildReport, HotspotAnalyzer, HotspotMode};

/// Renders a [`BuildReport`] as the plain-text summary `perflow-analyze`
/// prints to stdout and saves alongside the input, grounded on the
/// server-side summary tables samply's `samply-server` renders for the
/// Firefox Profiler UI, but as flat text rather than JSON since this
/// front end has no browser on the other end.
pub fn render(report: &BuildReport, top_n: usize) -> String {
    let mut out = String::new();
    let tree = &report.tree;

    writeln!(out, "files loaded: {}", report.files_loaded).unwrap();
    if !report.failures.is_empty() {
        writeln!(out, "failures:").unwrap();
        for failure in &report.failures {
            writeln!(out, "  rank {} ({}): {}", failure.rank, failure.path.display(), failure.message).unwrap();
        }
    }

    writeln!(out).unwrap();
    writeln!(out, "total samples: {}", tree.total_samples()).unwrap();
    writeln!(out, "node count: {}", tree.node_count()).unwrap();
    writeln!(out, "max depth: {}", tree.max_depth()).unwrap();
    writeln!(out, "process count: {}", tree.process_count()).unwrap();

    let balance = BalanceAnalyzer::tree_stats(tree);
    writeln!(out).unwrap();
    writeln!(out, "whole-tree balance:").unwrap();
    writeln!(out, "  mean={:.2} stddev={:.2} min={} max={} imbalance_factor={:.3}", balance.mean, balance.stddev, balance.min, balance.max, balance.imbalance_factor).unwrap();
    if let (Some(argmin), Some(argmax)) = (balance.argmin, balance.argmax) {
        writeln!(out, "  least-loaded rank={argmin} most-loaded rank={argmax}").unwrap();
    }

    writeln!(out).unwrap();
    writeln!(out, "top {top_n} hotspots (inclusive):").unwrap();
    for (i, hotspot) in HotspotAnalyzer::top_n(tree, top_n, HotspotMode::Inclusive).into_iter().enumerate() {
        writeln!(
            out,
            "  {}. {} [{}] samples={} ({:.1}%)",
            i + 1,
            hotspot.function_name.unwrap_or("<unknown>"),
            hotspot.library_path.unwrap_or("<unknown>"),
            hotspot.samples,
            hotspot.percentage,
        )
        .unwrap();
    }

    writeln!(out).unwrap();
    writeln!(out, "top {top_n} hotspots (self):").unwrap();
    for (i, hotspot) in HotspotAnalyzer::top_n(tree, top_n, HotspotMode::SelfTime).into_iter().enumerate() {
        writeln!(
            out,
            "  {}. {} [{}] samples={} ({:.1}%)",
            i + 1,
            hotspot.function_name.unwrap_or("<unknown>"),
            hotspot.library_path.unwrap_or("<unknown>"),
            hotspot.samples,
            hotspot.percentage,
        )
        .unwrap();
    }

    out
}
