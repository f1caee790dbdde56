//! Stateless, read-only passes over a finished [`crate::tree::PerformanceTree`]:
//! [`balance::BalanceAnalyzer`] for per-rank load imbalance, and
//! [`hotspot::HotspotAnalyzer`] for top-N ranking.

pub mod balance;
pub mod hotspot;

pub use balance::{BalanceAnalyzer, BalanceStats};
pub use hotspot::{Hotspot, HotspotAnalyzer, HotspotMode};
