//! Post-process analysis core: resolves raw addresses against a rank's
//! library-map snapshots and (optionally) a symbol resolver, builds the
//! concurrent performance tree described in `perflow-core`'s sibling
//! crates, and runs the balance/hotspot passes over it.

pub mod analyzers;
pub mod builders;
pub mod error;
pub mod node_key;
pub mod offset_converter;
pub mod resolved_frame;
pub mod tree;
pub mod tree_builder;

pub use analyzers::{BalanceAnalyzer, BalanceStats, Hotspot, HotspotAnalyzer, HotspotMode};
pub use builders::ConcurrencyModel;
pub use error::BuildError;
pub use node_key::{BuildMode, CountMode, NodeKey};
pub use offset_converter::OffsetConverter;
pub use resolved_frame::ResolvedFrame;
pub use tree::{NodeRef, PerformanceTree};
pub use tree_builder::{discover_rank_files, BuildReport, LibraryMapFileRef, LoadFailure, SampleFileRef, TreeBuilder};
