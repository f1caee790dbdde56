use std::path::PathBuf;

use thiserror::Error;

/// Errors from building a `PerformanceTree` out of a batch of per-rank
/// stores. Per-file failures are collected into
/// [`crate::tree_builder::BuildReport`] rather than raised here; this enum
/// is reserved for conditions that abort the whole batch.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no sample files were successfully loaded")]
    NoFilesLoaded,

    #[error("output directory {0} is not writable")]
    DirectoryNotWritable(PathBuf),
}
