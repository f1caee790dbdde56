//! Error taxonomy for the sampler control path (`initialize`/`start`/`stop`/
//! `flush`) and the `PerRankStore` codec. Grounded on samply's
//! `samply/src/error.rs`: one `thiserror`-derived enum per concern, never a
//! panic on a reachable path.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the sampler's control path. Never produced from within the
/// signal handler — the handler only ever bumps a `CapacityExceeded`
/// counter instead of returning an error.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampler operation invalid in current state: {operation} requires {expected}, found {actual:?}")]
    InvalidState { operation: &'static str, expected: &'static str, actual: crate::sampler::SamplerState },

    #[error("failed to arm sampling source: {0}")]
    SourceArmFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the `PerRankStore` importer/exporter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("magic mismatch in {path}: expected {expected:?}, found {found:?}")]
    MagicMismatch { path: PathBuf, expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported format version {version} in {path}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("truncated file {path}: expected at least {expected} bytes, found {found}")]
    Truncated { path: PathBuf, expected: usize, found: usize },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
