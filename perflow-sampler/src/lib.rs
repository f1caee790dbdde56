//! In-process sampling agent: signal-based stack capture, library-map
//! tracking, MPI rank detection, and the on-disk store. Meant to be built
//! as a `cdylib` and `LD_PRELOAD`ed into an unmodified application; the
//! `rlib` target is what the `perflow-analysis`/`perflow-cli` crates and
//! this crate's own tests link against.

pub mod config;
pub mod dl_watch;
pub mod error;
pub mod library_map;
pub mod mpi_rank;
pub mod proc_maps;
pub mod sampler;
pub mod signal_source;
pub mod stats;
pub mod store;
pub mod unwind;

pub use config::SamplerConfig;
pub use error::{SamplerError, StoreError};
pub use library_map::{LibraryEntry, LibraryMap, LibraryMapRegistry, UNRESOLVED_LIBRARY};
pub use sampler::{PmuEventKind, Sampler, SamplerState, SamplerVariant};
pub use stats::{SamplerStats, SamplerStatsSnapshot};
pub use store::{ImportedSamples, StoreExporter, StoreImporter};
