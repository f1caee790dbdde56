use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use perflow_analysis::{BuildMode, ConcurrencyModel, CountMode};

/// Minimal `analyze` front-end over `perflow-analysis`: reads the
/// per-rank stores a sampler session left behind, builds a performance
/// tree, and prints the balance and hotspot passes over it.
#[derive(Debug, Parser)]
#[command(name = "perflow-analyze", version, about = "Post-process a PerFlow sampling session into a performance-tree report.")]
pub struct Opt {
    /// Directory containing `<prefix>_rank_<N>.pflw[.gz]` and `.libmap` files.
    #[arg(long, value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Directory to write the text report into.
    #[arg(long, value_name = "DIR")]
    pub output: PathBuf,

    /// Filename prefix the sampler used (see `PERFLOW_OUTPUT_DIR`/prefix at capture time).
    #[arg(long, default_value = "perflow")]
    pub prefix: String,

    /// How many hotspots to report in each ranking.
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Tree-node keying mode.
    #[arg(long, value_enum, default_value_t = ModeArg::ContextFree)]
    pub mode: ModeArg,

    /// Sample-count accounting mode.
    #[arg(long = "count-mode", value_enum, default_value_t = CountModeArg::Both)]
    pub count_mode: CountModeArg,

    /// Tree-builder concurrency model.
    #[arg(long, value_enum, default_value_t = ConcurrencyArg::FineGrained)]
    pub concurrency: ConcurrencyArg,

    /// Worker threads for reading and converting per-rank files. Ignored
    /// when `--concurrency serial` is selected.
    #[arg(long, default_value_t = num_cpus::get())]
    pub num_threads: usize,

    /// Attempt symbol resolution (dynamic-linker query, falling back to
    /// the system DWARF line-info tool) instead of reporting raw
    /// `(library, offset)` pairs.
    #[arg(long)]
    pub resolve_symbols: bool,

    /// Nanoseconds-per-sample used to derive `execution_times` from
    /// sample counts; `0` (the default) leaves execution time at zero.
    #[arg(long, default_value_t = 0.0)]
    pub time_per_sample_micros: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    ContextFree,
    ContextAware,
}

impl From<ModeArg> for BuildMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::ContextFree => BuildMode::ContextFree,
            ModeArg::ContextAware => BuildMode::ContextAware,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CountModeArg {
    Exclusive,
    Inclusive,
    Both,
}

impl From<CountModeArg> for CountMode {
    fn from(m: CountModeArg) -> Self {
        match m {
            CountModeArg::Exclusive => CountMode::Exclusive,
            CountModeArg::Inclusive => CountMode::Inclusive,
            CountModeArg::Both => CountMode::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConcurrencyArg {
    Serial,
    FineGrained,
    ThreadLocal,
    LockFree,
}

impl From<ConcurrencyArg> for ConcurrencyModel {
    fn from(c: ConcurrencyArg) -> Self {
        match c {
            ConcurrencyArg::Serial => ConcurrencyModel::Serial,
            ConcurrencyArg::FineGrained => ConcurrencyModel::FineGrained,
            ConcurrencyArg::ThreadLocal => ConcurrencyModel::ThreadLocalMerge,
            ConcurrencyArg::LockFree => ConcurrencyModel::LockFree,
        }
    }
}
