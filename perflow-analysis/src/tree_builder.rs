//! Orchestrates a full analysis run: reads every rank's library-map and
//! sample-data files, resolves raw addresses through an
//! [`OffsetConverter`], and inserts the results into a
//! [`crate::tree::PerformanceTree`] through whichever concurrency
//! strategy the caller selected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use perflow_sampler::{LibraryMap, StoreImporter};
use perflow_symbols::SymbolResolver;

use crate::builders::{new_strategy, ConcurrencyModel, RankSample, TreeBuilderStrategy};
use crate::error::BuildError;
use crate::node_key::{BuildMode, CountMode};
use crate::offset_converter::OffsetConverter;
use crate::tree::PerformanceTree;

/// One rank's sample-data file, paired with the rank it belongs to.
pub struct SampleFileRef {
    pub path: PathBuf,
    pub rank: usize,
}

/// One rank's library-map file, paired with the rank it belongs to. A
/// rank's `.libmap` may hold several snapshots (one per dynamic-load
/// event); all of them are registered.
pub struct LibraryMapFileRef {
    pub path: PathBuf,
    pub rank: usize,
}

/// A failure loading one file; collected rather than raised so the rest
/// of the batch still runs.
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub rank: usize,
    pub message: String,
}

/// Outcome of [`TreeBuilder::build`]: the finished tree plus a record of
/// what was and wasn't loaded.
pub struct BuildReport {
    pub tree: PerformanceTree,
    pub files_loaded: usize,
    pub failures: Vec<LoadFailure>,
}

pub struct TreeBuilder {
    pub build_mode: BuildMode,
    pub count_mode: CountMode,
    pub concurrency: ConcurrencyModel,
    pub time_per_sample_micros: f64,
    /// Attached when symbol resolution is requested; `None` means stacks
    /// are resolved to `(library, offset)` only.
    pub symbol_resolver: Option<Arc<SymbolResolver>>,
    /// How many worker threads read and convert sample files concurrently.
    /// Only takes effect when `concurrency` is a non-serial model — the
    /// serial model's single tree lock makes concurrent file loading
    /// pure lock contention with no structural benefit, so it stays
    /// single-threaded regardless of this setting.
    pub num_threads: usize,
}

impl TreeBuilder {
    pub fn new(build_mode: BuildMode, count_mode: CountMode, concurrency: ConcurrencyModel) -> Self {
        Self { build_mode, count_mode, concurrency, time_per_sample_micros: 0.0, symbol_resolver: None, num_threads: 1 }
    }

    pub fn with_time_per_sample_micros(mut self, micros: f64) -> Self {
        self.time_per_sample_micros = micros;
        self
    }

    pub fn with_symbol_resolver(mut self, resolver: Arc<SymbolResolver>) -> Self {
        self.symbol_resolver = Some(resolver);
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Runs the full build. `cancelled` is polled between files (not
    /// between entries within a file); when it returns `true` the batch
    /// stops early and `files_loaded` reflects what completed before
    /// cancellation.
    pub fn build(
        &self,
        sample_files: &[SampleFileRef],
        library_map_files: &[LibraryMapFileRef],
        cancelled: impl Fn() -> bool + Sync,
    ) -> Result<BuildReport, BuildError> {
        let mut failures = Vec::new();

        let process_count = sample_files
            .iter()
            .map(|f| f.rank)
            .chain(library_map_files.iter().map(|f| f.rank))
            .max()
            .map(|max_rank| max_rank + 1)
            .unwrap_or(0);

        let mut snapshots_by_rank: Vec<Vec<LibraryMap>> = vec![Vec::new(); process_count];
        for file in library_map_files {
            match StoreImporter::read_library_maps(&file.path) {
                Ok((_rank_in_file, snapshots)) => snapshots_by_rank[file.rank] = snapshots,
                Err(e) => failures.push(LoadFailure { path: file.path.clone(), rank: file.rank, message: e.to_string() }),
            }
        }

        let strategy = new_strategy(self.concurrency, process_count, self.build_mode, self.count_mode);

        let outcomes = if self.concurrency == ConcurrencyModel::Serial || self.num_threads <= 1 {
            self.load_sequential(sample_files, &snapshots_by_rank, strategy.as_ref(), &cancelled)
        } else {
            self.load_concurrent(sample_files, &snapshots_by_rank, strategy.as_ref(), &cancelled)
        };

        let mut files_loaded = 0;
        for outcome in outcomes {
            match outcome {
                Ok(()) => files_loaded += 1,
                Err(failure) => failures.push(failure),
            }
        }

        if files_loaded == 0 && !sample_files.is_empty() {
            return Err(BuildError::NoFilesLoaded);
        }

        Ok(BuildReport { tree: strategy.finalize(), files_loaded, failures })
    }

    fn load_sequential(
        &self,
        sample_files: &[SampleFileRef],
        snapshots_by_rank: &[Vec<LibraryMap>],
        strategy: &dyn TreeBuilderStrategy,
        cancelled: &(impl Fn() -> bool + Sync),
    ) -> Vec<Result<(), LoadFailure>> {
        let mut outcomes = Vec::new();
        for file in sample_files {
            if cancelled() {
                break;
            }
            let outcome = self
                .load_one(file, &snapshots_by_rank[file.rank], strategy)
                .map_err(|message| LoadFailure { path: file.path.clone(), rank: file.rank, message });
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Distributes `sample_files` across `num_threads` worker threads,
    /// fanning work out over a `crossbeam_channel` and fanning the
    /// per-file outcomes back in over a second one, the same explicit
    /// thread-pool-plus-channel shape samply's capture side uses to hand
    /// frames from the sampling thread to its writer thread. Every
    /// concurrency model's `insert` is `Send + Sync` by construction, so
    /// sharing one `strategy` across workers is safe regardless of which
    /// non-serial model is in play. `cancelled` is polled before a worker
    /// claims its next file.
    fn load_concurrent(
        &self,
        sample_files: &[SampleFileRef],
        snapshots_by_rank: &[Vec<LibraryMap>],
        strategy: &dyn TreeBuilderStrategy,
        cancelled: &(impl Fn() -> bool + Sync),
    ) -> Vec<Result<(), LoadFailure>> {
        let (work_tx, work_rx) = crossbeam_channel::unbounded::<&SampleFileRef>();
        for file in sample_files {
            work_tx.send(file).expect("receivers outlive this send loop");
        }
        drop(work_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<Result<(), LoadFailure>>();
        let worker_count = self.num_threads.min(sample_files.len().max(1));

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(file) = work_rx.recv() {
                        if cancelled() {
                            break;
                        }
                        let outcome = self
                            .load_one(file, &snapshots_by_rank[file.rank], strategy)
                            .map_err(|message| LoadFailure { path: file.path.clone(), rank: file.rank, message });
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            // Drop the main thread's sender so the receiver's iterator
            // below terminates once every worker's clone is gone, instead
            // of blocking forever waiting for a sender that never sends.
            drop(result_tx);
        });

        result_rx.iter().collect()
    }

    fn load_one(
        &self,
        file: &SampleFileRef,
        snapshots: &[LibraryMap],
        strategy: &dyn TreeBuilderStrategy,
    ) -> Result<(), String> {
        let imported = StoreImporter::read_samples(&file.path).map_err(|e| e.to_string())?;
        let converter = OffsetConverter::new(snapshots, self.symbol_resolver.as_deref());

        for (stack, count) in &imported.entries {
            // `stack.as_slice()` is leaf-first (the sampler's capture
            // order); the tree's insert algorithm walks root-first, so
            // the resolved frames are reversed before insertion.
            let mut frames = converter.convert_batch(stack.as_slice());
            frames.reverse();
            let time_micros = *count as f64 * self.time_per_sample_micros;
            strategy.insert(RankSample { rank: file.rank, frames: &frames, count: *count, time_micros });
        }

        Ok(())
    }
}

pub fn discover_rank_files(
    input_dir: &Path,
    filename_prefix: &str,
) -> (Vec<SampleFileRef>, Vec<LibraryMapFileRef>) {
    let mut samples = Vec::new();
    let mut libmaps = Vec::new();

    let Ok(entries) = std::fs::read_dir(input_dir) else {
        return (samples, libmaps);
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        let Some(rest) = name.strip_prefix(&format!("{filename_prefix}_rank_")) else { continue };

        if let Some(rank_str) = rest.strip_suffix(".pflw").or_else(|| rest.strip_suffix(".pflw.gz")) {
            if let Ok(rank) = rank_str.parse::<usize>() {
                samples.push(SampleFileRef { path: path.clone(), rank });
            }
        } else if let Some(rank_str) = rest.strip_suffix(".libmap") {
            if let Ok(rank) = rank_str.parse::<usize>() {
                libmaps.push(LibraryMapFileRef { path: path.clone(), rank });
            }
        }
    }

    samples.sort_by_key(|f| f.rank);
    libmaps.sort_by_key(|f| f.rank);
    (samples, libmaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perflow_core::CallStack;
    use perflow_sampler::{LibraryEntry, StoreExporter};

    #[test]
    fn empty_run_matches_scenario_s1() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let path = exporter.write_samples(0, &[], 128, 0, false).unwrap();

        let builder = TreeBuilder::new(BuildMode::ContextFree, CountMode::Both, ConcurrencyModel::Serial);
        let report = builder
            .build(&[SampleFileRef { path, rank: 0 }], &[], || false)
            .unwrap();

        assert_eq!(report.tree.node_count(), 1);
        assert_eq!(report.tree.total_samples(), 0);
        assert_eq!(report.files_loaded, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn single_stack_run_matches_scenario_s2() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");

        // Sampler capture order is leaf-first: frame() is walked starting
        // at the deepest (innermost) address.
        let stack: CallStack = [0x3000u64, 0x2000, 0x1000].into_iter().collect();
        let sample_path = exporter.write_samples(0, &[(stack, 4)], 128, 0, false).unwrap();

        let lib_map = LibraryMap::from_entries(vec![LibraryEntry {
            library_path: "/app".into(),
            base_address: 0x1000,
            end_address: 0x4000,
            executable: true,
        }]);
        let libmap_path = exporter.write_library_maps(0, &[lib_map]).unwrap();

        let builder = TreeBuilder::new(BuildMode::ContextFree, CountMode::Exclusive, ConcurrencyModel::Serial);
        let report = builder
            .build(
                &[SampleFileRef { path: sample_path, rank: 0 }],
                &[LibraryMapFileRef { path: libmap_path, rank: 0 }],
                || false,
            )
            .unwrap();

        assert_eq!(report.tree.node_count(), 4);
        assert_eq!(report.tree.total_samples(), 4);
    }

    #[test]
    fn missing_file_is_reported_not_fatal() {
        let builder = TreeBuilder::new(BuildMode::ContextFree, CountMode::Both, ConcurrencyModel::Serial);
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let good = exporter.write_samples(0, &[], 128, 0, false).unwrap();
        let missing = dir.path().join("perflow_rank_1.pflw");

        let report = builder
            .build(
                &[SampleFileRef { path: good, rank: 0 }, SampleFileRef { path: missing, rank: 1 }],
                &[],
                || false,
            )
            .unwrap();

        assert_eq!(report.files_loaded, 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn no_files_at_all_is_an_abort() {
        let builder = TreeBuilder::new(BuildMode::ContextFree, CountMode::Both, ConcurrencyModel::Serial);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("perflow_rank_0.pflw");
        let err = builder
            .build(&[SampleFileRef { path: missing, rank: 0 }], &[], || false)
            .unwrap_err();
        assert!(matches!(err, BuildError::NoFilesLoaded));
    }

    #[test]
    fn concurrent_loading_across_ranks_matches_scenario_s4() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let mut files = Vec::new();
        for rank in 0..4u32 {
            let stack: CallStack = [0x1000u64].into_iter().collect();
            let path = exporter.write_samples(rank, &[(stack, 100)], 128, 0, false).unwrap();
            files.push(SampleFileRef { path, rank: rank as usize });
        }

        let builder = TreeBuilder::new(BuildMode::ContextFree, CountMode::Both, ConcurrencyModel::FineGrained)
            .with_num_threads(4);
        let report = builder.build(&files, &[], || false).unwrap();

        assert_eq!(report.files_loaded, 4);
        assert_eq!(report.tree.total_samples(), 400);
    }
}
