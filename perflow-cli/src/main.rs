mod cli;
mod report;

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use perflow_analysis::{discover_rank_files, TreeBuilder};
use perflow_symbols::SymbolResolver;

fn main() {
    env_logger::init();
    let opt = cli::Opt::parse();

    if let Err(err) = std::fs::create_dir_all(&opt.output) {
        eprintln!("output directory {} is not writable: {}", opt.output.display(), err);
        std::process::exit(1);
    }

    let (sample_files, library_map_files) = discover_rank_files(&opt.input_dir, &opt.prefix);
    if sample_files.is_empty() {
        eprintln!("no sample files matching prefix {:?} found in {}", opt.prefix, opt.input_dir.display());
        std::process::exit(1);
    }
    info!("discovered {} sample file(s), {} library-map file(s)", sample_files.len(), library_map_files.len());

    let mut builder = TreeBuilder::new(opt.mode.into(), opt.count_mode.into(), opt.concurrency.into())
        .with_num_threads(opt.num_threads)
        .with_time_per_sample_micros(opt.time_per_sample_micros);
    if opt.resolve_symbols {
        builder = builder.with_symbol_resolver(Arc::new(SymbolResolver::new()));
    }

    let build_result = builder.build(&sample_files, &library_map_files, || false);
    let report = match build_result {
        Ok(report) => report,
        Err(err) => {
            error!("analysis aborted: {err}");
            eprintln!("analysis aborted: {err}");
            std::process::exit(1);
        }
    };

    for failure in &report.failures {
        error!("rank {} ({}): {}", failure.rank, failure.path.display(), failure.message);
    }

    let text = report::render(&report, opt.top_n);
    print!("{text}");

    let report_path = opt.output.join("report.txt");
    if let Err(err) = std::fs::write(&report_path, &text) {
        eprintln!("could not write {}: {}", report_path.display(), err);
        std::process::exit(1);
    }
}
