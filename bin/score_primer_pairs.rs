//! Score candidate primer pairs by the amplicon diversity they recover.
//!
//! For each gene directory the alignment is amplified in silico with every
//! candidate primer pair, amplicons are collapsed into ASVs, and the pair
//! with the most ASVs below the length limit is reported.
//!
//! # Usage
//!
//! ```bash
//! score-primer-pairs batch genes/ -o genes_AmpliconAnalysis -t 8 -v
//! score-primer-pairs gene genes/rpoB --view dashless
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls logging verbosity (overrides `-v`)
//! - `RAYON_NUM_THREADS`: Overrides default thread count

use amplicon_diversity::{
    logging::{self, LOG_FILE_NAME},
    output::format_median,
    pipeline::{best_pick_path, run_batch, run_gene, GeneOutcome, PipelineConfig, RunStats},
    SequenceView,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "score-primer-pairs")]
#[command(version, about = "Score candidate primer pairs by in-silico amplicon diversity")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every gene directory inside a folder
    Batch {
        /// Folder holding one sub-directory per gene
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },
    /// Process a single gene directory
    Gene {
        /// Gene directory with alignment and candidate files
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(clap::Args, Debug)]
struct RunOptions {
    /// Output folder (default: <input>_AmpliconAnalysis)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Amplicons must be shorter than this to be selected
    #[arg(long, default_value = "500")]
    max_amplicon_length: usize,

    /// Number of threads (default: half of available cores)
    #[arg(short = 't', long, default_value_t = default_threads())]
    threads: usize,

    /// Amplicon representation used for ASVs and distances
    #[arg(long, default_value = "gapped")]
    view: ViewArg,

    /// Amplify every candidate JSON instead of the preselected one
    #[arg(long)]
    all_candidate_files: bool,

    /// Drop sequences whose primer sites contain no known variant
    #[arg(long)]
    require_variants: bool,

    /// Columns added on each side of a range for the second search pass
    #[arg(long, default_value = "20")]
    flank: usize,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ViewArg {
    Gapped,
    Dashless,
}

impl From<ViewArg> for SequenceView {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Gapped => SequenceView::Gapped,
            ViewArg::Dashless => SequenceView::Dashless,
        }
    }
}

impl Command {
    fn input(&self) -> &Path {
        match self {
            Command::Batch { input, .. } | Command::Gene { input, .. } => input,
        }
    }

    fn options(&self) -> &RunOptions {
        match self {
            Command::Batch { options, .. } | Command::Gene { options, .. } => options,
        }
    }

    fn output(&self) -> PathBuf {
        self.options().output.clone().unwrap_or_else(|| {
            let input = self.input();
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());
            input.with_file_name(format!("{}_AmpliconAnalysis", name))
        })
    }
}

fn default_threads() -> usize {
    std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| (num_cpus::get() / 2).max(1))
}

/// Validate command-line arguments
fn validate_args(args: &Args) -> Result<()> {
    debug!("Validating command-line arguments");

    let input = args.command.input();
    if !input.is_dir() {
        anyhow::bail!("Input directory does not exist: {:?}", input);
    }

    let options = args.command.options();
    if options.threads == 0 {
        anyhow::bail!("Thread count must be at least 1");
    }
    if options.max_amplicon_length == 0 {
        anyhow::bail!("Maximum amplicon length must be greater than 0");
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    validate_args(&args)?;

    let output = args.command.output();
    std::fs::create_dir_all(&output)?;
    let log_file = match args.command {
        Command::Batch { .. } => Some(logging::open_log_file(&output.join(LOG_FILE_NAME))?),
        Command::Gene { .. } => None,
    };
    logging::init(args.verbose, log_file.clone());

    let options = args.command.options();
    let config = PipelineConfig {
        max_amplicon_length: options.max_amplicon_length,
        view: options.view.into(),
        flank: options.flank,
        require_variants: options.require_variants,
        all_candidate_files: options.all_candidate_files,
        threads: options.threads,
    };

    info!("=== Amplicon Analysis Started ===");
    info!("Input: {:?}", args.command.input());
    info!("Output: {:?}", output);
    info!("Threads: {}", config.threads);
    info!("Max amplicon length: {} bp", config.max_amplicon_length);
    info!("Sequence view: {:?}", config.view);

    let stats = RunStats::default();
    match &args.command {
        Command::Batch { input, .. } => {
            let picks = run_batch(input, &output, &config, &stats)?;
            for (gene, best) in &picks {
                info!(
                    "{}: {} ({} ASVs, median distance {})",
                    gene,
                    best.label,
                    best.num_unique,
                    format_median(best)
                );
            }
            info!("Best-pick table: {:?}", best_pick_path(input, &output));
        }
        Command::Gene { input, .. } => {
            if let GeneOutcome::Selected(best) = run_gene(input, &output, &config, &stats)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    best.label,
                    best.num_unique,
                    format_median(&best),
                    best.amplicon_length
                );
            }
        }
    }

    stats.report(&mut std::io::stderr())?;
    if let Some(file) = &log_file {
        if let Ok(mut file) = file.lock() {
            stats.report(&mut *file)?;
        }
    }

    info!("=== Amplicon Analysis Finished ===");
    Ok(())
}
