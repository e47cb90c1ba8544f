//! Gene and batch orchestration.
//!
//! A batch is a folder of gene directories. Every gene directory holds one
//! alignment (`*.filt.mc.fasta`, optionally gzipped), one or more candidate
//! JSON files with their primer-design tables, and optionally a reference
//! mapping. Genes run in parallel and so do the candidates inside a gene.
//! A failing gene or candidate is logged and counted; it never stops its
//! siblings.

use crate::candidate::{load_candidates, CandidatePair};
use crate::diversity::{CandidateSummary, DiversityAnalyzer};
use crate::extract::{AmpliconExtractor, Amplification, ErrorStatus, SequenceView};
use crate::locate::{PrimerLocator, DEFAULT_FLANK};
use crate::mapping::ReferenceMapping;
use crate::output;
use crate::preselect::{discover_candidate_files, preselect, CandidateFile};
use crate::select::{select, DEFAULT_MAX_AMPLICON_LENGTH};
use crate::sequence::SequenceStore;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Sub-directory of a batch folder that holds shared mapping tables rather
/// than a gene.
pub const REFERENCE_MAPPINGS_DIR: &str = "reference_mappings";

/// Suffix identifying the alignment inside a gene directory.
pub const ALIGNMENT_SUFFIX: &str = ".filt.mc.fasta";

pub const SUMMARY_FILE_NAME: &str = "amplicon.summary.csv";

/// Settings shared by every unit of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Amplicons must be strictly shorter than this to be selected
    pub max_amplicon_length: usize,
    pub view: SequenceView,
    pub flank: usize,
    pub require_variants: bool,
    /// Process every candidate file instead of the preselected one
    pub all_candidate_files: bool,
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_amplicon_length: DEFAULT_MAX_AMPLICON_LENGTH,
            view: SequenceView::default(),
            flank: DEFAULT_FLANK,
            require_variants: false,
            all_candidate_files: false,
            threads: 1,
        }
    }
}

impl PipelineConfig {
    fn extractor(&self) -> AmpliconExtractor {
        AmpliconExtractor::new(PrimerLocator::new(self.flank), self.require_variants)
    }
}

/// Run-level counters, safe to update from worker threads.
#[derive(Debug, Default)]
pub struct RunStats {
    pub genes_successful: AtomicUsize,
    pub genes_failed: AtomicUsize,
    pub genes_skipped: AtomicUsize,
    pub candidates_successful: AtomicUsize,
    pub candidates_failed: AtomicUsize,
    /// Sequences dropped by variant screening
    pub screened_out: AtomicUsize,
    rows_by_status: [AtomicUsize; 5],
}

impl RunStats {
    pub fn record_amplification(&self, amplification: &Amplification) {
        for record in &amplification.records {
            self.rows_by_status[record.status as usize].fetch_add(1, Ordering::Relaxed);
        }
        self.screened_out
            .fetch_add(amplification.screened_out, Ordering::Relaxed);
    }

    pub fn rows_with_status(&self, status: ErrorStatus) -> usize {
        self.rows_by_status[status as usize].load(Ordering::Relaxed)
    }

    pub fn report(&self, output: &mut dyn Write) -> std::io::Result<()> {
        let ok = self.genes_successful.load(Ordering::Relaxed);
        let failed = self.genes_failed.load(Ordering::Relaxed);
        let skipped = self.genes_skipped.load(Ordering::Relaxed);

        writeln!(output, "\nAmplicon Analysis Statistics:")?;
        writeln!(output, "  Genes processed: {}", ok + failed + skipped)?;
        writeln!(output, "    Successful: {}", ok)?;
        writeln!(output, "    Failed: {}", failed)?;
        writeln!(output, "    Skipped: {}", skipped)?;
        writeln!(
            output,
            "  Candidates successful: {}",
            self.candidates_successful.load(Ordering::Relaxed)
        )?;
        writeln!(
            output,
            "  Candidates failed: {}",
            self.candidates_failed.load(Ordering::Relaxed)
        )?;

        let total: usize = ErrorStatus::ALL
            .iter()
            .map(|&s| self.rows_with_status(s))
            .sum();
        writeln!(output, "\nAmplicon rows: {}", total)?;
        for status in ErrorStatus::ALL {
            let count = self.rows_with_status(status);
            if total > 0 {
                writeln!(
                    output,
                    "  {}: {} ({:.2}%)",
                    status,
                    count,
                    100.0 * count as f64 / total as f64
                )?;
            } else {
                writeln!(output, "  {}: 0", status)?;
            }
        }
        writeln!(
            output,
            "  Screened out (no primer variant): {}",
            self.screened_out.load(Ordering::Relaxed)
        )?;

        Ok(())
    }
}

/// How a gene directory ended.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneOutcome {
    Selected(CandidateSummary),
    /// Processed, but no candidate passed the length filter
    NoSelection,
    Skipped(String),
}

/// Gene directories of a batch folder, sorted by name.
pub fn gene_dirs(input: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("Failed to list {:?}", input))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !path.ends_with(REFERENCE_MAPPINGS_DIR))
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// First alignment file in `dir`, plain or gzipped.
pub fn find_alignment(dir: &Path) -> Result<Option<PathBuf>> {
    let gz_suffix = format!("{}.gz", ALIGNMENT_SUFFIX);
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(ALIGNMENT_SUFFIX) || name.ends_with(&gz_suffix))
        })
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

/// Summary written after reference-mapping expansion.
pub fn processed_file_name(gene: &str) -> String {
    format!("{}_processed_amplicon.csv", gene)
}

/// File a gene's best pick was ranked from.
pub fn ranked_file_name(gene: &str, best: &CandidateSummary) -> String {
    if best.unique_sources.is_some() {
        processed_file_name(gene)
    } else {
        SUMMARY_FILE_NAME.to_string()
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct CandidateJob {
    label: String,
    pair: Result<CandidatePair>,
}

/// Candidate files to amplify, or the reason the gene is skipped.
fn choose_candidate_files(
    dir: &Path,
    config: &PipelineConfig,
) -> Result<std::result::Result<Vec<CandidateFile>, String>> {
    let files = discover_candidate_files(dir)?;
    if files.is_empty() {
        return Ok(Err("no candidate JSON files".to_string()));
    }
    if config.all_candidate_files {
        return Ok(Ok(files));
    }

    match preselect(&files, config.max_amplicon_length) {
        Some((best, count)) => {
            info!(
                "Using {:?} ({} amplicons <= {} bp)",
                best.json, count, config.max_amplicon_length
            );
            Ok(Ok(vec![best.clone()]))
        }
        None => Ok(Err(
            "no candidate file has a primer-design table with an amplicon length column"
                .to_string(),
        )),
    }
}

fn candidate_jobs(files: &[CandidateFile], prefix_with_stem: bool) -> Vec<CandidateJob> {
    let mut jobs = Vec::new();
    for file in files {
        let prefix = if prefix_with_stem {
            format!("{}_", file.stem())
        } else {
            String::new()
        };
        match load_candidates(&file.json) {
            Ok(entries) => jobs.extend(entries.into_iter().map(|(index, pair)| CandidateJob {
                label: format!("{}amplicon_{}.csv", prefix, index),
                pair,
            })),
            Err(e) => warn!("Skipping candidate file {:?}: {:#}", file.json, e),
        }
    }
    jobs
}

fn run_candidate(
    job: &CandidateJob,
    store: &SequenceStore,
    out_dir: &Path,
    config: &PipelineConfig,
    stats: &RunStats,
) -> Result<CandidateSummary> {
    let pair = job
        .pair
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Malformed candidate: {:#}", e))?;
    debug!(
        "{}: forward {} at {}, reverse {} at {}",
        job.label, pair.forward.pattern, pair.forward.range, pair.reverse.pattern, pair.reverse.range
    );

    let amplification = config.extractor().amplify(pair, store);
    stats.record_amplification(&amplification);
    let records = &amplification.records;

    let stem = job.label.trim_end_matches(".csv");
    output::write_amplicon_table(
        &out_dir.join("output").join(&job.label),
        records,
        SequenceView::Gapped,
    )?;
    output::write_amplicon_table(
        &out_dir.join(format!("{}_dashless.csv", stem)),
        records,
        SequenceView::Dashless,
    )?;
    output::write_amplicon_fasta(
        &out_dir
            .join("aligned_amplicons")
            .join(format!("aligned_{}.fasta", job.label)),
        records,
        config.view,
    )?;

    let exact = records
        .iter()
        .filter(|r| r.status == ErrorStatus::Ok)
        .count();
    info!(
        "{}: {} matching sequences ({} with both primers placed)",
        job.label,
        records.len(),
        exact
    );

    Ok(DiversityAnalyzer::new(config.view).analyze(&job.label, records))
}

/// Process one gene directory, writing its results into `out_dir`.
pub fn process_gene(
    dir: &Path,
    out_dir: &Path,
    config: &PipelineConfig,
    stats: &RunStats,
) -> Result<GeneOutcome> {
    let gene = dir_name(dir);
    info!("=== Processing gene {} ===", gene);

    let Some(alignment) = find_alignment(dir)? else {
        return Ok(GeneOutcome::Skipped(format!(
            "no *{} alignment",
            ALIGNMENT_SUFFIX
        )));
    };
    let files = match choose_candidate_files(dir, config)? {
        Ok(files) => files,
        Err(reason) => return Ok(GeneOutcome::Skipped(reason)),
    };

    let store = SequenceStore::from_path(&alignment)?;
    if store.is_empty() {
        anyhow::bail!("Alignment {:?} contains no sequences", alignment);
    }
    info!(
        "{}: {} sequences, {} columns",
        gene,
        store.len(),
        store.width()
    );

    let jobs = candidate_jobs(&files, config.all_candidate_files);
    if jobs.is_empty() {
        anyhow::bail!("No candidate primer pairs could be read for {}", gene);
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    let summaries: Vec<CandidateSummary> = jobs
        .par_iter()
        .map(|job| match run_candidate(job, &store, out_dir, config, stats) {
            Ok(summary) => {
                stats.candidates_successful.fetch_add(1, Ordering::Relaxed);
                Some(summary)
            }
            Err(e) => {
                error!("{} {}: {:#}", gene, job.label, e);
                stats.candidates_failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    if summaries.is_empty() {
        anyhow::bail!("Every candidate primer pair of {} failed", gene);
    }
    output::write_summary_table(&out_dir.join(SUMMARY_FILE_NAME), &summaries)?;

    let ranked = match ReferenceMapping::find_in_dir(dir)? {
        Some(path) => {
            let mapping = ReferenceMapping::from_path(&path)?;
            info!(
                "{}: expanding headers through {} representatives from {:?}",
                gene,
                mapping.len(),
                path
            );
            let processed: Vec<CandidateSummary> =
                summaries.iter().map(|s| mapping.apply(s, &gene)).collect();
            output::write_summary_table(
                &out_dir.join(processed_file_name(&gene)),
                &processed,
            )?;
            processed
        }
        None => summaries,
    };

    match select(&ranked, config.max_amplicon_length) {
        Some(best) => {
            info!(
                "{}: best pair {} ({} ASVs, median distance {}, {} bp)",
                gene,
                best.label,
                best.num_unique,
                output::format_median(best),
                best.amplicon_length
            );
            Ok(GeneOutcome::Selected(best.clone()))
        }
        None => {
            warn!(
                "{}: no candidate shorter than {} bp",
                gene, config.max_amplicon_length
            );
            Ok(GeneOutcome::NoSelection)
        }
    }
}

fn thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Failed to build worker pool")
}

/// Process a single gene directory with its own worker pool.
pub fn run_gene(
    dir: &Path,
    out_dir: &Path,
    config: &PipelineConfig,
    stats: &RunStats,
) -> Result<GeneOutcome> {
    let pool = thread_pool(config.threads)?;
    let outcome = pool.install(|| process_gene(dir, out_dir, config, stats));
    match &outcome {
        Ok(GeneOutcome::Skipped(reason)) => {
            warn!("Skipping {:?}: {}", dir, reason);
            stats.genes_skipped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(_) => {
            stats.genes_successful.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!("Failed to process {:?}: {:#}", dir, e);
            stats.genes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    outcome
}

/// Path of the cross-gene best-pick table for a batch folder.
pub fn best_pick_path(input: &Path, output: &Path) -> PathBuf {
    output.join(format!("{}_best_amplicon_summary.csv", dir_name(input)))
}

/// Process every gene directory under `input`, writing per-gene results to
/// `<output>/<gene>/` and the best pick of each gene to the best-pick table.
///
/// Returns the `(gene, best summary)` pairs in gene-name order.
pub fn run_batch(
    input: &Path,
    output: &Path,
    config: &PipelineConfig,
    stats: &RunStats,
) -> Result<Vec<(String, CandidateSummary)>> {
    let dirs = gene_dirs(input)?;
    info!("Found {} gene directories in {:?}", dirs.len(), input);
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {:?}", output))?;

    let pool = thread_pool(config.threads)?;
    let outcomes: Vec<(String, Result<GeneOutcome>)> = pool.install(|| {
        dirs.par_iter()
            .map(|dir| {
                let gene = dir_name(dir);
                let outcome = process_gene(dir, &output.join(&gene), config, stats);
                (gene, outcome)
            })
            .collect()
    });

    let mut picks = Vec::new();
    for (gene, outcome) in outcomes {
        match outcome {
            Ok(GeneOutcome::Selected(best)) => {
                stats.genes_successful.fetch_add(1, Ordering::Relaxed);
                picks.push((gene, best));
            }
            Ok(GeneOutcome::NoSelection) => {
                stats.genes_successful.fetch_add(1, Ordering::Relaxed);
            }
            Ok(GeneOutcome::Skipped(reason)) => {
                warn!("Skipping {}: {}", gene, reason);
                stats.genes_skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", gene, e);
                stats.genes_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let best_path = best_pick_path(input, output);
    let rows: Vec<(String, CandidateSummary)> = picks
        .iter()
        .map(|(gene, best)| (ranked_file_name(gene, best), best.clone()))
        .collect();
    output::write_best_picks(&best_path, &rows)?;
    info!("Best primer pairs for {} genes written to {:?}", picks.len(), best_path);

    Ok(picks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::AmpliconRecord;

    fn row(status: ErrorStatus) -> AmpliconRecord {
        AmpliconRecord {
            header: "s".to_string(),
            forward_primer: "A".to_string(),
            reverse_primer: "T".to_string(),
            start: 1,
            end: 2,
            gapped: "C".to_string(),
            dashless: "C".to_string(),
            forward_variant: None,
            reverse_variant: None,
            status,
        }
    }

    #[test]
    fn test_stats_report() {
        let stats = RunStats::default();
        stats.genes_successful.fetch_add(2, Ordering::Relaxed);
        stats.genes_skipped.fetch_add(1, Ordering::Relaxed);
        stats.record_amplification(&Amplification {
            records: vec![
                row(ErrorStatus::Ok),
                row(ErrorStatus::Ok),
                row(ErrorStatus::Ok),
                row(ErrorStatus::ReversePrimerNotFound),
            ],
            screened_out: 2,
        });

        assert_eq!(stats.rows_with_status(ErrorStatus::Ok), 3);
        assert_eq!(stats.rows_with_status(ErrorStatus::ReversePrimerNotFound), 1);
        assert_eq!(stats.rows_with_status(ErrorStatus::UsingRangeBoundaries), 0);

        let mut buf = Vec::new();
        stats.report(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Genes processed: 3"));
        assert!(text.contains("Skipped: 1"));
        assert!(text.contains("OK: 3 (75.00%)"));
        assert!(text.contains("REVERSE_PRIMER_NOT_FOUND: 1 (25.00%)"));
        assert!(text.contains("Screened out (no primer variant): 2"));
    }

    #[test]
    fn test_empty_stats_report() {
        let mut buf = Vec::new();
        RunStats::default().report(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Amplicon rows: 0"));
        assert!(text.contains("OK: 0\n"));
    }

    #[test]
    fn test_gene_dirs_skip_mapping_folder() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["rpoB", "gyrB", REFERENCE_MAPPINGS_DIR] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let names: Vec<String> = gene_dirs(dir.path())
            .unwrap()
            .iter()
            .map(|p| dir_name(p))
            .collect();
        assert_eq!(names, vec!["gyrB", "rpoB"]);
    }

    #[test]
    fn test_find_alignment() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_alignment(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join("rpoB.fasta"), ">a\nACGT\n").unwrap();
        assert!(find_alignment(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join("rpoB.filt.mc.fasta.gz"), "").unwrap();
        let found = find_alignment(dir.path()).unwrap().unwrap();
        assert_eq!(dir_name(&found), "rpoB.filt.mc.fasta.gz");
    }

    #[test]
    fn test_gene_without_alignment_is_skipped() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let stats = RunStats::default();

        let outcome = run_gene(input.path(), out.path(), &PipelineConfig::default(), &stats).unwrap();
        assert!(matches!(outcome, GeneOutcome::Skipped(_)));
        assert_eq!(stats.genes_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_gene_without_design_table_is_skipped() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("g.filt.mc.fasta"), ">a\nACGT\n").unwrap();
        std::fs::write(input.path().join("primers.json"), "{}").unwrap();

        let stats = RunStats::default();
        let outcome = process_gene(input.path(), out.path(), &PipelineConfig::default(), &stats).unwrap();
        assert!(matches!(outcome, GeneOutcome::Skipped(reason) if reason.contains("length column")));
    }
}
