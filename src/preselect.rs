//! Choice of the candidate file to amplify when the primer-design tool was
//! run with several parameter sets.
//!
//! Each run leaves a `<stem>.json` candidate file and a `<stem>.csv` table
//! describing the designed amplicons. The run whose table lists the most
//! amplicons no longer than the length limit is amplified.

use anyhow::{Context, Result};
use log::{debug, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// A candidate JSON and its primer-design table, if one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub json: PathBuf,
    pub companion: Option<PathBuf>,
}

impl CandidateFile {
    /// File stem used to label the candidates of this file.
    pub fn stem(&self) -> String {
        self.json
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Every `*.json` in `dir`, sorted by name, paired with `<stem>.csv`.
pub fn discover_candidate_files(dir: &Path) -> Result<Vec<CandidateFile>> {
    let mut files: Vec<CandidateFile> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .map(|json| {
            let csv = json.with_extension("csv");
            CandidateFile {
                companion: csv.is_file().then_some(csv),
                json,
            }
        })
        .collect();
    files.sort_by(|a, b| a.json.cmp(&b.json));
    Ok(files)
}

/// Name of the amplicon length column: the first whose lowercased, trimmed
/// name contains "length" together with "amplicon" or "effective".
pub fn length_column<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    names.into_iter().find(|name| {
        let lower = name.trim().to_lowercase();
        lower.contains("length") && (lower.contains("amplicon") || lower.contains("effective"))
    })
}

/// Count amplicons of at most `max_length` in a primer-design table.
///
/// Returns `None` when the table has no recognizable length column.
/// Non-numeric cells are ignored.
pub fn count_short_amplicons(table: &Path, max_length: usize) -> Result<Option<usize>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(table.to_path_buf()))?
        .finish()
        .with_context(|| format!("Failed to parse primer-design table {:?}", table))?;

    let names: Vec<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
    let Some(column) = length_column(names.iter().copied()) else {
        return Ok(None);
    };
    debug!("{:?}: using length column '{}'", table, column);

    let lengths = df
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let count = lengths
        .f64()?
        .into_iter()
        .flatten()
        .filter(|&len| len <= max_length as f64)
        .count();

    Ok(Some(count))
}

/// Pick the candidate file with the most short amplicons; on ties the first
/// file (by name) is kept. Files without a companion table, without a length
/// column, or with an unreadable table are passed over.
pub fn preselect(files: &[CandidateFile], max_length: usize) -> Option<(&CandidateFile, usize)> {
    let mut best: Option<(&CandidateFile, usize)> = None;

    for file in files {
        let Some(table) = &file.companion else {
            debug!("{:?} has no primer-design table", file.json);
            continue;
        };
        match count_short_amplicons(table, max_length) {
            Ok(Some(count)) => {
                debug!("{:?}: {} amplicons <= {} bp", table, count, max_length);
                if best.map_or(true, |(_, top)| count > top) {
                    best = Some((file, count));
                }
            }
            Ok(None) => debug!("{:?} has no amplicon length column", table),
            Err(e) => warn!("Failed to read {:?}: {:#}", table, e),
        }
    }

    best
}
