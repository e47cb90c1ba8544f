//! Result files: amplicon tables, per-gene summaries, the cross-gene
//! best-pick table and amplicon FASTA.
//!
//! Column names and order are consumed by downstream tooling and must not
//! change.

use crate::diversity::CandidateSummary;
use crate::extract::{AmpliconRecord, SequenceView};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use polars::prelude::*;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Columns of the per-candidate amplicon tables.
pub const AMPLICON_COLUMNS: [&str; 9] = [
    "Header",
    "ForwardPrimer",
    "ReversePrimer",
    "AmpliconStart",
    "AmpliconEnd",
    "AmpliconSequence",
    "ForwardVariant",
    "ReverseVariant",
    "ErrorStatus",
];

/// Fixed leading columns of the per-gene summary table.
pub const SUMMARY_COLUMNS: [&str; 5] = [
    "PrimerPairCSV",
    "NumInputSequences",
    "NumUniqueASVs",
    "MedianHammingDistance",
    "AmpliconLength",
];

/// Written after `NumInputSequences` once headers went through a reference
/// mapping.
pub const UNIQUE_SOURCES_COLUMN: &str = "NumberOfUniqueBacteria";

/// Columns of the cross-gene best-pick table.
pub const BEST_PICK_COLUMNS: [&str; 8] = [
    "Filename",
    "PrimerPairCSV",
    "Original#ofSequences",
    "nonRedundantOriginal#ofSequences",
    "SuccessfulAmplifications",
    "NumUniqueASVs",
    "MedianHammingDistance",
    "AmpliconLength",
];

/// Render a summary's median distance. A middle element is a whole number
/// (`2`); a mean of two middle values always carries a fraction (`2.0`,
/// `2.5`).
pub fn format_median(summary: &CandidateSummary) -> String {
    let value = summary.median_hamming;
    if summary.median_averaged {
        format!("{:?}", value)
    } else {
        format!("{}", value.round() as u64)
    }
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    File::create(path).with_context(|| format!("Failed to create {:?}", path))
}

fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = create_file(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("Failed to write {:?}", path))?;
    debug!("Wrote {} rows to {:?}", df.height(), path);
    Ok(())
}

fn str_column<'a>(name: &str, values: impl Iterator<Item = &'a str>) -> Column {
    Series::new(name.into(), values.collect::<Vec<&str>>()).into()
}

fn opt_str_column<'a>(name: &str, values: impl Iterator<Item = Option<&'a str>>) -> Column {
    Series::new(name.into(), values.collect::<Vec<Option<&str>>>()).into()
}

/// Empty sequences become nulls so they are written as bare empty cells.
fn sequence_column<'a>(name: &str, values: impl Iterator<Item = &'a str>) -> Column {
    opt_str_column(name, values.map(|v| (!v.is_empty()).then_some(v)))
}

fn count_column(name: &str, values: impl Iterator<Item = usize>) -> Column {
    Series::new(name.into(), values.map(|v| v as u64).collect::<Vec<u64>>()).into()
}

/// Build the amplicon table for one candidate in the chosen view.
pub fn amplicon_frame(records: &[AmpliconRecord], view: SequenceView) -> Result<DataFrame> {
    let [header, fwd, rev, start, end, seq, fwd_var, rev_var, status] = AMPLICON_COLUMNS;
    let df = DataFrame::new(vec![
        str_column(header, records.iter().map(|r| r.header.as_str())),
        str_column(fwd, records.iter().map(|r| r.forward_primer.as_str())),
        str_column(rev, records.iter().map(|r| r.reverse_primer.as_str())),
        count_column(start, records.iter().map(|r| r.start)),
        count_column(end, records.iter().map(|r| r.end)),
        sequence_column(seq, records.iter().map(|r| r.sequence(view))),
        opt_str_column(fwd_var, records.iter().map(|r| r.forward_variant.as_deref())),
        opt_str_column(rev_var, records.iter().map(|r| r.reverse_variant.as_deref())),
        str_column(status, records.iter().map(|r| r.status.as_str())),
    ])?;
    Ok(df)
}

pub fn write_amplicon_table(path: &Path, records: &[AmpliconRecord], view: SequenceView) -> Result<()> {
    let mut df = amplicon_frame(records, view)?;
    write_csv(path, &mut df)
}

/// Build the per-gene summary table. ASV columns are sized to the largest
/// variant count among `summaries`; shorter rows leave them empty.
///
/// Mapped summaries get `NumberOfUniqueBacteria` as the third column.
pub fn summary_frame(summaries: &[CandidateSummary]) -> Result<DataFrame> {
    let [label, inputs, unique, median, length] = SUMMARY_COLUMNS;
    let mut columns = vec![
        str_column(label, summaries.iter().map(|s| s.label.as_str())),
        count_column(inputs, summaries.iter().map(|s| s.num_input)),
    ];
    if summaries.iter().any(|s| s.unique_sources.is_some()) {
        columns.push(
            Series::new(
                UNIQUE_SOURCES_COLUMN.into(),
                summaries
                    .iter()
                    .map(|s| s.unique_sources.map(|v| v as u64))
                    .collect::<Vec<Option<u64>>>(),
            )
            .into(),
        );
    }
    columns.extend([
        count_column(unique, summaries.iter().map(|s| s.num_unique)),
        Series::new(
            median.into(),
            summaries.iter().map(format_median).collect::<Vec<String>>(),
        )
        .into(),
        count_column(length, summaries.iter().map(|s| s.amplicon_length)),
    ]);

    let max_variants = summaries.iter().map(|s| s.variants.len()).max().unwrap_or(0);
    for n in 1..=max_variants {
        let idx = n - 1;
        let tag = format!("ASV_{}", n);
        let tags: Vec<Option<String>> = summaries
            .iter()
            .map(|s| (idx < s.variants.len()).then(|| tag.clone()))
            .collect();
        let sequences: Vec<Option<String>> = summaries
            .iter()
            .map(|s| {
                s.variants
                    .get(idx)
                    .filter(|v| !v.sequence.is_empty())
                    .map(|v| v.sequence.clone())
            })
            .collect();
        let headers: Vec<Option<String>> = summaries
            .iter()
            .map(|s| s.variants.get(idx).map(|v| v.headers.iter().join(", ")))
            .collect();

        columns.push(Series::new(tag.as_str().into(), tags).into());
        columns.push(Series::new(format!("{}_Sequence", tag).into(), sequences).into());
        columns.push(Series::new(format!("{}_Headers", tag).into(), headers).into());
    }

    Ok(DataFrame::new(columns)?)
}

pub fn write_summary_table(path: &Path, summaries: &[CandidateSummary]) -> Result<()> {
    let mut df = summary_frame(summaries)?;
    write_csv(path, &mut df)
}

/// Build the best-pick table, one row per gene. Each pick names the summary
/// file it was taken from. Only the sequence count of the summary is known;
/// the non-redundant and amplification counts are written as 0.
pub fn best_pick_frame(picks: &[(String, CandidateSummary)]) -> Result<DataFrame> {
    let [file, label, inputs, non_redundant, amplified, unique, median, length] =
        BEST_PICK_COLUMNS;
    let df = DataFrame::new(vec![
        str_column(file, picks.iter().map(|(f, _)| f.as_str())),
        str_column(label, picks.iter().map(|(_, s)| s.label.as_str())),
        count_column(inputs, picks.iter().map(|(_, s)| s.num_input)),
        count_column(non_redundant, picks.iter().map(|_| 0)),
        count_column(amplified, picks.iter().map(|_| 0)),
        count_column(unique, picks.iter().map(|(_, s)| s.num_unique)),
        Series::new(
            median.into(),
            picks
                .iter()
                .map(|(_, s)| format_median(s))
                .collect::<Vec<String>>(),
        )
        .into(),
        count_column(length, picks.iter().map(|(_, s)| s.amplicon_length)),
    ])?;
    Ok(df)
}

pub fn write_best_picks(path: &Path, picks: &[(String, CandidateSummary)]) -> Result<()> {
    let mut df = best_pick_frame(picks)?;
    write_csv(path, &mut df)
}

/// Write one FASTA record per amplicon, unwrapped.
pub fn write_amplicon_fasta(path: &Path, records: &[AmpliconRecord], view: SequenceView) -> Result<()> {
    let mut writer = BufWriter::new(create_file(path)?);
    for record in records {
        writeln!(writer, ">{}", record.header)?;
        writeln!(writer, "{}", record.sequence(view))?;
    }
    writer.flush()?;
    Ok(())
}
