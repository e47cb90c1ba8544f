//! Amplicon sequence variants (ASVs) and pairwise diversity of one
//! candidate's amplicon set.

use crate::extract::{AmpliconRecord, SequenceView};
use itertools::Itertools;
use std::collections::HashMap;

/// A distinct amplicon sequence and the headers that produced it, in record
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantGroup {
    pub sequence: String,
    pub headers: Vec<String>,
}

/// Diversity statistics for one primer-pair candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    /// Candidate identifier, e.g. the amplicon table's file name
    pub label: String,
    pub num_input: usize,
    pub num_unique: usize,
    /// Median pairwise Hamming distance among equal-length variants
    pub median_hamming: f64,
    /// The median is the mean of two middle values (even-sized multiset)
    pub median_averaged: bool,
    /// Length of the first variant
    pub amplicon_length: usize,
    pub variants: Vec<VariantGroup>,
    /// ASVs backed by exactly one original sequence; only known once the
    /// summary has been expanded through a reference mapping
    pub unique_sources: Option<usize>,
}

impl CandidateSummary {
    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            num_input: 0,
            num_unique: 0,
            median_hamming: 0.0,
            median_averaged: false,
            amplicon_length: 0,
            variants: Vec::new(),
            unique_sources: None,
        }
    }
}

/// Hamming distance, or `None` when the lengths differ.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).filter(|(x, y)| x != y).count())
}

/// Median of a multiset; the mean of the two middle values for even sizes
/// and 0 for an empty set.
pub fn median(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted: Vec<usize> = values.iter().copied().sorted_unstable().collect();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid] as f64
    } else {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    }
}

/// Group records by amplicon sequence, preserving first-seen order.
pub fn group_variants(records: &[AmpliconRecord], view: SequenceView) -> Vec<VariantGroup> {
    let mut groups: Vec<VariantGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let sequence = record.sequence(view);
        match index.get(sequence) {
            Some(&i) => groups[i].headers.push(record.header.clone()),
            None => {
                index.insert(sequence, groups.len());
                groups.push(VariantGroup {
                    sequence: sequence.to_string(),
                    headers: vec![record.header.clone()],
                });
            }
        }
    }

    groups
}

/// Distances between every unordered pair of variants; pairs of unequal
/// length are skipped.
pub fn pairwise_distances(groups: &[VariantGroup]) -> Vec<usize> {
    groups
        .iter()
        .tuple_combinations()
        .filter_map(|(a, b)| hamming_distance(a.sequence.as_bytes(), b.sequence.as_bytes()))
        .collect()
}

/// Summarizes an amplicon set under a fixed sequence view.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiversityAnalyzer {
    view: SequenceView,
}

impl DiversityAnalyzer {
    pub fn new(view: SequenceView) -> Self {
        Self { view }
    }

    pub fn view(&self) -> SequenceView {
        self.view
    }

    pub fn analyze(&self, label: &str, records: &[AmpliconRecord]) -> CandidateSummary {
        if records.is_empty() {
            return CandidateSummary::empty(label);
        }

        let variants = group_variants(records, self.view);
        let distances = pairwise_distances(&variants);
        let amplicon_length = variants.first().map_or(0, |v| v.sequence.len());

        CandidateSummary {
            label: label.to_string(),
            num_input: records.len(),
            num_unique: variants.len(),
            median_hamming: median(&distances),
            median_averaged: !distances.is_empty() && distances.len() % 2 == 0,
            amplicon_length,
            variants,
            unique_sources: None,
        }
    }
}

/// [`DiversityAnalyzer::analyze`] over gapped amplicons.
pub fn analyze(label: &str, records: &[AmpliconRecord]) -> CandidateSummary {
    DiversityAnalyzer::default().analyze(label, records)
}
