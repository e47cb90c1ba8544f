//! Amplicon boundaries, outcome classification and per-sequence records.

use crate::candidate::CandidatePair;
use crate::locate::{PrimerLocator, PrimerMatch};
use crate::sequence::{reverse_complement, strip_gaps, AlignedSequence, SequenceStore};
use log::debug;
use rayon::prelude::*;
use std::fmt;

/// Outcome of amplifying one sequence with one primer pair.
///
/// Only `Ok` means both primers were placed exactly; every other status still
/// yields a row, built from the nominal range boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    Ok,
    /// Forward primer absent from every search window
    ForwardPrimerNotFound,
    /// Reverse primer absent from every search window
    ReversePrimerNotFound,
    /// Forward primer ends at or after the reverse primer start
    PrimersOverlapOrWrongOrder,
    /// Coordinates came from the nominal ranges rather than exact matches
    UsingRangeBoundaries,
}

impl ErrorStatus {
    pub const ALL: [ErrorStatus; 5] = [
        ErrorStatus::Ok,
        ErrorStatus::ForwardPrimerNotFound,
        ErrorStatus::ReversePrimerNotFound,
        ErrorStatus::PrimersOverlapOrWrongOrder,
        ErrorStatus::UsingRangeBoundaries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Ok => "OK",
            ErrorStatus::ForwardPrimerNotFound => "FORWARD_PRIMER_NOT_FOUND",
            ErrorStatus::ReversePrimerNotFound => "REVERSE_PRIMER_NOT_FOUND",
            ErrorStatus::PrimersOverlapOrWrongOrder => "PRIMERS_OVERLAP_OR_WRONG_ORDER",
            ErrorStatus::UsingRangeBoundaries => "USING_RANGE_BOUNDARIES",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which representation of an amplicon downstream steps should consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceView {
    /// Raw alignment slice, gaps included (length-consistent across sequences)
    #[default]
    Gapped,
    /// Gaps removed
    Dashless,
}

/// Amplicon coordinates (half-open, alignment space) and their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmpliconBounds {
    pub start: usize,
    pub end: usize,
    pub status: ErrorStatus,
}

impl AmpliconBounds {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Decide amplicon boundaries from the located primers.
///
/// The amplicon excludes both primers: it runs from the column after the
/// forward primer up to (not including) the first reverse primer column.
/// Whenever that is not possible the nominal boundaries
/// `[range_fwd_end + 1, range_rev_start)` are used instead.
pub fn classify(
    fwd: Option<&PrimerMatch>,
    rev: Option<&PrimerMatch>,
    range_fwd_end: usize,
    range_rev_start: usize,
) -> AmpliconBounds {
    let mut status = match (fwd, rev) {
        (None, _) => ErrorStatus::ForwardPrimerNotFound,
        (_, None) => ErrorStatus::ReversePrimerNotFound,
        (Some(f), Some(r)) if f.end >= r.start => ErrorStatus::PrimersOverlapOrWrongOrder,
        _ => ErrorStatus::Ok,
    };

    match (fwd, rev) {
        (Some(f), Some(r)) if f.end < r.start => AmpliconBounds {
            start: f.end + 1,
            end: r.start,
            status,
        },
        _ => {
            // Unreachable while every fallback carries a failure status; keeps
            // USING_RANGE_BOUNDARIES in the written vocabulary.
            if status == ErrorStatus::Ok {
                status = ErrorStatus::UsingRangeBoundaries;
            }
            AmpliconBounds {
                start: range_fwd_end.saturating_add(1),
                end: range_rev_start,
                status,
            }
        }
    }
}

/// One row of the per-candidate amplicon table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmpliconRecord {
    pub header: String,
    pub forward_primer: String,
    pub reverse_primer: String,
    pub start: usize,
    pub end: usize,
    /// Raw alignment slice; empty when `start >= end`
    pub gapped: String,
    pub dashless: String,
    pub forward_variant: Option<String>,
    pub reverse_variant: Option<String>,
    pub status: ErrorStatus,
}

impl AmpliconRecord {
    pub fn sequence(&self, view: SequenceView) -> &str {
        match view {
            SequenceView::Gapped => &self.gapped,
            SequenceView::Dashless => &self.dashless,
        }
    }
}

/// Build the record for one sequence from already-located primers.
pub fn extract(
    pair: &CandidatePair,
    fwd: Option<&PrimerMatch>,
    rev: Option<&PrimerMatch>,
    sequence: &AlignedSequence,
    variants: (Option<String>, Option<String>),
) -> AmpliconRecord {
    let bounds = classify(fwd, rev, pair.forward.range.end, pair.reverse.range.start);
    let raw = if bounds.is_empty() {
        &[][..]
    } else {
        sequence.slice(bounds.start..bounds.end)
    };
    let (forward_variant, reverse_variant) = variants;

    AmpliconRecord {
        header: sequence.id().to_string(),
        forward_primer: pair.forward.pattern.clone(),
        reverse_primer: pair.reverse.pattern.clone(),
        start: bounds.start,
        end: bounds.end,
        gapped: String::from_utf8_lossy(raw).into_owned(),
        dashless: String::from_utf8_lossy(&strip_gaps(raw)).into_owned(),
        forward_variant,
        reverse_variant,
        status: bounds.status,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Find the concrete primer variants present around the expected sites.
///
/// The forward site is the gap-stripped slice `[fstart - 1, fend + 2)`; the
/// first forward variant occurring in it wins. The reverse site is handled
/// the same way, except that variants are reverse complemented before the
/// lookup.
pub fn screen_variants(
    pair: &CandidatePair,
    sequence: &AlignedSequence,
) -> (Option<String>, Option<String>) {
    let site = |start: usize, end: usize| {
        strip_gaps(sequence.slice(start.saturating_sub(1)..end.saturating_add(2)))
    };
    let fwd_site = site(pair.forward.range.start, pair.forward.range.end);
    let rev_site = site(pair.reverse.range.start, pair.reverse.range.end);

    let forward = pair
        .forward
        .variants
        .iter()
        .find(|v| contains(&fwd_site, v.as_bytes()))
        .cloned();
    let reverse = pair
        .reverse
        .variants
        .iter()
        .find(|v| contains(&rev_site, &reverse_complement(v.as_bytes())))
        .cloned();

    (forward, reverse)
}

/// Records for one candidate plus the sequences left out by screening.
#[derive(Debug, Clone, Default)]
pub struct Amplification {
    pub records: Vec<AmpliconRecord>,
    pub screened_out: usize,
}

/// Runs locator and extractor over every sequence of an alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmpliconExtractor {
    locator: PrimerLocator,
    /// Drop sequences whose primer sites hold no known variant
    require_variants: bool,
}

impl AmpliconExtractor {
    pub fn new(locator: PrimerLocator, require_variants: bool) -> Self {
        Self {
            locator,
            require_variants,
        }
    }

    /// Amplify a single sequence. `None` means the sequence was screened out.
    pub fn amplify_sequence(
        &self,
        pair: &CandidatePair,
        sequence: &AlignedSequence,
    ) -> Option<AmpliconRecord> {
        let variants = screen_variants(pair, sequence);
        if self.require_variants {
            if variants.0.is_none() {
                debug!("{}: no forward variant near {}", sequence.id(), pair.forward.range);
                return None;
            }
            if variants.1.is_none() {
                debug!("{}: no reverse variant near {}", sequence.id(), pair.reverse.range);
                return None;
            }
        }

        let fwd = self.locator.locate_primer(&pair.forward, sequence);
        let rev = self.locator.locate_primer(&pair.reverse, sequence);

        if rev.is_none() {
            debug!(
                "{}: reverse primer {} not found in {}, in the {}-column flank or anywhere else",
                sequence.id(),
                pair.reverse.pattern,
                pair.reverse.range,
                self.locator.flank()
            );
        }

        let record = extract(pair, fwd.as_ref(), rev.as_ref(), sequence, variants);
        debug!(
            "{}: forward {:?}, reverse {:?}, amplicon {}-{} ({})",
            record.header, fwd, rev, record.start, record.end, record.status
        );
        Some(record)
    }

    /// Amplify every sequence in the store, keeping alignment order.
    pub fn amplify(&self, pair: &CandidatePair, store: &SequenceStore) -> Amplification {
        let sequences: Vec<&AlignedSequence> = store.iter().collect();
        let results: Vec<Option<AmpliconRecord>> = sequences
            .par_iter()
            .map(|sequence| self.amplify_sequence(pair, sequence))
            .collect();

        let screened_out = results.iter().filter(|r| r.is_none()).count();
        Amplification {
            records: results.into_iter().flatten().collect(),
            screened_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CoordinateRange, Orientation, PrimerSpec};
    use crate::locate::SearchPass;

    fn hit(start: usize, end: usize) -> PrimerMatch {
        PrimerMatch {
            start,
            end,
            pass: SearchPass::ExactRange,
        }
    }

    fn pair(fwd: &str, fwd_range: (usize, usize), rev: &str, rev_range: (usize, usize)) -> CandidatePair {
        CandidatePair {
            index: 1,
            key: format!("[{}, {}], [{}, {}]", fwd_range.0, fwd_range.1, rev_range.0, rev_range.1),
            forward: PrimerSpec {
                pattern: fwd.to_string(),
                range: CoordinateRange::new(fwd_range.0, fwd_range.1),
                orientation: Orientation::Forward,
                variants: vec![fwd.to_string()],
            },
            reverse: PrimerSpec {
                pattern: rev.to_string(),
                range: CoordinateRange::new(rev_range.0, rev_range.1),
                orientation: Orientation::Reverse,
                variants: vec![rev.to_string()],
            },
        }
    }

    #[test]
    fn test_classify_ok() {
        let bounds = classify(Some(&hit(10, 29)), Some(&hit(200, 219)), 30, 198);
        assert_eq!(bounds.status, ErrorStatus::Ok);
        assert_eq!((bounds.start, bounds.end), (30, 200));
    }

    #[test]
    fn test_classify_overlap_falls_back_to_ranges() {
        let bounds = classify(Some(&hit(81, 100)), Some(&hit(95, 114)), 100, 120);
        assert_eq!(bounds.status, ErrorStatus::PrimersOverlapOrWrongOrder);
        assert_eq!((bounds.start, bounds.end), (101, 120));
    }

    #[test]
    fn test_fallback_always_carries_failure_status() {
        let hits = [None, Some(hit(0, 9)), Some(hit(5, 14)), Some(hit(20, 29))];
        for fwd in &hits {
            for rev in &hits {
                let bounds = classify(fwd.as_ref(), rev.as_ref(), 9, 20);
                assert_ne!(bounds.status, ErrorStatus::UsingRangeBoundaries);
                if bounds.status != ErrorStatus::Ok {
                    assert_eq!((bounds.start, bounds.end), (10, 20));
                }
            }
        }
    }

    #[test]
    fn test_classify_forward_checked_first() {
        let bounds = classify(None, None, 10, 50);
        assert_eq!(bounds.status, ErrorStatus::ForwardPrimerNotFound);
        assert_eq!((bounds.start, bounds.end), (11, 50));

        let bounds = classify(Some(&hit(0, 9)), None, 10, 50);
        assert_eq!(bounds.status, ErrorStatus::ReversePrimerNotFound);
    }

    #[test]
    fn test_classify_adjacent_primers_is_ok_but_empty() {
        let bounds = classify(Some(&hit(0, 9)), Some(&hit(10, 19)), 9, 10);
        assert_eq!(bounds.status, ErrorStatus::Ok);
        assert!(bounds.is_empty());
    }

    #[test]
    fn test_extract_inverted_fallback_is_empty() {
        let seq = AlignedSequence::new("s1", b"ACGTACGTACGT".to_vec());
        let p = pair("ACGT", (6, 9), "TTTT", (2, 5));
        let record = extract(&p, None, None, &seq, (None, None));
        assert_eq!(record.start, 10);
        assert_eq!(record.end, 2);
        assert_eq!(record.gapped, "");
        assert_eq!(record.dashless, "");
        assert_eq!(record.status, ErrorStatus::ForwardPrimerNotFound);
    }

    #[test]
    fn test_amplify_sequence_gapped_and_dashless() {
        // ACGTA | CC-G-T | TTGCC ; reverse primer GGCAA binds as TTGCC
        let seq = AlignedSequence::new("s1", b"ACGTACC-G-TTTGCC".to_vec());
        let p = pair("ACGTA", (0, 4), "GGCAA", (11, 15));
        let record = AmpliconExtractor::default().amplify_sequence(&p, &seq).unwrap();

        assert_eq!(record.status, ErrorStatus::Ok);
        assert_eq!((record.start, record.end), (5, 11));
        assert_eq!(record.gapped, "CC-G-T");
        assert_eq!(record.dashless, "CCGT");
        let gaps = record.gapped.matches('-').count();
        assert_eq!(record.dashless.len(), record.gapped.len() - gaps);
        assert_eq!(record.forward_variant.as_deref(), Some("ACGTA"));
        assert_eq!(record.reverse_variant.as_deref(), Some("GGCAA"));
    }

    #[test]
    fn test_screen_variants_first_match_wins() {
        let seq = AlignedSequence::new("s1", b"GAC-GTTTTTTTTTTTCC-TTG".to_vec());
        let mut p = pair("ACGT", (1, 4), "CAAGG", (16, 21));
        p.forward.variants = vec!["TTTT".into(), "ACGT".into(), "GACG".into()];
        p.reverse.variants = vec!["CAAGA".into(), "CAAGG".into()];

        let (fwd, rev) = screen_variants(&p, &seq);
        assert_eq!(fwd.as_deref(), Some("ACGT"));
        assert_eq!(rev.as_deref(), Some("CAAGG"));
    }

    #[test]
    fn test_require_variants_screens_out() {
        let store = SequenceStore::from_records(vec![
            AlignedSequence::new("hit", b"ACGTACCGTTTGCC".to_vec()),
            AlignedSequence::new("miss", b"TTTTACCGTTTGCC".to_vec()),
        ]);
        let p = pair("ACGTA", (0, 4), "GGCAA", (9, 13));

        let strict = AmpliconExtractor::new(PrimerLocator::default(), true).amplify(&p, &store);
        assert_eq!(strict.records.len(), 1);
        assert_eq!(strict.screened_out, 1);
        assert_eq!(strict.records[0].header, "hit");

        let lenient = AmpliconExtractor::default().amplify(&p, &store);
        assert_eq!(lenient.records.len(), 2);
        assert_eq!(lenient.screened_out, 0);
        assert_eq!(lenient.records[1].header, "miss");
        assert_eq!(lenient.records[1].status, ErrorStatus::ForwardPrimerNotFound);
        assert_eq!(lenient.records[1].forward_variant, None);
    }

    #[test]
    fn test_status_strings() {
        let names: Vec<&str> = ErrorStatus::ALL.iter().map(ErrorStatus::as_str).collect();
        assert_eq!(
            names,
            vec![
                "OK",
                "FORWARD_PRIMER_NOT_FOUND",
                "REVERSE_PRIMER_NOT_FOUND",
                "PRIMERS_OVERLAP_OR_WRONG_ORDER",
                "USING_RANGE_BOUNDARIES"
            ]
        );
        assert_eq!(ErrorStatus::UsingRangeBoundaries.to_string(), "USING_RANGE_BOUNDARIES");
    }
}
