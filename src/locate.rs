//! Exact, gap-transparent primer search in alignment space.
//!
//! Primer-design coordinates drift by a few columns once an aligner inserts
//! gaps, so the search escalates through three windows and stops at the
//! first hit:
//!
//! 1. the expected range itself,
//! 2. the expected range widened by a flank (20 columns by default),
//! 3. the whole sequence.
//!
//! Inside a window a match may start at any non-gap column. Each primer
//! symbol must then agree (IUPAC-aware) with the next non-gap column; gap
//! columns in between are skipped without consuming a primer symbol, so a
//! primer split by an alignment gap is still found and its reported span
//! covers the gap.

use crate::candidate::{CoordinateRange, Orientation, PrimerSpec};
use crate::sequence::{base_matches, reverse_complement, AlignedSequence, GAP};
use log::trace;

/// Default widening of the expected range for the second pass.
pub const DEFAULT_FLANK: usize = 20;

/// Which window produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPass {
    ExactRange,
    ExpandedRange,
    WholeSequence,
}

/// Exact alignment-space coordinates of a primer occurrence.
///
/// Absence of a match is expressed as `None` by [`PrimerLocator::locate`],
/// never as zeroed coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimerMatch {
    /// First column of the match (0-based)
    pub start: usize,
    /// Last column of the match, inclusive
    pub end: usize,
    pub pass: SearchPass,
}

/// Try to match `form` starting exactly at `start`, returning the number of
/// columns consumed.
fn match_at(window: &[u8], start: usize, form: &[u8]) -> Option<usize> {
    if form.is_empty() || window.get(start) == Some(&GAP) {
        return None;
    }

    let mut pos = start;
    for &symbol in form {
        // Skip gap columns; they occupy coordinates but carry no base
        let base = loop {
            let &b = window.get(pos)?;
            pos += 1;
            if b != GAP {
                break b;
            }
        };
        if !base_matches(symbol, base) {
            return None;
        }
    }

    Some(pos - start)
}

/// Leftmost match of `form` in `window` as `(offset, columns consumed)`.
fn scan(window: &[u8], form: &[u8]) -> Option<(usize, usize)> {
    if form.is_empty() || window.len() < form.len() {
        return None;
    }
    (0..=window.len() - form.len())
        .find_map(|offset| match_at(window, offset, form).map(|span| (offset, span)))
}

/// Primer search with a configurable second-pass flank.
#[derive(Debug, Clone, Copy)]
pub struct PrimerLocator {
    flank: usize,
}

impl Default for PrimerLocator {
    fn default() -> Self {
        Self {
            flank: DEFAULT_FLANK,
        }
    }
}

impl PrimerLocator {
    pub fn new(flank: usize) -> Self {
        Self { flank }
    }

    pub fn flank(&self) -> usize {
        self.flank
    }

    /// Literal forms to search for, in priority order.
    ///
    /// Reverse primers are tried as their reverse complement first and then
    /// as written, since some primer-design outputs already report them on
    /// the alignment strand. A form identical to an earlier one cannot
    /// succeed where that one failed, so duplicates are dropped.
    pub fn search_forms(pattern: &str, orientation: Orientation) -> Vec<Vec<u8>> {
        let literal = pattern.as_bytes().to_vec();
        let mut forms = Vec::with_capacity(2);

        if orientation == Orientation::Reverse {
            forms.push(reverse_complement(&literal));
        }
        if !forms.contains(&literal) {
            forms.push(literal);
        }
        forms
    }

    /// Locate `pattern` in `sequence`, escalating from `range` outward.
    pub fn locate(
        &self,
        pattern: &str,
        orientation: Orientation,
        sequence: &AlignedSequence,
        range: CoordinateRange,
    ) -> Option<PrimerMatch> {
        let forms = Self::search_forms(pattern, orientation);
        let expanded = range.expand(self.flank, sequence.len());

        let passes = [
            (SearchPass::ExactRange, range.start, range.end),
            (SearchPass::ExpandedRange, expanded.start, expanded.end),
            (SearchPass::WholeSequence, 0, sequence.len().saturating_sub(1)),
        ];

        for (pass, window_start, window_end) in passes {
            let window = sequence.slice(window_start..window_end.saturating_add(1));
            for form in &forms {
                if let Some((offset, span)) = scan(window, form) {
                    let start = window_start + offset;
                    let hit = PrimerMatch {
                        start,
                        end: start + span - 1,
                        pass,
                    };
                    trace!(
                        "{} matched {} at {}-{} ({:?})",
                        pattern,
                        sequence.id(),
                        hit.start,
                        hit.end,
                        pass
                    );
                    return Some(hit);
                }
            }
        }

        None
    }

    /// Locate a candidate primer using its own range and orientation.
    pub fn locate_primer(
        &self,
        primer: &PrimerSpec,
        sequence: &AlignedSequence,
    ) -> Option<PrimerMatch> {
        self.locate(&primer.pattern, primer.orientation, sequence, primer.range)
    }
}

/// [`PrimerLocator::locate`] with the default flank.
pub fn locate(
    pattern: &str,
    orientation: Orientation,
    sequence: &AlignedSequence,
    range: CoordinateRange,
) -> Option<PrimerMatch> {
    PrimerLocator::default().locate(pattern, orientation, sequence, range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(bases: &str) -> AlignedSequence {
        AlignedSequence::new("test_seq", bases.as_bytes().to_vec())
    }

    #[test]
    fn test_locate_ungapped_exact_range() {
        let target = seq("TTTTACGTACCCCC");
        let hit = locate("ACGTA", Orientation::Forward, &target, CoordinateRange::new(2, 10))
            .unwrap();
        assert_eq!(hit.start, 4);
        assert_eq!(hit.end, 8);
        assert_eq!(hit.pass, SearchPass::ExactRange);
        assert_eq!(target.slice(hit.start..hit.end + 1), b"ACGTA");
    }

    #[test]
    fn test_locate_gap_transparent() {
        let target = seq("AC--GT");
        let hit =
            locate("ACGT", Orientation::Forward, &target, CoordinateRange::new(0, 5)).unwrap();
        assert_eq!(hit.start, 0);
        assert_eq!(hit.end, 5);
    }

    #[test]
    fn test_locate_does_not_start_on_gap() {
        let target = seq("--ACGT--");
        let hit =
            locate("ACGT", Orientation::Forward, &target, CoordinateRange::new(0, 7)).unwrap();
        assert_eq!(hit.start, 2);
        assert_eq!(hit.end, 5);
    }

    #[test]
    fn test_locate_gap_at_window_edge_fails_exact_pass() {
        // The exact window ends inside the gap run, so only the expanded pass
        // can complete the match
        let target = seq("GGACG--TGGGG");
        let hit =
            locate("ACGT", Orientation::Forward, &target, CoordinateRange::new(2, 6)).unwrap();
        assert_eq!(hit.start, 2);
        assert_eq!(hit.end, 7);
        assert_eq!(hit.pass, SearchPass::ExpandedRange);
    }

    #[test]
    fn test_locate_expanded_range() {
        // Primer sits 10 columns past the expected window
        let target = seq("CCCCCCCCCCCCCCCCCCCCGATTACACCCC");
        let hit = locate(
            "GATTACA",
            Orientation::Forward,
            &target,
            CoordinateRange::new(0, 12),
        )
        .unwrap();
        assert_eq!(hit.start, 20);
        assert_eq!(hit.end, 26);
        assert_eq!(hit.pass, SearchPass::ExpandedRange);
    }

    #[test]
    fn test_locate_whole_sequence_fallback() {
        let mut bases = "GATTACA".to_string();
        bases.push_str(&"C".repeat(60));
        let target = seq(&bases);
        let hit = locate(
            "GATTACA",
            Orientation::Forward,
            &target,
            CoordinateRange::new(50, 60),
        )
        .unwrap();
        assert_eq!(hit.start, 0);
        assert_eq!(hit.pass, SearchPass::WholeSequence);
    }

    #[test]
    fn test_locate_prefers_narrow_window() {
        // Same primer twice; the copy inside the expected range wins
        let mut bases = "ACGTT".to_string();
        bases.push_str(&"C".repeat(40));
        bases.push_str("ACGTT");
        let target = seq(&bases);
        let hit =
            locate("ACGTT", Orientation::Forward, &target, CoordinateRange::new(40, 49)).unwrap();
        assert_eq!(hit.start, 45);
    }

    #[test]
    fn test_locate_reverse_prefers_reverse_complement() {
        // Reverse primer AAGG binds as CCTT on the alignment strand
        let target = seq("GGGGCCTTGGGGAAGG");
        let hit =
            locate("AAGG", Orientation::Reverse, &target, CoordinateRange::new(0, 15)).unwrap();
        assert_eq!(hit.start, 4);
        assert_eq!(hit.end, 7);
    }

    #[test]
    fn test_locate_reverse_falls_back_to_pattern_as_written() {
        let target = seq("GGGGGGGGAAGGGG");
        let hit =
            locate("AAGG", Orientation::Reverse, &target, CoordinateRange::new(0, 13)).unwrap();
        assert_eq!(hit.start, 8);
        assert_eq!(hit.end, 11);
    }

    #[test]
    fn test_locate_degenerate_pattern() {
        let target = seq("TTTACGTTT");
        let hit =
            locate("AYGN", Orientation::Forward, &target, CoordinateRange::new(0, 8)).unwrap();
        assert_eq!(hit.start, 3);
        assert!(locate("ARGT", Orientation::Forward, &target, CoordinateRange::new(0, 8)).is_none());
    }

    #[test]
    fn test_locate_not_found() {
        let target = seq("CCCCCCCCCC");
        assert!(locate("ACGT", Orientation::Forward, &target, CoordinateRange::new(0, 9)).is_none());
        assert!(locate("ACGT", Orientation::Reverse, &target, CoordinateRange::new(0, 9)).is_none());
    }

    #[test]
    fn test_locate_range_beyond_sequence() {
        let target = seq("ACGTAC");
        let hit = locate(
            "GTAC",
            Orientation::Forward,
            &target,
            CoordinateRange::new(100, 120),
        )
        .unwrap();
        assert_eq!(hit.start, 2);
        assert_eq!(hit.pass, SearchPass::WholeSequence);
    }

    #[test]
    fn test_search_forms_order() {
        assert_eq!(
            PrimerLocator::search_forms("AACG", Orientation::Forward),
            vec![b"AACG".to_vec()]
        );
        assert_eq!(
            PrimerLocator::search_forms("AACG", Orientation::Reverse),
            vec![b"CGTT".to_vec(), b"AACG".to_vec()]
        );
        // Palindromic reverse primers collapse to one form
        assert_eq!(
            PrimerLocator::search_forms("ACGT", Orientation::Reverse),
            vec![b"ACGT".to_vec()]
        );
    }

    #[test]
    fn test_custom_flank() {
        let target = seq("CCCCCCCCCCGATTACACCCC");
        let narrow = PrimerLocator::new(2);
        let hit = narrow
            .locate(
                "GATTACA",
                Orientation::Forward,
                &target,
                CoordinateRange::new(0, 5),
            )
            .unwrap();
        assert_eq!(hit.pass, SearchPass::WholeSequence);
        assert_eq!(hit.start, 10);
    }
}
