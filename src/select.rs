//! Best primer pair per gene.

use crate::diversity::CandidateSummary;
use std::cmp::Ordering;

/// Amplicons must be strictly shorter than this to be considered.
pub const DEFAULT_MAX_AMPLICON_LENGTH: usize = 500;

/// Pick the candidate with the most unique variants among those whose
/// amplicon is shorter than `max_amplicon_length`.
///
/// Ties on the variant count go to the larger median Hamming distance; a
/// remaining tie keeps the earliest summary in input order.
pub fn select(
    summaries: &[CandidateSummary],
    max_amplicon_length: usize,
) -> Option<&CandidateSummary> {
    summaries
        .iter()
        .filter(|s| s.amplicon_length < max_amplicon_length)
        .fold(None, |best: Option<&CandidateSummary>, candidate| match best {
            None => Some(candidate),
            Some(current) => {
                let better = match candidate.num_unique.cmp(&current.num_unique) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => candidate.median_hamming > current.median_hamming,
                };
                Some(if better { candidate } else { current })
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(label: &str, unique: usize, median: f64, length: usize) -> CandidateSummary {
        CandidateSummary {
            num_input: unique,
            num_unique: unique,
            median_hamming: median,
            amplicon_length: length,
            ..CandidateSummary::empty(label)
        }
    }

    #[test]
    fn test_select_length_filter_then_tie_break() {
        let summaries = vec![
            summary("A", 5, 2.0, 300),
            summary("B", 5, 4.0, 450),
            summary("C", 6, 1.0, 600),
        ];
        let best = select(&summaries, 500).unwrap();
        assert_eq!(best.label, "B");
    }

    #[test]
    fn test_select_length_is_strict() {
        let summaries = vec![summary("A", 9, 2.0, 500), summary("B", 1, 0.0, 499)];
        assert_eq!(select(&summaries, 500).unwrap().label, "B");
    }

    #[test]
    fn test_select_prefers_unique_count_over_distance() {
        let summaries = vec![summary("A", 3, 10.0, 100), summary("B", 4, 1.0, 100)];
        assert_eq!(select(&summaries, 500).unwrap().label, "B");
    }

    #[test]
    fn test_select_full_tie_is_deterministic() {
        let summaries = vec![
            summary("first", 2, 1.5, 100),
            summary("second", 2, 1.5, 120),
        ];
        let a = select(&summaries, 500).unwrap().label.clone();
        let b = select(&summaries, 500).unwrap().label.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn test_select_none_when_nothing_survives() {
        let summaries = vec![summary("A", 5, 2.0, 800)];
        assert!(select(&summaries, 500).is_none());
        assert!(select(&[], 500).is_none());
    }
}
