//! Primer-pair candidates as delivered by the primer-design collaborator.
//!
//! A candidate file is a JSON object whose keys encode the expected binding
//! ranges, `"[fstart, fend], [rstart, rend]"`, and whose values are
//! `[forward_pattern, {forward_variant: ..}, reverse_pattern, {reverse_variant: ..}]`.
//! Document order is significant: it fixes candidate numbering and the order
//! in which variants are tried.

use anyhow::{Context, Result};
use log::debug;
use regex::Regex;
use serde_json::Value;
use std::{fmt, path::Path, sync::LazyLock};

static RANGE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s(\[]*(\d+)\s*,\s*(\d+)\s*\]\s*,\s*\[\s*(\d+)\s*,\s*(\d+)[\s)\]]*$")
        .expect("range key pattern is valid")
});

/// Strand a primer anneals to, relative to the alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Reverse,
}

/// Inclusive coordinate range in alignment space, as written by the
/// primer-design tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateRange {
    pub start: usize,
    pub end: usize,
}

impl CoordinateRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Widen by `flank` on both sides, clamped to `[0, width - 1]`.
    pub fn expand(&self, flank: usize, width: usize) -> Self {
        Self {
            start: self.start.saturating_sub(flank),
            end: self.end.saturating_add(flank).min(width.saturating_sub(1)),
        }
    }
}

impl fmt::Display for CoordinateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One primer of a candidate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimerSpec {
    /// Degenerate pattern (IUPAC alphabet)
    pub pattern: String,
    /// Expected binding range
    pub range: CoordinateRange,
    pub orientation: Orientation,
    /// Concrete sequences consistent with the pattern, in document order
    pub variants: Vec<String>,
}

/// A forward/reverse primer pair proposed for one amplicon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
    /// 1-based position of the pair in its candidate file
    pub index: usize,
    /// Range key exactly as it appeared in the file
    pub key: String,
    pub forward: PrimerSpec,
    pub reverse: PrimerSpec,
}

/// Parse a `"[fstart, fend], [rstart, rend]"` key.
pub fn parse_range_key(key: &str) -> Result<(CoordinateRange, CoordinateRange)> {
    let caps = RANGE_KEY
        .captures(key.trim())
        .ok_or_else(|| anyhow::anyhow!("Unparseable coordinate range key '{}'", key))?;

    let coord = |i: usize| -> Result<usize> {
        caps[i]
            .parse::<usize>()
            .with_context(|| format!("Coordinate '{}' in key '{}' is out of range", &caps[i], key))
    };

    let forward = CoordinateRange::new(coord(1)?, coord(2)?);
    let reverse = CoordinateRange::new(coord(3)?, coord(4)?);

    if forward.start > forward.end || reverse.start > reverse.end {
        anyhow::bail!("Coordinate range key '{}' has an inverted range", key);
    }

    Ok((forward, reverse))
}

fn pattern_field(fields: &[Value], idx: usize, name: &str) -> Result<String> {
    match fields.get(idx) {
        Some(Value::String(pattern)) if !pattern.trim().is_empty() => Ok(pattern.clone()),
        Some(_) => anyhow::bail!("{} primer pattern is not a non-empty string", name),
        None => anyhow::bail!("{} primer pattern is missing", name),
    }
}

/// Variants are the keys of an object (counts or scores as values are
/// ignored); a plain array of strings is accepted as well.
fn variant_field(fields: &[Value], idx: usize, name: &str) -> Result<Vec<String>> {
    match fields.get(idx) {
        Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("{} variant {} is not a string", name, item))
            })
            .collect(),
        Some(_) => anyhow::bail!("{} variants are neither an object nor an array", name),
        None => anyhow::bail!("{} variants are missing", name),
    }
}

/// Build one candidate from its key and 4-element value.
pub fn parse_candidate(index: usize, key: &str, value: &Value) -> Result<CandidatePair> {
    let (forward_range, reverse_range) = parse_range_key(key)?;

    let fields = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Candidate '{}' is not an array", key))?;
    if fields.len() < 4 {
        anyhow::bail!(
            "Candidate '{}' has {} fields, expected 4 (forward pattern, forward variants, reverse pattern, reverse variants)",
            key,
            fields.len()
        );
    }

    Ok(CandidatePair {
        index,
        key: key.to_string(),
        forward: PrimerSpec {
            pattern: pattern_field(fields, 0, "Forward")?,
            range: forward_range,
            orientation: Orientation::Forward,
            variants: variant_field(fields, 1, "Forward")?,
        },
        reverse: PrimerSpec {
            pattern: pattern_field(fields, 2, "Reverse")?,
            range: reverse_range,
            orientation: Orientation::Reverse,
            variants: variant_field(fields, 3, "Reverse")?,
        },
    })
}

/// Parse a whole candidate document.
///
/// The outer `Result` fails only when the document itself is unusable. Each
/// entry carries its own `Result` so one malformed candidate never hides its
/// siblings; the entry index is the 1-based document position.
pub fn parse_candidates(json: &str) -> Result<Vec<(usize, Result<CandidatePair>)>> {
    let document: Value = serde_json::from_str(json).context("Candidate file is not valid JSON")?;
    let entries = document
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Candidate file must contain a JSON object"))?;

    let parsed = entries
        .iter()
        .enumerate()
        .map(|(i, (key, value))| {
            let index = i + 1;
            (index, parse_candidate(index, key, value))
        })
        .collect::<Vec<_>>();

    debug!("Parsed {} candidate primer pairs", parsed.len());
    Ok(parsed)
}

/// Read and parse a candidate file from disk.
pub fn load_candidates(path: &Path) -> Result<Vec<(usize, Result<CandidatePair>)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read candidate file {:?}", path))?;
    parse_candidates(&text).with_context(|| format!("Invalid candidate file {:?}", path))
}
