//! Aligned sequences, the read-only store that holds them, and the small
//! nucleotide helpers shared by the locator and the extractor.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{debug, warn};
use noodles::fasta;
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    ops::Range,
    path::Path,
};

/// Alignment gap placeholder.
pub const GAP: u8 = b'-';

/// Complement a single base, extended to IUPAC ambiguity codes.
///
/// Case is preserved. Gaps and unknown symbols pass through unchanged.
fn complement(base: u8) -> u8 {
    let upper = match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        // S, W and N are their own complements
        b'S' | b'W' | b'N' => base.to_ascii_uppercase(),
        _ => return base,
    };
    if base.is_ascii_lowercase() {
        upper.to_ascii_lowercase()
    } else {
        upper
    }
}

/// Reverse complement a primer or sequence fragment.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// Concrete bases denoted by an IUPAC nucleotide code (uppercase).
///
/// Returns an empty slice for symbols that are not nucleotide codes.
pub fn iupac_bases(code: u8) -> &'static [u8] {
    match code.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' | b'U' => b"T",
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"CG",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        b'N' => b"ACGT",
        _ => b"",
    }
}

/// Whether a primer symbol accepts the base found in the alignment.
///
/// Identical symbols always agree; otherwise every base the sequence symbol
/// may stand for has to be allowed by the primer symbol.
pub fn base_matches(primer: u8, base: u8) -> bool {
    if primer.eq_ignore_ascii_case(&base) {
        return true;
    }
    let allowed = iupac_bases(primer);
    let observed = iupac_bases(base);
    !observed.is_empty() && observed.iter().all(|b| allowed.contains(b))
}

/// Remove every alignment gap from a sequence.
pub fn strip_gaps(seq: &[u8]) -> Vec<u8> {
    seq.iter().copied().filter(|&b| b != GAP).collect()
}

/// One gapped record of a multiple-sequence alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedSequence {
    id: String,
    seq: Vec<u8>,
}

impl AlignedSequence {
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.seq
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Half-open slice in alignment space, clamped to the sequence bounds.
    ///
    /// An inverted or out-of-bounds range yields an empty slice rather than
    /// panicking.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        let end = range.end.min(self.seq.len());
        let start = range.start.min(end);
        &self.seq[start..end]
    }
}

/// Read-only collection of aligned sequences keyed by header.
///
/// Insertion order is kept so every output row follows the order of the
/// alignment file.
#[derive(Debug, Default, Clone)]
pub struct SequenceStore {
    records: Vec<AlignedSequence>,
    index: HashMap<String, usize>,
}

impl SequenceStore {
    /// Build a store from records. A repeated header replaces the earlier
    /// sequence but keeps its original position.
    pub fn from_records(records: impl IntoIterator<Item = AlignedSequence>) -> Self {
        let mut store = Self::default();
        for record in records {
            match store.index.get(record.id()) {
                Some(&idx) => {
                    warn!(
                        "Duplicate header '{}' in alignment; keeping the later sequence",
                        record.id()
                    );
                    store.records[idx] = record;
                }
                None => {
                    store.index.insert(record.id.clone(), store.records.len());
                    store.records.push(record);
                }
            }
        }
        store
    }

    /// Load a gapped multi-FASTA file, transparently decompressing `.gz`.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("Loading alignment from {:?}", path);
        let file =
            File::open(path).with_context(|| format!("Failed to open alignment {:?}", path))?;

        let inner: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        Self::from_reader(BufReader::new(inner))
            .with_context(|| format!("Failed to parse alignment {:?}", path))
    }

    /// Parse FASTA records from any buffered reader.
    pub fn from_reader<R: std::io::BufRead>(reader: R) -> Result<Self> {
        let mut reader = fasta::io::Reader::new(reader);
        let mut records = Vec::new();

        for result in reader.records() {
            let record = result?;
            let mut header = String::from_utf8_lossy(record.name()).into_owned();
            if let Some(description) = record.description() {
                header.push(' ');
                header.push_str(&String::from_utf8_lossy(description));
            }
            let seq: &[u8] = record.sequence().as_ref();
            records.push(AlignedSequence::new(header, seq));
        }

        let store = Self::from_records(records);
        store.check_uniform_width();
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<&AlignedSequence> {
        self.index.get(id).map(|&idx| &self.records[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlignedSequence> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Column count of the alignment, taken from the first record.
    pub fn width(&self) -> usize {
        self.records.first().map_or(0, AlignedSequence::len)
    }

    /// Warn when records disagree on length; coordinates are only comparable
    /// across sequences that share one alignment space.
    pub fn check_uniform_width(&self) -> bool {
        let width = self.width();
        let ragged: Vec<&str> = self
            .records
            .iter()
            .filter(|r| r.len() != width)
            .map(AlignedSequence::id)
            .collect();

        if ragged.is_empty() {
            return true;
        }
        warn!(
            "{} sequences differ from the alignment width of {} columns: {:?}",
            ragged.len(),
            width,
            ragged
        );
        false
    }
}
