//! In-silico PCR over a multiple-sequence alignment and diversity scoring of
//! candidate primer pairs.
//!
//! For every candidate pair the primers are located in each aligned
//! sequence, the amplicon between them is cut out, and the resulting
//! amplicon set is summarized as amplicon sequence variants (ASVs) with
//! their median pairwise Hamming distance. The pair yielding the most ASVs
//! under a length limit is picked for each gene.

pub mod candidate;
pub mod diversity;
pub mod extract;
pub mod locate;
pub mod logging;
pub mod mapping;
pub mod output;
pub mod pipeline;
pub mod preselect;
pub mod select;
pub mod sequence;

pub use candidate::{CandidatePair, CoordinateRange, Orientation, PrimerSpec};
pub use diversity::{analyze, CandidateSummary, DiversityAnalyzer, VariantGroup};
pub use extract::{extract, AmpliconExtractor, AmpliconRecord, ErrorStatus, SequenceView};
pub use locate::{locate, PrimerLocator, PrimerMatch, SearchPass};
pub use pipeline::{run_batch, run_gene, GeneOutcome, PipelineConfig, RunStats};
pub use select::select;
pub use sequence::{AlignedSequence, SequenceStore};
