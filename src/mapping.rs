//! Expansion of representative headers back to every original sequence.
//!
//! Gene sets are usually de-duplicated before alignment, so one aligned
//! header can stand for several identical genomes. A
//! `<gene>_reference_mapping.tsv` next to the alignment records that
//! relation (`Representative` → `;`-separated `Mapped_Headers`).

use crate::diversity::{CandidateSummary, VariantGroup};
use anyhow::{Context, Result};
use log::{debug, warn};
use polars::prelude::*;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

/// File name suffix of a reference mapping table.
pub const MAPPING_SUFFIX: &str = "_reference_mapping.tsv";

#[derive(Debug, Clone, Default)]
pub struct ReferenceMapping {
    map: HashMap<String, Vec<String>>,
}

impl ReferenceMapping {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let map = pairs
            .into_iter()
            .map(|(rep, mapped)| {
                let headers = mapped
                    .as_ref()
                    .split(';')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect();
                (rep.as_ref().trim().to_string(), headers)
            })
            .collect();
        Self { map }
    }

    /// Read a mapping table; extra columns such as `Total_Mapped` are ignored.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("Reading reference mapping {:?}", path);
        let mut parse_options = CsvParseOptions::default();
        parse_options.separator = b'\t';

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_parse_options(parse_options)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()
            .with_context(|| format!("Failed to parse reference mapping {:?}", path))?;

        let reps = df.column("Representative")?.as_materialized_series().str()?;
        let mapped = df.column("Mapped_Headers")?.as_materialized_series().str()?;

        let pairs = reps
            .into_iter()
            .zip(mapped.into_iter())
            .filter_map(|(rep, mapped)| Some((rep?, mapped?)));

        Ok(Self::from_pairs(pairs))
    }

    /// First mapping table in `dir`, by file name.
    pub fn find_in_dir(dir: &Path) -> Result<Option<PathBuf>> {
        let mut tables: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(MAPPING_SUFFIX))
            })
            .collect();
        tables.sort();

        if tables.len() > 1 {
            warn!(
                "Several reference mappings in {:?}; using {:?}",
                dir, tables[0]
            );
        }
        Ok(tables.into_iter().next())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Original headers a representative stands for; an unmapped header
    /// stands for itself.
    pub fn expand<'a>(&'a self, header: &'a str) -> Vec<&'a str> {
        match self.map.get(header) {
            Some(mapped) if !mapped.is_empty() => mapped.iter().map(String::as_str).collect(),
            _ => vec![header],
        }
    }

    /// Rewrite a summary so that every ASV lists original headers tagged
    /// with `| <gene>`, and recount inputs from the expanded lists.
    pub fn apply(&self, summary: &CandidateSummary, gene: &str) -> CandidateSummary {
        let variants: Vec<VariantGroup> = summary
            .variants
            .iter()
            .map(|group| VariantGroup {
                sequence: group.sequence.clone(),
                headers: group
                    .headers
                    .iter()
                    .flat_map(|h| self.expand(h))
                    .map(|h| format!("{} | {}", h, gene))
                    .collect(),
            })
            .collect();

        let num_input = variants.iter().map(|g| g.headers.len()).sum();
        let unique_sources = variants.iter().filter(|g| g.headers.len() == 1).count();

        CandidateSummary {
            num_input,
            unique_sources: Some(unique_sources),
            variants,
            ..summary.clone()
        }
    }
}
