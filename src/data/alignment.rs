// alignment.rs - Aligned sequence collection and FASTA loading

use crate::error::{BapsError, Result};
use bio::io::fasta;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Nucleotide call codes used by the store. Anything else is missing data.
pub const NUCLEOTIDES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Map an alignment byte to a nucleotide code (0..4), or None for missing data
#[inline]
pub fn nucleotide_code(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' | b'U' | b'u' => Some(3),
        _ => None,
    }
}

/// A set of named sequences that all share one alignment length
#[derive(Debug, Clone)]
pub struct Alignment {
    names: Vec<String>,
    sequences: Vec<Vec<u8>>,
}

impl Alignment {
    pub fn new(names: Vec<String>, sequences: Vec<Vec<u8>>) -> Result<Self> {
        if sequences.is_empty() {
            return Err(BapsError::empty_input("alignment contains no sequences"));
        }
        if names.len() != sequences.len() {
            return Err(BapsError::mismatched(format!(
                "{} names supplied for {} sequences",
                names.len(),
                sequences.len()
            )));
        }

        let length = sequences[0].len();
        if let Some((i, seq)) = sequences.iter().enumerate().find(|(_, s)| s.len() != length) {
            return Err(BapsError::mismatched(format!(
                "sequence '{}' has length {}, expected {}",
                names[i],
                seq.len(),
                length
            )));
        }

        let mut seen = HashSet::with_capacity(names.len());
        if let Some(duplicate) = names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(BapsError::parse(format!(
                "Duplicate sequence id '{}'",
                duplicate
            )));
        }

        Ok(Self { names, sequences })
    }

    /// Build from (name, sequence) string pairs, mostly for tests and small inputs
    pub fn from_pairs<S: AsRef<str>>(pairs: &[(S, S)]) -> Result<Self> {
        let names = pairs.iter().map(|(n, _)| n.as_ref().to_string()).collect();
        let sequences = pairs
            .iter()
            .map(|(_, s)| s.as_ref().as_bytes().to_vec())
            .collect();
        Self::new(names, sequences)
    }

    /// Load an aligned FASTA file
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            BapsError::parse(format!("Failed to open FASTA file {}: {}", path.display(), e))
        })?;
        let reader = fasta::Reader::new(BufReader::new(file));

        let mut names = Vec::new();
        let mut sequences = Vec::new();

        for record_result in reader.records() {
            let record = record_result.map_err(|e| {
                BapsError::parse(format!("Invalid FASTA record in {}: {}", path.display(), e))
            })?;

            names.push(record.id().to_string());
            sequences.push(record.seq().to_vec());
        }

        log::info!(
            "Loaded {} sequences from {}",
            sequences.len(),
            path.display()
        );
        Self::new(names, sequences)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn sequences(&self) -> &[Vec<u8>] {
        &self.sequences
    }

    pub fn n_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn length(&self) -> usize {
        self.sequences.first().map(|s| s.len()).unwrap_or(0)
    }

    /// Keep only sequences passing every supplied filter
    pub fn filter_samples(
        self,
        include: Option<&Regex>,
        exclude: Option<&Regex>,
        include_set: Option<&HashSet<String>>,
        exclude_set: Option<&HashSet<String>>,
    ) -> Result<Self> {
        let initial = self.names.len();
        let (names, sequences): (Vec<_>, Vec<_>) = self
            .names
            .into_iter()
            .zip(self.sequences)
            .filter(|(name, _)| {
                if let Some(regex) = include {
                    if !regex.is_match(name) {
                        return false;
                    }
                }
                if let Some(regex) = exclude {
                    if regex.is_match(name) {
                        return false;
                    }
                }
                if let Some(set) = include_set {
                    if !set.contains(name) {
                        return false;
                    }
                }
                if let Some(set) = exclude_set {
                    if set.contains(name) {
                        return false;
                    }
                }
                true
            })
            .unzip();

        if names.len() != initial {
            log::info!(
                "Sample filters: kept {} sequences (removed {})",
                names.len(),
                initial - names.len()
            );
        }
        Self::new(names, sequences)
    }
}
