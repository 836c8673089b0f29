// partition.rs - Flat cluster assignments

use crate::error::{BapsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Assignment of every sequence to a cluster.
///
/// Labels are 1-based and contiguous, numbered in order of each cluster's
/// smallest member index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    labels: Vec<usize>,
    n_clusters: usize,
}

impl Partition {
    /// Normalise arbitrary cluster identifiers into canonical labels
    pub fn from_labels(raw: &[usize]) -> Result<Self> {
        if raw.is_empty() {
            return Err(BapsError::empty_input("partition has no sequences"));
        }
        let mut mapping: HashMap<usize, usize> = HashMap::new();
        let labels = raw
            .iter()
            .map(|&id| {
                let next = mapping.len() + 1;
                *mapping.entry(id).or_insert(next)
            })
            .collect();
        Ok(Self {
            labels,
            n_clusters: mapping.len(),
        })
    }

    /// Build from member lists; each index in `0..n` must appear exactly once
    pub fn from_clusters(n: usize, clusters: &[Vec<usize>]) -> Result<Self> {
        let mut raw = vec![usize::MAX; n];
        for (c, members) in clusters.iter().enumerate() {
            for &i in members {
                if i >= n {
                    return Err(BapsError::mismatched(format!(
                        "cluster member {} out of range for {} sequences",
                        i, n
                    )));
                }
                if raw[i] != usize::MAX {
                    return Err(BapsError::mismatched(format!(
                        "sequence {} assigned to more than one cluster",
                        i
                    )));
                }
                raw[i] = c;
            }
        }
        if let Some(missing) = raw.iter().position(|&c| c == usize::MAX) {
            return Err(BapsError::mismatched(format!(
                "sequence {} is not assigned to any cluster",
                missing
            )));
        }
        Self::from_labels(&raw)
    }

    /// Every sequence in one cluster
    pub fn single(n: usize) -> Result<Self> {
        Self::from_labels(&vec![1; n])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn label(&self, i: usize) -> usize {
        self.labels[i]
    }

    /// Member lists ordered by label; members ascending
    pub fn clusters(&self) -> Vec<Vec<usize>> {
        let mut clusters = vec![Vec::new(); self.n_clusters];
        for (i, &label) in self.labels.iter().enumerate() {
            clusters[label - 1].push(i);
        }
        clusters
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in &self.labels {
            sizes[label - 1] += 1;
        }
        sizes
    }

    pub fn co_clustered(&self, i: usize, j: usize) -> bool {
        self.labels[i] == self.labels[j]
    }

    /// True when every cluster of `self` lies inside one cluster of `coarser`
    pub fn is_refinement_of(&self, coarser: &Partition) -> bool {
        if self.len() != coarser.len() {
            return false;
        }
        let mut parent = vec![0usize; self.n_clusters];
        for (&fine, &coarse) in self.labels.iter().zip(&coarser.labels) {
            let slot = &mut parent[fine - 1];
            if *slot == 0 {
                *slot = coarse;
            } else if *slot != coarse {
                return false;
            }
        }
        true
    }

    /// Read a two-column (name, cluster) table and map it onto `names`.
    ///
    /// Files ending in `.csv` are comma separated, anything else is tab
    /// separated. Lines starting with `#` are skipped and the first remaining
    /// row is a header.
    pub fn from_file(path: &Path, names: &[String]) -> Result<Self> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
            _ => b'\t',
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| {
                BapsError::parse(format!("Failed to open partition file {}: {}", path.display(), e))
            })?;

        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut raw: Vec<Option<String>> = vec![None; names.len()];

        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                BapsError::parse(format!("Invalid row in {}: {}", path.display(), e))
            })?;
            let (name, label) = match (record.get(0), record.get(1)) {
                (Some(name), Some(label)) => (name, label),
                _ => {
                    return Err(BapsError::parse(format!(
                        "{} row {} needs a name and a cluster column",
                        path.display(),
                        line + 2
                    )))
                }
            };
            let seq = *index.get(name).ok_or_else(|| {
                BapsError::mismatched(format!(
                    "partition names '{}' which is not in the alignment",
                    name
                ))
            })?;
            if raw[seq].replace(label.to_string()).is_some() {
                return Err(BapsError::parse(format!(
                    "'{}' is listed twice in {}",
                    name,
                    path.display()
                )));
            }
        }

        let mut ids: HashMap<String, usize> = HashMap::new();
        let mut labels = Vec::with_capacity(names.len());
        for (seq, label) in raw.into_iter().enumerate() {
            let label = label.ok_or_else(|| {
                BapsError::mismatched(format!(
                    "'{}' has no cluster in {}",
                    names[seq],
                    path.display()
                ))
            })?;
            let next = ids.len();
            labels.push(*ids.entry(label).or_insert(next));
        }
        Self::from_labels(&labels)
    }
}
