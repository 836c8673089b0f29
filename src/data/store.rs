// store.rs - Sparse per-site allele-count store

use crate::data::alignment::{nucleotide_code, Alignment, NUCLEOTIDES};
use crate::error::{BapsError, Result};
use crc32fast::Hasher;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Slot value marking a missing call
pub const MISSING: u8 = u8::MAX;

/// One stored (non-consensus or missing) call of a single sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteCall {
    pub site: u32,
    /// Index into the site's allele list (never 0), or `MISSING`
    pub slot: u8,
}

/// Aggregated count of one (site, slot) cell over a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseCount {
    pub site: u32,
    pub slot: u8,
    pub count: u32,
}

impl SparseCount {
    #[inline]
    fn key(&self) -> (u32, u8) {
        (self.site, self.slot)
    }
}

/// Sparse allele counts of a cluster.
///
/// Only non-consensus and missing cells are stored; the consensus count of a
/// site is `size - missing - sum(other slots)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterCounts {
    size: usize,
    entries: Vec<SparseCount>,
}

impl ClusterCounts {
    pub fn singleton(calls: &[SiteCall]) -> Self {
        Self {
            size: 1,
            entries: calls
                .iter()
                .map(|c| SparseCount {
                    site: c.site,
                    slot: c.slot,
                    count: 1,
                })
                .collect(),
        }
    }

    /// Exact sparse sum of two aggregates
    pub fn merged(a: &ClusterCounts, b: &ClusterCounts) -> Self {
        let mut entries = Vec::with_capacity(a.entries.len().max(b.entries.len()));
        entries.extend(Self::merge_iter(a, b));
        Self {
            size: a.size + b.size,
            entries,
        }
    }

    /// Iterate the sum of two aggregates without materialising it
    pub fn merge_iter<'a>(a: &'a ClusterCounts, b: &'a ClusterCounts) -> MergeSum<'a> {
        MergeSum {
            a: &a.entries,
            b: &b.entries,
            i: 0,
            j: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entries(&self) -> &[SparseCount] {
        &self.entries
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    fn from_sorted_calls(size: usize, calls: &[SiteCall]) -> Self {
        let mut entries: Vec<SparseCount> = Vec::new();
        for call in calls {
            match entries.last_mut() {
                Some(last) if last.site == call.site && last.slot == call.slot => last.count += 1,
                _ => entries.push(SparseCount {
                    site: call.site,
                    slot: call.slot,
                    count: 1,
                }),
            }
        }
        Self { size, entries }
    }
}

/// Sorted merge of two sparse count lists, summing equal cells
pub struct MergeSum<'a> {
    a: &'a [SparseCount],
    b: &'a [SparseCount],
    i: usize,
    j: usize,
}

impl Iterator for MergeSum<'_> {
    type Item = SparseCount;

    #[inline]
    fn next(&mut self) -> Option<SparseCount> {
        match (self.a.get(self.i), self.b.get(self.j)) {
            (None, None) => None,
            (Some(&x), None) => {
                self.i += 1;
                Some(x)
            }
            (None, Some(&y)) => {
                self.j += 1;
                Some(y)
            }
            (Some(&x), Some(&y)) => match x.key().cmp(&y.key()) {
                Ordering::Less => {
                    self.i += 1;
                    Some(x)
                }
                Ordering::Greater => {
                    self.j += 1;
                    Some(y)
                }
                Ordering::Equal => {
                    self.i += 1;
                    self.j += 1;
                    Some(SparseCount {
                        site: x.site,
                        slot: x.slot,
                        count: x.count + y.count,
                    })
                }
            },
        }
    }
}

/// Immutable sparse allele-count representation of an alignment.
///
/// Sites are the alignment columns with at least one nucleotide call. Each site
/// keeps its observed alleles with the consensus first; each sequence stores
/// only its non-consensus and missing calls, sorted by site.
#[derive(Debug, Clone)]
pub struct SparseCountStore {
    names: Vec<String>,
    positions: Vec<usize>,
    allele_ptr: Vec<usize>,
    alleles: Vec<u8>,
    seq_ptr: Vec<usize>,
    calls: Vec<SiteCall>,
}

impl SparseCountStore {
    /// Build the store from an alignment
    pub fn from_alignment(alignment: &Alignment) -> Result<Self> {
        let n = alignment.n_sequences();
        if n == 0 {
            return Err(BapsError::empty_input("alignment contains no sequences"));
        }
        let sequences = alignment.sequences();
        let length = alignment.length();

        let column_counts: Vec<[u32; 4]> = (0..length)
            .into_par_iter()
            .map(|col| {
                let mut counts = [0u32; 4];
                for seq in sequences {
                    if let Some(code) = nucleotide_code(seq[col]) {
                        counts[code as usize] += 1;
                    }
                }
                counts
            })
            .collect();

        let mut positions = Vec::new();
        let mut allele_ptr = vec![0usize];
        let mut alleles = Vec::new();
        let mut slot_lookup: Vec<[u8; 4]> = Vec::new();

        for (col, counts) in column_counts.iter().enumerate() {
            let mut observed: Vec<u8> = (0u8..4).filter(|&c| counts[c as usize] > 0).collect();
            if observed.is_empty() {
                continue;
            }
            // Consensus first; ties go to the lower nucleotide code
            observed.sort_by(|&x, &y| counts[y as usize].cmp(&counts[x as usize]).then(x.cmp(&y)));

            let mut lookup = [MISSING; 4];
            for (slot, &code) in observed.iter().enumerate() {
                lookup[code as usize] = slot as u8;
            }
            positions.push(col);
            alleles.extend_from_slice(&observed);
            allele_ptr.push(alleles.len());
            slot_lookup.push(lookup);
        }

        if positions.is_empty() {
            return Err(BapsError::empty_input(
                "alignment has no informative sites (every column is missing data)",
            ));
        }

        let per_sequence: Vec<Vec<SiteCall>> = sequences
            .par_iter()
            .map(|seq| {
                let mut calls = Vec::new();
                for (site, &col) in positions.iter().enumerate() {
                    match nucleotide_code(seq[col]) {
                        None => calls.push(SiteCall {
                            site: site as u32,
                            slot: MISSING,
                        }),
                        Some(code) => {
                            let slot = slot_lookup[site][code as usize];
                            if slot != 0 {
                                calls.push(SiteCall {
                                    site: site as u32,
                                    slot,
                                });
                            }
                        }
                    }
                }
                calls
            })
            .collect();

        let store = Self::from_parts(
            alignment.names().to_vec(),
            positions,
            allele_ptr,
            alleles,
            per_sequence,
        );
        log::info!(
            "Sparse store: {} sequences x {} sites ({} segregating), {} stored calls",
            store.n_sequences(),
            store.n_sites(),
            store.segregating_sites(),
            store.calls.len()
        );
        Ok(store)
    }

    fn from_parts(
        names: Vec<String>,
        positions: Vec<usize>,
        allele_ptr: Vec<usize>,
        alleles: Vec<u8>,
        per_sequence: Vec<Vec<SiteCall>>,
    ) -> Self {
        let mut seq_ptr = Vec::with_capacity(per_sequence.len() + 1);
        seq_ptr.push(0);
        let total: usize = per_sequence.iter().map(|c| c.len()).sum();
        let mut calls = Vec::with_capacity(total);
        for seq_calls in per_sequence {
            calls.extend(seq_calls);
            seq_ptr.push(calls.len());
        }
        Self {
            names,
            positions,
            allele_ptr,
            alleles,
            seq_ptr,
            calls,
        }
    }

    pub fn n_sequences(&self) -> usize {
        self.names.len()
    }

    pub fn n_sites(&self) -> usize {
        self.positions.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Alignment column of each site
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Observed nucleotide codes at a site, consensus first
    pub fn site_alleles(&self, site: usize) -> &[u8] {
        &self.alleles[self.allele_ptr[site]..self.allele_ptr[site + 1]]
    }

    pub fn n_alleles(&self, site: usize) -> usize {
        self.allele_ptr[site + 1] - self.allele_ptr[site]
    }

    /// Offsets of each site's allele list within the flat allele array
    pub fn allele_offsets(&self) -> &[usize] {
        &self.allele_ptr
    }

    pub fn consensus_base(&self, site: usize) -> u8 {
        NUCLEOTIDES[self.alleles[self.allele_ptr[site]] as usize]
    }

    /// Number of sites with at least two observed alleles
    pub fn segregating_sites(&self) -> usize {
        self.allele_ptr.windows(2).filter(|w| w[1] - w[0] > 1).count()
    }

    /// Stored calls of one sequence
    pub fn calls(&self, seq: usize) -> &[SiteCall] {
        &self.calls[self.seq_ptr[seq]..self.seq_ptr[seq + 1]]
    }

    pub fn total_calls(&self) -> usize {
        self.calls.len()
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        let n = self.n_sequences();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(BapsError::mismatched(format!(
                "sequence index {} out of range for a store of {} sequences",
                bad, n
            )));
        }
        Ok(())
    }

    /// Aggregated counts of a single sequence
    pub fn leaf_counts(&self, seq: usize) -> ClusterCounts {
        ClusterCounts::singleton(self.calls(seq))
    }

    /// Aggregated counts over an arbitrary subset of sequences.
    ///
    /// Cost is proportional to the number of stored calls of the members.
    pub fn aggregate(&self, indices: &[usize]) -> Result<ClusterCounts> {
        self.check_indices(indices)?;
        if let [single] = indices {
            return Ok(self.leaf_counts(*single));
        }
        let mut calls: Vec<SiteCall> = indices
            .iter()
            .flat_map(|&i| self.calls(i).iter().copied())
            .collect();
        calls.sort_unstable();
        Ok(ClusterCounts::from_sorted_calls(indices.len(), &calls))
    }

    /// Total count of every allele slot, aligned with `allele_offsets`
    pub fn site_allele_counts(&self) -> Vec<u32> {
        let n = self.n_sequences() as u32;
        let mut totals = vec![0u32; self.alleles.len()];
        let mut missing = vec![0u32; self.n_sites()];
        for call in &self.calls {
            let site = call.site as usize;
            if call.slot == MISSING {
                missing[site] += 1;
            } else {
                totals[self.allele_ptr[site] + call.slot as usize] += 1;
            }
        }
        for site in 0..self.n_sites() {
            let start = self.allele_ptr[site];
            let others: u32 = totals[start + 1..self.allele_ptr[site + 1]].iter().sum();
            totals[start] = n - missing[site] - others;
        }
        totals
    }

    /// An independent store over the given sequences.
    ///
    /// Sites, observed alleles and consensus are recomputed from the members
    /// alone, so the result equals the store of their sub-alignment.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.is_empty() {
            return Err(BapsError::empty_input("cannot take an empty subset of sequences"));
        }
        self.check_indices(indices)?;
        let mut seen = vec![false; self.n_sequences()];
        for &i in indices {
            if std::mem::replace(&mut seen[i], true) {
                return Err(BapsError::mismatched(format!(
                    "sequence index {} selected more than once",
                    i
                )));
            }
        }

        let m = indices.len() as u32;
        let mut slot_counts = vec![0u32; self.alleles.len()];
        let mut missing = vec![0u32; self.n_sites()];
        for &i in indices {
            for call in self.calls(i) {
                let site = call.site as usize;
                if call.slot == MISSING {
                    missing[site] += 1;
                } else {
                    slot_counts[self.allele_ptr[site] + call.slot as usize] += 1;
                }
            }
        }

        // slot_map takes a parent allele offset to the member-only slot
        let mut slot_map = vec![MISSING; self.alleles.len()];
        let mut kept = Vec::new();
        let mut positions = Vec::new();
        let mut allele_ptr = vec![0usize];
        let mut alleles = Vec::new();
        for site in 0..self.n_sites() {
            let (start, end) = (self.allele_ptr[site], self.allele_ptr[site + 1]);
            let others: u32 = slot_counts[start + 1..end].iter().sum();
            slot_counts[start] = m - missing[site] - others;

            let mut observed: Vec<usize> = (start..end).filter(|&k| slot_counts[k] > 0).collect();
            if observed.is_empty() {
                continue;
            }
            observed.sort_by(|&x, &y| {
                slot_counts[y]
                    .cmp(&slot_counts[x])
                    .then(self.alleles[x].cmp(&self.alleles[y]))
            });
            for (slot, &k) in observed.iter().enumerate() {
                slot_map[k] = slot as u8;
                alleles.push(self.alleles[k]);
            }
            positions.push(self.positions[site]);
            allele_ptr.push(alleles.len());
            kept.push(site);
        }

        if positions.is_empty() {
            return Err(BapsError::empty_input(
                "selected sequences have no calls at any site",
            ));
        }

        let per_sequence: Vec<Vec<SiteCall>> = indices
            .par_iter()
            .map(|&i| {
                let stored = self.calls(i);
                let mut next = 0;
                let mut calls = Vec::new();
                for (new_site, &site) in kept.iter().enumerate() {
                    while next < stored.len() && (stored[next].site as usize) < site {
                        next += 1;
                    }
                    let parent_slot = match stored.get(next) {
                        Some(call) if call.site as usize == site => call.slot,
                        _ => 0,
                    };
                    let slot = if parent_slot == MISSING {
                        MISSING
                    } else {
                        slot_map[self.allele_ptr[site] + parent_slot as usize]
                    };
                    if slot != 0 {
                        calls.push(SiteCall {
                            site: new_site as u32,
                            slot,
                        });
                    }
                }
                calls
            })
            .collect();

        let names = indices.iter().map(|&i| self.names[i].clone()).collect();
        Ok(Self::from_parts(
            names,
            positions,
            allele_ptr,
            alleles,
            per_sequence,
        ))
    }

    /// A new store whose site `j` copies base site `site_indices[j]`
    pub fn resample_sites(&self, site_indices: &[usize]) -> Result<Self> {
        if site_indices.is_empty() {
            return Err(BapsError::empty_input("site resample is empty"));
        }
        let n_sites = self.n_sites();
        if let Some(&bad) = site_indices.iter().find(|&&s| s >= n_sites) {
            return Err(BapsError::mismatched(format!(
                "site index {} out of range for a store of {} sites",
                bad, n_sites
            )));
        }

        // targets[target_ptr[s]..target_ptr[s+1]] lists the new sites copied from base site s
        let mut target_ptr = vec![0usize; n_sites + 1];
        for &s in site_indices {
            target_ptr[s + 1] += 1;
        }
        for s in 0..n_sites {
            target_ptr[s + 1] += target_ptr[s];
        }
        let mut fill = target_ptr.clone();
        let mut targets = vec![0u32; site_indices.len()];
        for (new_site, &s) in site_indices.iter().enumerate() {
            targets[fill[s]] = new_site as u32;
            fill[s] += 1;
        }

        let mut positions = Vec::with_capacity(site_indices.len());
        let mut allele_ptr = Vec::with_capacity(site_indices.len() + 1);
        allele_ptr.push(0);
        let mut alleles = Vec::new();
        for &s in site_indices {
            positions.push(self.positions[s]);
            alleles.extend_from_slice(self.site_alleles(s));
            allele_ptr.push(alleles.len());
        }

        let per_sequence: Vec<Vec<SiteCall>> = (0..self.n_sequences())
            .into_par_iter()
            .map(|seq| {
                let mut calls = Vec::new();
                for call in self.calls(seq) {
                    let s = call.site as usize;
                    for &new_site in &targets[target_ptr[s]..target_ptr[s + 1]] {
                        calls.push(SiteCall {
                            site: new_site,
                            slot: call.slot,
                        });
                    }
                }
                calls.sort_unstable();
                calls
            })
            .collect();

        Ok(Self::from_parts(
            self.names.clone(),
            positions,
            allele_ptr,
            alleles,
            per_sequence,
        ))
    }

    /// Number of sites where both sequences have calls and the calls differ
    pub fn hamming(&self, i: usize, j: usize) -> usize {
        let (a, b) = (self.calls(i), self.calls(j));
        let (mut x, mut y) = (0, 0);
        let mut differences = 0;
        loop {
            let take_a = match (a.get(x), b.get(y)) {
                (Some(ca), Some(cb)) if ca.site == cb.site => {
                    if ca.slot != MISSING && cb.slot != MISSING && ca.slot != cb.slot {
                        differences += 1;
                    }
                    x += 1;
                    y += 1;
                    continue;
                }
                (Some(ca), Some(cb)) => ca.site < cb.site,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            // A call present on one side only differs from the other's consensus
            let call = if take_a { &a[x] } else { &b[y] };
            if call.slot != MISSING {
                differences += 1;
            }
            if take_a {
                x += 1;
            } else {
                y += 1;
            }
        }
        differences
    }

    /// CRC32 over names, site alleles and calls
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = Hasher::new();
        for name in &self.names {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        for &ptr in &self.allele_ptr {
            hasher.update(&(ptr as u64).to_le_bytes());
        }
        hasher.update(&self.alleles);
        for &ptr in &self.seq_ptr {
            hasher.update(&(ptr as u64).to_le_bytes());
        }
        for call in &self.calls {
            hasher.update(&call.site.to_le_bytes());
            hasher.update(&[call.slot]);
        }
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> SparseCountStore {
        SparseCountStore::from_alignment(&Alignment::from_pairs(pairs).unwrap()).unwrap()
    }

    #[test]
    fn test_store_construction() {
        let s = store(&[("a", "AAC-"), ("b", "AGCN"), ("c", "AGTN")]);
        // Last column is all missing and dropped
        assert_eq!(s.n_sites(), 3);
        assert_eq!(s.positions(), &[0, 1, 2]);
        assert_eq!(s.segregating_sites(), 2);
        // Column 1: G twice, A once -> consensus G
        assert_eq!(s.consensus_base(1), b'G');
        assert_eq!(s.n_alleles(0), 1);
        // a differs from consensus at column 1 only
        assert_eq!(
            s.calls(0),
            &[SiteCall { site: 1, slot: 1 }]
        );
        assert_eq!(s.calls(1), &[] as &[SiteCall]);
        assert_eq!(s.calls(2), &[SiteCall { site: 2, slot: 1 }]);
    }

    #[test]
    fn test_missing_calls_are_stored() {
        let s = store(&[("a", "AC"), ("b", "NC"), ("c", "AC")]);
        assert_eq!(s.calls(1), &[SiteCall { site: 0, slot: MISSING }]);
    }

    #[test]
    fn test_all_missing_alignment_fails() {
        let aln = Alignment::from_pairs(&[("a", "NN-"), ("b", "-?N")]).unwrap();
        assert!(matches!(
            SparseCountStore::from_alignment(&aln),
            Err(BapsError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_aggregate_matches_merged() {
        let s = store(&[("a", "ACGT"), ("b", "TCGA"), ("c", "TGGA"), ("d", "AC-A")]);
        let left = s.aggregate(&[0, 1]).unwrap();
        let right = s.aggregate(&[2, 3]).unwrap();
        let all = s.aggregate(&[0, 1, 2, 3]).unwrap();
        assert_eq!(ClusterCounts::merged(&left, &right), all);
        assert_eq!(all.size(), 4);
        assert!(s.aggregate(&[7]).is_err());
    }

    #[test]
    fn test_site_allele_counts_sum_to_observed() {
        let s = store(&[("a", "AC"), ("b", "GC"), ("c", "NT"), ("d", "AC")]);
        let totals = s.site_allele_counts();
        let offsets = s.allele_offsets();
        let site0: u32 = totals[offsets[0]..offsets[1]].iter().sum();
        let site1: u32 = totals[offsets[1]..offsets[2]].iter().sum();
        assert_eq!(site0, 3);
        assert_eq!(site1, 4);
        assert_eq!(totals[offsets[0]], 2);
    }

    #[test]
    fn test_subset_and_resample() {
        let s = store(&[("a", "ACGT"), ("b", "TCGA"), ("c", "TGGA")]);
        let sub = s.subset(&[2, 0]).unwrap();
        assert_eq!(sub.names(), &["c".to_string(), "a".to_string()]);
        assert_eq!(sub.n_sites(), s.n_sites());
        assert_eq!(sub.segregating_sites(), 3);
        assert!(s.subset(&[0, 0]).is_err());
        assert!(s.subset(&[]).is_err());

        let resampled = s.resample_sites(&[1, 1, 0, 3]).unwrap();
        assert_eq!(resampled.n_sites(), 4);
        assert_eq!(resampled.n_sequences(), 3);
        // c differs at base site 1, which now appears twice
        let c_sites: Vec<u32> = resampled.calls(2).iter().map(|c| c.site).collect();
        assert!(c_sites.contains(&0) && c_sites.contains(&1));
        assert!(s.resample_sites(&[9]).is_err());
    }

    #[test]
    fn test_subset_equals_store_of_sub_alignment() {
        let rows = [
            ("a", "ACGTTA-A"),
            ("b", "ACGTTANA"),
            ("c", "TGCAAC-G"),
            ("d", "TGCAACTG"),
            ("e", "TGCTAGTG"),
        ];
        let s = store(&rows);
        let sub = s.subset(&[4, 2, 3]).unwrap();
        let fresh = store(&[rows[4], rows[2], rows[3]]);
        assert_eq!(sub.positions(), fresh.positions());
        assert_eq!(sub.allele_offsets(), fresh.allele_offsets());
        for site in 0..fresh.n_sites() {
            assert_eq!(sub.site_alleles(site), fresh.site_alleles(site));
        }
        for seq in 0..fresh.n_sequences() {
            assert_eq!(sub.calls(seq), fresh.calls(seq));
        }
        assert_eq!(sub.fingerprint(), fresh.fingerprint());

        // Identical members leave nothing segregating
        let pair = s.subset(&[0, 1]).unwrap();
        assert_eq!(pair.segregating_sites(), 0);
        // Column 6 has no calls among a and b
        assert!(!pair.positions().contains(&6));
    }

    #[test]
    fn test_hamming() {
        let s = store(&[("a", "ACGT"), ("b", "TCGA"), ("c", "TNGA"), ("d", "ACGT")]);
        assert_eq!(s.hamming(0, 3), 0);
        assert_eq!(s.hamming(0, 1), 2);
        assert_eq!(s.hamming(1, 2), 0);
        assert_eq!(s.hamming(0, 2), s.hamming(2, 0));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let s1 = store(&[("a", "AC"), ("b", "AG")]);
        let s2 = store(&[("a", "AC"), ("b", "TG")]);
        assert_eq!(s1.fingerprint(), s1.clone().fingerprint());
        assert_ne!(s1.fingerprint(), s2.fingerprint());
    }
}
