// likelihood.rs - Dirichlet-multinomial marginal likelihoods and merge scores

use crate::core::prior::Prior;
use crate::data::{ClusterCounts, SparseCount, MISSING};
use statrs::function::gamma::ln_gamma;

/// Largest allele count at any site (A, C, G, T)
const MAX_ALLELES: usize = 4;

/// Dirichlet-multinomial log marginal likelihood of one site.
///
/// `alphas` and `counts` are aligned by allele slot.
pub fn site_log_likelihood(alphas: &[f64], counts: &[u32]) -> f64 {
    let total_alpha: f64 = alphas.iter().sum();
    let observed: u32 = counts.iter().sum();
    let mut value = ln_gamma(total_alpha) - ln_gamma(total_alpha + observed as f64);
    for (&alpha, &n) in alphas.iter().zip(counts) {
        if n > 0 {
            value += ln_gamma(alpha + n as f64) - ln_gamma(alpha);
        }
    }
    value
}

/// Log-likelihood of `size` sequences that all carry the consensus at every
/// segregating site
pub fn baseline(prior: &Prior, size: usize) -> f64 {
    let m = size as f64;
    prior
        .groups()
        .iter()
        .map(|g| {
            g.sites as f64
                * (ln_gamma(g.total) - ln_gamma(g.total + m) + ln_gamma(g.consensus_alpha + m)
                    - ln_gamma(g.consensus_alpha))
        })
        .sum()
}

/// Difference between the true likelihood and the all-consensus baseline,
/// summed over the sites present in a sorted sparse count stream
fn sparse_correction<I>(prior: &Prior, size: usize, entries: I) -> f64
where
    I: Iterator<Item = SparseCount>,
{
    let mut total = 0.0;
    let mut current: Option<u32> = None;
    let mut missing = 0u32;
    let mut counts = [0u32; MAX_ALLELES];

    let flush = |site: u32, missing: u32, counts: &[u32; MAX_ALLELES]| -> f64 {
        let site = site as usize;
        let alphas = prior.site_alphas(site);
        if alphas.len() < 2 {
            return 0.0;
        }
        let a = prior.site_total(site);
        let m = size as f64;
        let mut diff = ln_gamma(a + m) - ln_gamma(a + m - missing as f64);
        let mut others = 0u32;
        for (slot, &n) in counts.iter().enumerate().take(alphas.len()).skip(1) {
            if n > 0 {
                diff += ln_gamma(alphas[slot] + n as f64) - ln_gamma(alphas[slot]);
                others += n;
            }
        }
        let consensus = size as u32 - missing - others;
        diff + ln_gamma(alphas[0] + consensus as f64) - ln_gamma(alphas[0] + m)
    };

    for entry in entries {
        if current != Some(entry.site) {
            if let Some(site) = current {
                total += flush(site, missing, &counts);
            }
            current = Some(entry.site);
            missing = 0;
            counts = [0; MAX_ALLELES];
        }
        if entry.slot == MISSING {
            missing += entry.count;
        } else {
            counts[entry.slot as usize] += entry.count;
        }
    }
    if let Some(site) = current {
        total += flush(site, missing, &counts);
    }
    total
}

/// Per-size cache of `baseline`; NaN marks sizes not yet computed
#[derive(Debug, Clone)]
pub struct BaselineTable {
    values: Vec<f64>,
}

impl BaselineTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            values: vec![f64::NAN; max_size + 1],
        }
    }

    pub fn ensure(&mut self, prior: &Prior, size: usize) {
        if size >= self.values.len() {
            self.values.resize(size + 1, f64::NAN);
        }
        if self.values[size].is_nan() {
            self.values[size] = baseline(prior, size);
        }
    }

    /// Cached value, computed on the fly when absent
    pub fn get(&self, prior: &Prior, size: usize) -> f64 {
        match self.values.get(size) {
            Some(v) if !v.is_nan() => *v,
            _ => baseline(prior, size),
        }
    }
}

/// Marginal log-likelihood of a cluster's aggregated counts
pub fn log_likelihood(counts: &ClusterCounts, prior: &Prior) -> f64 {
    baseline(prior, counts.size())
        + sparse_correction(prior, counts.size(), counts.entries().iter().copied())
}

/// log(exp(a) + exp(b))
#[inline]
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Merge probability from log-odds
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Live state of a cluster on the agglomeration frontier
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub counts: ClusterCounts,
    /// Smallest member sequence index
    pub key: usize,
    pub log_likelihood: f64,
    pub log_d: f64,
    /// Log marginal likelihood of the data under all tree-consistent partitions
    pub log_tree: f64,
}

/// Outcome of scoring one candidate merge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeScore {
    pub log_likelihood: f64,
    pub log_d: f64,
    pub log_tree: f64,
    /// log(r / (1 - r))
    pub log_odds: f64,
}

impl MergeScore {
    pub fn merge_probability(&self) -> f64 {
        sigmoid(self.log_odds)
    }
}

/// BHC merge scoring under a fixed prior and mixture concentration
#[derive(Debug, Clone)]
pub struct MergeLikelihood<'a> {
    prior: &'a Prior,
    log_alpha: f64,
    baselines: BaselineTable,
}

impl<'a> MergeLikelihood<'a> {
    pub fn new(prior: &'a Prior, mixture_concentration: f64, max_size: usize) -> Self {
        Self {
            prior,
            log_alpha: mixture_concentration.ln(),
            baselines: BaselineTable::new(max_size),
        }
    }

    pub fn prior(&self) -> &Prior {
        self.prior
    }

    /// Fill the baseline cache for a size before parallel scoring
    pub fn prepare(&mut self, size: usize) {
        self.baselines.ensure(self.prior, size);
    }

    pub fn log_likelihood(&self, counts: &ClusterCounts) -> f64 {
        self.baselines.get(self.prior, counts.size())
            + sparse_correction(self.prior, counts.size(), counts.entries().iter().copied())
    }

    /// Initial state of a frontier cluster that has no internal structure
    pub fn leaf(&self, counts: ClusterCounts, key: usize) -> ClusterState {
        let log_likelihood = self.log_likelihood(&counts);
        let log_d = self.log_alpha + ln_gamma(counts.size() as f64);
        ClusterState {
            counts,
            key,
            log_likelihood,
            log_d,
            log_tree: log_likelihood,
        }
    }

    /// Score the merge of two frontier clusters without materialising the
    /// merged counts
    pub fn score(&self, left: &ClusterState, right: &ClusterState) -> MergeScore {
        let size = left.counts.size() + right.counts.size();
        let log_likelihood = self.baselines.get(self.prior, size)
            + sparse_correction(
                self.prior,
                size,
                ClusterCounts::merge_iter(&left.counts, &right.counts),
            );

        let log_numerator = self.log_alpha + ln_gamma(size as f64);
        let log_children = left.log_d + right.log_d;
        let log_d = log_add_exp(log_numerator, log_children);
        let log_pi = log_numerator - log_d;
        let log_not_pi = log_children - log_d;

        let merged = log_pi + log_likelihood;
        let split = log_not_pi + left.log_tree + right.log_tree;
        MergeScore {
            log_likelihood,
            log_d,
            log_tree: log_add_exp(merged, split),
            log_odds: merged - split,
        }
    }

    /// Log-likelihood of the merged cluster and its merge probability r
    pub fn merge_bayes_factor(&self, left: &ClusterState, right: &ClusterState) -> (f64, f64) {
        let score = self.score(left, right);
        (score.log_likelihood, score.merge_probability())
    }

    /// Frontier state of the merged cluster
    pub fn merge(&self, left: ClusterState, right: ClusterState, score: &MergeScore) -> ClusterState {
        ClusterState {
            key: left.key.min(right.key),
            counts: ClusterCounts::merged(&left.counts, &right.counts),
            log_likelihood: score.log_likelihood,
            log_d: score.log_d,
            log_tree: score.log_tree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prior::{PriorOptimizer, PriorType};
    use crate::data::{Alignment, SparseCountStore};

    fn store(pairs: &[(&str, &str)]) -> SparseCountStore {
        SparseCountStore::from_alignment(&Alignment::from_pairs(pairs).unwrap()).unwrap()
    }

    /// Dense reference: sum of per-site terms over explicit counts
    fn dense_log_likelihood(s: &SparseCountStore, prior: &Prior, members: &[usize]) -> f64 {
        let mut total = 0.0;
        for site in 0..s.n_sites() {
            let mut counts = vec![0u32; s.n_alleles(site)];
            for &i in members {
                let call = s.calls(i).iter().find(|c| c.site as usize == site);
                match call {
                    Some(c) if c.slot == MISSING => {}
                    Some(c) => counts[c.slot as usize] += 1,
                    None => counts[0] += 1,
                }
            }
            total += site_log_likelihood(prior.site_alphas(site), &counts);
        }
        total
    }

    #[test]
    fn test_sparse_likelihood_matches_dense() {
        let s = store(&[
            ("a", "ACGTAC"),
            ("b", "ACGAAC"),
            ("c", "TCNAGC"),
            ("d", "ACGTA-"),
            ("e", "GCGTAC"),
        ]);
        for policy in [PriorType::Symmetric, PriorType::Baps, PriorType::Hc] {
            let prior = PriorOptimizer::default().optimize(&s, policy).unwrap();
            for members in [vec![0], vec![1, 2], vec![0, 2, 3], vec![0, 1, 2, 3, 4]] {
                let counts = s.aggregate(&members).unwrap();
                let sparse = log_likelihood(&counts, &prior);
                let dense = dense_log_likelihood(&s, &prior, &members);
                assert!(
                    (sparse - dense).abs() < 1e-9,
                    "{:?} {:?}: {} vs {}",
                    policy,
                    members,
                    sparse,
                    dense
                );
            }
        }
    }

    #[test]
    fn test_monomorphic_sites_do_not_contribute() {
        let s = store(&[("a", "AAAA"), ("b", "AAAA"), ("c", "AAAA")]);
        let prior = PriorOptimizer::default().optimize(&s, PriorType::Symmetric).unwrap();
        let counts = s.aggregate(&[0, 1, 2]).unwrap();
        assert_eq!(log_likelihood(&counts, &prior), 0.0);
    }

    #[test]
    fn test_score_matches_merged_counts() {
        let s = store(&[("a", "ACGT"), ("b", "ACGA"), ("c", "TGCA")]);
        let prior = PriorOptimizer::default().optimize(&s, PriorType::Symmetric).unwrap();
        let mut model = MergeLikelihood::new(&prior, 1.0 / 3.0, 3);
        for size in 1..=3 {
            model.prepare(size);
        }
        let a = model.leaf(s.leaf_counts(0), 0);
        let b = model.leaf(s.leaf_counts(1), 1);
        let score = model.score(&a, &b);
        let direct = log_likelihood(&s.aggregate(&[0, 1]).unwrap(), &prior);
        assert!((score.log_likelihood - direct).abs() < 1e-12);

        let (ll, r) = model.merge_bayes_factor(&a, &b);
        assert_eq!(ll, score.log_likelihood);
        assert!(r > 0.0 && r < 1.0);
        assert!((r - sigmoid(score.log_odds)).abs() < 1e-15);
    }

    #[test]
    fn test_identical_pair_merge_probability() {
        // With no variation the merge probability reduces to pi = 1 / (1 + alpha)
        let s = store(&[("a", "ACGT"), ("b", "ACGT")]);
        let prior = PriorOptimizer::default().optimize(&s, PriorType::Symmetric).unwrap();
        let alpha = 0.5;
        let model = MergeLikelihood::new(&prior, alpha, 2);
        let a = model.leaf(s.leaf_counts(0), 0);
        let b = model.leaf(s.leaf_counts(1), 1);
        let (_, r) = model.merge_bayes_factor(&a, &b);
        assert!((r - 1.0 / (1.0 + alpha)).abs() < 1e-12);
    }

    #[test]
    fn test_log_add_exp_and_sigmoid() {
        assert!((log_add_exp(0.0, 0.0) - 2f64.ln()).abs() < 1e-15);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, -3.0), -3.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!(sigmoid(-800.0) >= 0.0 && sigmoid(800.0) <= 1.0);
    }
}
