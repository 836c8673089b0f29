// prior.rs - Dirichlet hyperparameter policies and optimisation

use crate::core::likelihood::site_log_likelihood;
use crate::data::SparseCountStore;
use crate::error::{BapsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Concentration given to every allele by the symmetric policy
pub const SYMMETRIC_ALPHA: f64 = 1.0;

/// Total concentration per site for the hc policy
pub const HC_SCALE: f64 = 2.0;

/// Prior policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorType {
    Symmetric,
    OptimiseSymmetric,
    Baps,
    Hc,
}

impl FromStr for PriorType {
    type Err = BapsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "symmetric" => Ok(PriorType::Symmetric),
            "optimise.symmetric" | "optimise-symmetric" | "optimize.symmetric"
            | "optimize-symmetric" => Ok(PriorType::OptimiseSymmetric),
            "baps" => Ok(PriorType::Baps),
            "hc" => Ok(PriorType::Hc),
            _ => Err(BapsError::UnknownPriorType { tag: s.to_string() }),
        }
    }
}

impl PriorType {
    pub fn tag(&self) -> &'static str {
        match self {
            PriorType::Symmetric => "symmetric",
            PriorType::OptimiseSymmetric => "optimise.symmetric",
            PriorType::Baps => "baps",
            PriorType::Hc => "hc",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PriorType::Symmetric => "symmetric (1.0 per allele)",
            PriorType::OptimiseSymmetric => "optimised symmetric concentration",
            PriorType::Baps => "BAPS (1/k per allele)",
            PriorType::Hc => "BHC empirical frequencies",
        }
    }
}

impl fmt::Display for PriorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Sites sharing the same consensus concentration and total concentration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteGroup {
    pub consensus_alpha: f64,
    pub total: f64,
    pub sites: usize,
}

/// Per-site Dirichlet concentrations, one per observed allele, consensus first
#[derive(Debug, Clone, PartialEq)]
pub struct Prior {
    policy: PriorType,
    offsets: Vec<usize>,
    values: Vec<f64>,
    totals: Vec<f64>,
    groups: Vec<SiteGroup>,
    concentration: Option<f64>,
}

impl Prior {
    /// Build a prior from flat per-allele values laid out by `offsets`
    pub fn from_values(
        policy: PriorType,
        offsets: Vec<usize>,
        values: Vec<f64>,
        concentration: Option<f64>,
    ) -> Result<Self> {
        if offsets.first() != Some(&0) || offsets.last() != Some(&values.len()) {
            return Err(BapsError::mismatched(
                "prior offsets do not cover the value array",
            ));
        }
        if let Some(bad) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(BapsError::config(format!(
                "prior concentrations must be positive and finite, got {}",
                bad
            )));
        }

        let totals: Vec<f64> = offsets
            .windows(2)
            .map(|w| values[w[0]..w[1]].iter().sum())
            .collect();

        // Single-allele sites contribute nothing to any likelihood
        let mut grouped: BTreeMap<(u64, u64), usize> = BTreeMap::new();
        for (site, w) in offsets.windows(2).enumerate() {
            if w[1] - w[0] > 1 {
                *grouped
                    .entry((values[w[0]].to_bits(), totals[site].to_bits()))
                    .or_insert(0) += 1;
            }
        }
        let groups = grouped
            .into_iter()
            .map(|((alpha, total), sites)| SiteGroup {
                consensus_alpha: f64::from_bits(alpha),
                total: f64::from_bits(total),
                sites,
            })
            .collect();

        Ok(Self {
            policy,
            offsets,
            values,
            totals,
            groups,
            concentration,
        })
    }

    /// The same concentration for every allele of every site
    pub fn symmetric_with(store: &SparseCountStore, alpha: f64, policy: PriorType) -> Result<Self> {
        let offsets = store.allele_offsets().to_vec();
        let values = vec![alpha; *offsets.last().unwrap_or(&0)];
        Self::from_values(policy, offsets, values, Some(alpha))
    }

    pub fn policy(&self) -> PriorType {
        self.policy
    }

    /// Shared scalar concentration, for the symmetric policies
    pub fn concentration(&self) -> Option<f64> {
        self.concentration
    }

    pub fn n_sites(&self) -> usize {
        self.totals.len()
    }

    pub fn site_alphas(&self, site: usize) -> &[f64] {
        &self.values[self.offsets[site]..self.offsets[site + 1]]
    }

    pub fn site_total(&self, site: usize) -> f64 {
        self.totals[site]
    }

    pub fn groups(&self) -> &[SiteGroup] {
        &self.groups
    }

    /// Check that the prior covers exactly the store's sites and alleles
    pub fn check_store(&self, store: &SparseCountStore) -> Result<()> {
        if self.n_sites() != store.n_sites() {
            return Err(BapsError::mismatched(format!(
                "prior covers {} sites but the store has {}",
                self.n_sites(),
                store.n_sites()
            )));
        }
        if self.offsets != store.allele_offsets() {
            return Err(BapsError::mismatched(
                "prior allele layout does not match the store",
            ));
        }
        Ok(())
    }

    /// A new prior whose site `j` copies site `site_indices[j]`
    pub fn resample(&self, site_indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = site_indices.iter().find(|&&s| s >= self.n_sites()) {
            return Err(BapsError::mismatched(format!(
                "site index {} out of range for a prior of {} sites",
                bad,
                self.n_sites()
            )));
        }
        let mut offsets = Vec::with_capacity(site_indices.len() + 1);
        offsets.push(0);
        let mut values = Vec::new();
        for &s in site_indices {
            values.extend_from_slice(self.site_alphas(s));
            offsets.push(values.len());
        }
        Self::from_values(self.policy, offsets, values, self.concentration)
    }
}

/// Computes a prior for a store under a policy
#[derive(Debug, Clone)]
pub struct PriorOptimizer {
    /// Search interval for the optimised symmetric concentration
    pub interval: (f64, f64),
    /// Convergence tolerance on log(concentration)
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PriorOptimizer {
    fn default() -> Self {
        Self {
            interval: (5e-4, 10.0),
            tolerance: 1e-4,
            max_iterations: 100,
        }
    }
}

impl PriorOptimizer {
    /// Parse a policy tag and optimise
    pub fn optimize_tag(&self, store: &SparseCountStore, tag: &str) -> Result<Prior> {
        let policy = PriorType::from_str(tag)?;
        self.optimize(store, policy)
    }

    pub fn optimize(&self, store: &SparseCountStore, policy: PriorType) -> Result<Prior> {
        if store.n_sites() == 0 || store.n_sequences() == 0 {
            return Err(BapsError::empty_input("store has no sites or sequences"));
        }
        let prior = match policy {
            PriorType::Symmetric => Prior::symmetric_with(store, SYMMETRIC_ALPHA, policy)?,
            PriorType::OptimiseSymmetric => self.optimise_symmetric(store)?,
            PriorType::Baps => Self::baps(store)?,
            PriorType::Hc => Self::hc(store)?,
        };
        log::info!(
            "Prior: {}{}",
            policy.description(),
            prior
                .concentration()
                .map(|c| format!(" (concentration {:.6})", c))
                .unwrap_or_default()
        );
        Ok(prior)
    }

    fn baps(store: &SparseCountStore) -> Result<Prior> {
        let offsets = store.allele_offsets().to_vec();
        let mut values = Vec::with_capacity(*offsets.last().unwrap_or(&0));
        for w in offsets.windows(2) {
            let k = (w[1] - w[0]) as f64;
            values.extend(std::iter::repeat(1.0 / k).take(w[1] - w[0]));
        }
        Prior::from_values(PriorType::Baps, offsets, values, None)
    }

    fn hc(store: &SparseCountStore) -> Result<Prior> {
        let offsets = store.allele_offsets().to_vec();
        let totals = store.site_allele_counts();
        let mut values = Vec::with_capacity(totals.len());
        for w in offsets.windows(2) {
            let counts = &totals[w[0]..w[1]];
            let observed: u32 = counts.iter().sum();
            let k = counts.len() as f64;
            values.extend(
                counts
                    .iter()
                    .map(|&n| HC_SCALE * (n as f64 + 1.0) / (observed as f64 + k)),
            );
        }
        Prior::from_values(PriorType::Hc, offsets, values, None)
    }

    /// Pooled marginal log-likelihood of all sequences under a shared concentration
    fn pooled_objective(alpha: f64, offsets: &[usize], totals: &[u32], scratch: &mut Vec<f64>) -> f64 {
        let mut total = 0.0;
        for w in offsets.windows(2) {
            let k = w[1] - w[0];
            if k < 2 {
                continue;
            }
            scratch.clear();
            scratch.resize(k, alpha);
            total += site_log_likelihood(scratch, &totals[w[0]..w[1]]);
        }
        total
    }

    /// Golden-section search over log(concentration)
    fn optimise_symmetric(&self, store: &SparseCountStore) -> Result<Prior> {
        if store.segregating_sites() == 0 {
            return Err(BapsError::empty_input(
                "optimise.symmetric needs at least one informative (segregating) site",
            ));
        }
        let (lo, hi) = self.interval;
        if !(lo > 0.0 && hi > lo && hi.is_finite()) {
            return Err(BapsError::config(format!(
                "invalid prior search interval [{}, {}]",
                lo, hi
            )));
        }

        let offsets = store.allele_offsets();
        let totals = store.site_allele_counts();
        let mut scratch = Vec::new();
        let mut objective = |x: f64| Self::pooled_objective(x.exp(), offsets, &totals, &mut scratch);

        let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
        let (mut a, mut b) = (lo.ln(), hi.ln());
        let mut c = b - inv_phi * (b - a);
        let mut d = a + inv_phi * (b - a);
        let mut fc = objective(c);
        let mut fd = objective(d);

        for iteration in 1..=self.max_iterations {
            if !(fc.is_finite() && fd.is_finite()) {
                return Err(BapsError::NonConvergence {
                    iterations: iteration,
                    message: "objective is not finite".to_string(),
                });
            }
            if (b - a).abs() < self.tolerance {
                let alpha = ((a + b) / 2.0).exp();
                log::debug!(
                    "optimise.symmetric converged after {} iterations: alpha = {:.6}",
                    iteration,
                    alpha
                );
                return Prior::symmetric_with(store, alpha, PriorType::OptimiseSymmetric);
            }
            if fc > fd {
                b = d;
                d = c;
                fd = fc;
                c = b - inv_phi * (b - a);
                fc = objective(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + inv_phi * (b - a);
                fd = objective(d);
            }
        }

        Err(BapsError::NonConvergence {
            iterations: self.max_iterations,
            message: format!(
                "search interval still [{:.3e}, {:.3e}]",
                a.exp(),
                b.exp()
            ),
        })
    }
}
