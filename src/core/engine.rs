// engine.rs - Agglomerative Bayesian hierarchical clustering

use crate::core::dendrogram::{ClusterNode, Dendrogram};
use crate::core::likelihood::{ClusterState, MergeLikelihood, MergeScore};
use crate::core::prior::Prior;
use crate::core::progress_bar;
use crate::core::seeding::LeaderSeeder;
use crate::data::{Partition, SparseCountStore};
use crate::error::{BapsError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

/// Automatic seeding only kicks in from this many sequences
pub const MIN_SEEDED_SEQUENCES: usize = 100;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhcConfig {
    /// Dirichlet-process concentration; defaults to 1/N
    pub mixture_concentration: Option<f64>,
    /// Partners kept per cluster once the frontier is too large to score every pair
    pub neighbors: usize,
    /// Frontier size at or below which every pair is scored
    pub exhaustive_limit: usize,
    /// Seed cluster count for automatic seeding; defaults to ceil(N/4)
    pub k_init: Option<usize>,
    pub auto_seed: bool,
    pub show_progress: bool,
}

impl Default for BhcConfig {
    fn default() -> Self {
        Self {
            mixture_concentration: None,
            neighbors: 16,
            exhaustive_limit: 512,
            k_init: None,
            auto_seed: false,
            show_progress: false,
        }
    }
}

impl BhcConfig {
    pub fn concentration_for(&self, n: usize) -> Result<f64> {
        let alpha = self.mixture_concentration.unwrap_or(1.0 / n as f64);
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(BapsError::config(format!(
                "mixture concentration must be positive and finite, got {}",
                alpha
            )));
        }
        Ok(alpha)
    }

    pub fn k_init_for(&self, n: usize) -> usize {
        self.k_init.unwrap_or_else(|| (n + 3) / 4)
    }
}

/// Heap entry for one scored pair. Higher log-odds pops first; ties go to the
/// pair with the smaller keys.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: MergeScore,
    lo_key: usize,
    hi_key: usize,
    a: usize,
    b: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .log_odds
            .total_cmp(&other.score.log_odds)
            .then_with(|| other.lo_key.cmp(&self.lo_key))
            .then_with(|| other.hi_key.cmp(&self.hi_key))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Working state of one agglomeration
struct Frontier<'a> {
    model: MergeLikelihood<'a>,
    nodes: Vec<ClusterNode>,
    states: Vec<Option<ClusterState>>,
    active: BTreeSet<usize>,
    neighbors: Vec<Vec<usize>>,
    heap: BinaryHeap<Candidate>,
    exhaustive: bool,
    k: usize,
}

impl<'a> Frontier<'a> {
    fn score_pair(&self, a: usize, b: usize) -> Option<Candidate> {
        let x = self.states[a].as_ref()?;
        let y = self.states[b].as_ref()?;
        Some(Candidate {
            score: self.model.score(x, y),
            lo_key: x.key.min(y.key),
            hi_key: x.key.max(y.key),
            a,
            b,
        })
    }

    fn size_of(&self, id: usize) -> usize {
        self.states[id].as_ref().map_or(0, |s| s.counts.size())
    }

    /// Fill baselines for every pairwise sum of active cluster sizes
    fn prepare_pair_sizes(&mut self) {
        let mut sizes: Vec<usize> = self.active.iter().map(|&id| self.size_of(id)).collect();
        sizes.sort_unstable();
        sizes.dedup();
        for (i, &x) in sizes.iter().enumerate() {
            for &y in &sizes[i..] {
                self.model.prepare(x + y);
            }
        }
    }

    fn score_all_pairs(&mut self) {
        self.prepare_pair_sizes();
        let ids: Vec<usize> = self.active.iter().copied().collect();
        let this = &*self;
        let scored: Vec<Candidate> = ids
            .par_iter()
            .enumerate()
            .flat_map_iter(|(x, &a)| ids[x + 1..].iter().filter_map(move |&b| this.score_pair(a, b)))
            .collect();
        log::debug!("Scored {} pairs over {} clusters", scored.len(), ids.len());
        self.heap.extend(scored);
    }

    fn link(&mut self, a: usize, b: usize) {
        self.neighbors[a].push(b);
        self.neighbors[b].push(a);
    }

    fn score_neighbors(&mut self) {
        self.prepare_pair_sizes();
        let ids: Vec<usize> = self.active.iter().copied().collect();
        let k = self.k;
        let this = &*self;
        let lists: Vec<Vec<Candidate>> = ids
            .par_iter()
            .map(|&a| {
                let mut scored: Vec<Candidate> = ids
                    .iter()
                    .filter(|&&b| b != a)
                    .filter_map(|&b| this.score_pair(a, b))
                    .collect();
                scored.sort_unstable_by(|x, y| y.cmp(x));
                scored.truncate(k);
                scored
            })
            .collect();

        let mut pairs: Vec<Candidate> = lists.into_iter().flatten().collect();
        for c in &pairs {
            self.link(c.a, c.b);
        }
        pairs.sort_unstable_by_key(|c| (c.a.min(c.b), c.a.max(c.b)));
        pairs.dedup_by_key(|c| (c.a.min(c.b), c.a.max(c.b)));
        log::debug!(
            "Neighbor graph: {} clusters, {} candidate pairs",
            ids.len(),
            pairs.len()
        );
        self.heap.extend(pairs);
    }

    /// Merge a live pair; returns the new node and the partners to score it against
    fn merge(&mut self, candidate: &Candidate) -> Option<(usize, Vec<usize>)> {
        let x = self.states[candidate.a].take()?;
        let y = match self.states[candidate.b].take() {
            Some(y) => y,
            None => {
                self.states[candidate.a] = Some(x);
                return None;
            }
        };
        let (left_id, left, right_id, right) = if x.key <= y.key {
            (candidate.a, x, candidate.b, y)
        } else {
            (candidate.b, y, candidate.a, x)
        };
        let state = self.model.merge(left, right, &candidate.score);
        let id = self.nodes.len();
        self.nodes.push(Dendrogram::internal_node(
            &state,
            left_id,
            right_id,
            candidate.score.log_odds,
        ));
        self.states.push(Some(state));
        self.active.remove(&candidate.a);
        self.active.remove(&candidate.b);

        let mut partners = std::mem::take(&mut self.neighbors[candidate.a]);
        partners.append(&mut self.neighbors[candidate.b]);
        self.neighbors.push(Vec::new());
        self.active.insert(id);
        Some((id, partners))
    }

    fn rescore(&mut self, id: usize, partners: Vec<usize>) {
        let mut targets: Vec<usize> = if self.exhaustive {
            Vec::new()
        } else {
            partners
                .into_iter()
                .filter(|p| *p != id && self.active.contains(p))
                .collect()
        };
        targets.sort_unstable();
        targets.dedup();
        if targets.is_empty() {
            targets = self.active.iter().copied().filter(|&p| p != id).collect();
        }

        let size = self.size_of(id);
        let sizes: Vec<usize> = targets.iter().map(|&t| self.size_of(t) + size).collect();
        for s in sizes {
            self.model.prepare(s);
        }

        let this = &*self;
        let mut scored: Vec<Candidate> = targets
            .par_iter()
            .filter_map(|&t| this.score_pair(id, t))
            .collect();
        if !self.exhaustive {
            scored.sort_unstable_by(|x, y| y.cmp(x));
            scored.truncate(self.k);
            for c in &scored {
                self.link(c.a, c.b);
            }
        }
        self.heap.extend(scored);
    }
}

/// Bayesian hierarchical clustering engine
#[derive(Debug, Clone, Default)]
pub struct BhcEngine {
    config: BhcConfig,
}

impl BhcEngine {
    pub fn new(config: BhcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BhcConfig {
        &self.config
    }

    /// Build the dendrogram, starting from singletons or from a seed partition
    pub fn build(
        &self,
        store: &SparseCountStore,
        prior: &Prior,
        seed: Option<&Partition>,
    ) -> Result<Dendrogram> {
        let n = store.n_sequences();
        if n < 2 {
            return Err(BapsError::empty_input(format!(
                "need at least two sequences to cluster, got {}",
                n
            )));
        }
        prior.check_store(store)?;
        let alpha = self.config.concentration_for(n)?;

        let groups: Vec<Vec<usize>> = match seed {
            Some(partition) => {
                if partition.len() != n {
                    return Err(BapsError::mismatched(format!(
                        "seed partition covers {} sequences but the store has {}",
                        partition.len(),
                        n
                    )));
                }
                if partition.n_clusters() < 2 {
                    return Err(BapsError::empty_input(
                        "seed partition must have at least two clusters",
                    ));
                }
                partition.clusters()
            }
            None => (0..n).map(|i| vec![i]).collect(),
        };

        let mut model = MergeLikelihood::new(prior, alpha, n);
        let mut sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        sizes.sort_unstable();
        sizes.dedup();
        for size in sizes {
            model.prepare(size);
        }

        let model_ref = &model;
        let leaves: Vec<ClusterState> = groups
            .par_iter()
            .map(|members| -> Result<ClusterState> {
                let counts = store.aggregate(members)?;
                Ok(model_ref.leaf(counts, members[0]))
            })
            .collect::<Result<Vec<_>>>()?;

        let nodes: Vec<ClusterNode> = leaves
            .iter()
            .zip(groups)
            .map(|(state, members)| Dendrogram::leaf_node(state, members))
            .collect();
        let start = nodes.len();
        log::info!(
            "BHC: {} starting clusters over {} sequences (alpha = {:.3e})",
            start,
            n,
            alpha
        );

        let mut frontier = Frontier {
            model,
            nodes,
            active: (0..start).collect(),
            neighbors: vec![Vec::new(); start],
            states: leaves.into_iter().map(Some).collect(),
            heap: BinaryHeap::new(),
            exhaustive: false,
            k: self.config.neighbors.max(1),
        };
        if start > self.config.exhaustive_limit {
            frontier.score_neighbors();
        }

        let pb = self.config.show_progress.then(|| progress_bar((start - 1) as u64));
        while frontier.active.len() > 1 {
            if !frontier.exhaustive && frontier.active.len() <= self.config.exhaustive_limit {
                frontier.exhaustive = true;
                frontier.score_all_pairs();
            }
            let candidate = match frontier.heap.pop() {
                Some(candidate) => candidate,
                None => {
                    log::debug!("Candidate heap exhausted; rescoring the whole frontier");
                    frontier.score_all_pairs();
                    continue;
                }
            };
            let Some((id, partners)) = frontier.merge(&candidate) else {
                continue;
            };
            log::debug!(
                "Merge {} + {} -> {} (size {}, log-odds {:.4})",
                candidate.a,
                candidate.b,
                id,
                frontier.nodes[id].size,
                candidate.score.log_odds
            );
            if frontier.active.len() > 1 {
                frontier.rescore(id, partners);
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("✅ Dendrogram built!");
        }

        Dendrogram::from_parts(
            frontier.nodes,
            n,
            prior.policy(),
            alpha,
            store.fingerprint(),
        )
    }

    /// Build with leader seeding when enabled and the store is large enough
    pub fn build_auto(&self, store: &SparseCountStore, prior: &Prior) -> Result<Dendrogram> {
        let n = store.n_sequences();
        if self.config.auto_seed && n >= MIN_SEEDED_SEQUENCES {
            let k = self.config.k_init_for(n);
            if k >= 2 && k < n {
                let seed = LeaderSeeder::new(k).seed(store)?;
                if seed.n_clusters() >= 2 {
                    log::info!("Seeded with {} leader clusters", seed.n_clusters());
                    return self.build(store, prior, Some(&seed));
                }
            }
        }
        self.build(store, prior, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::likelihood::log_likelihood;
    use crate::core::prior::{PriorOptimizer, PriorType};
    use crate::data::Alignment;

    fn fixture() -> (SparseCountStore, Prior) {
        let aln = Alignment::from_pairs(&[
            ("a1", "AAAAAAAACG"),
            ("a2", "AAAAAAAACT"),
            ("b1", "TTTTTTTTCG"),
            ("a3", "AAAAAAATCG"),
            ("b2", "TTTTTTTTGG"),
            ("b3", "TTTTTTTACG"),
            ("a4", "AAAAAAAAAG"),
            ("b4", "TTTTTTTTCC"),
        ])
        .unwrap();
        let store = SparseCountStore::from_alignment(&aln).unwrap();
        let prior = PriorOptimizer::default()
            .optimize(&store, PriorType::Symmetric)
            .unwrap();
        (store, prior)
    }

    #[test]
    fn test_build_produces_full_binary_tree() {
        let (store, prior) = fixture();
        let d = BhcEngine::default().build(&store, &prior, None).unwrap();
        assert_eq!(d.n_leaves(), 8);
        assert_eq!(d.n_internal(), 7);
        assert_eq!(d.members(d.root()), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_node_likelihoods_match_member_counts() {
        let (store, prior) = fixture();
        let d = BhcEngine::default().build(&store, &prior, None).unwrap();
        for (index, node) in d.nodes().iter().enumerate() {
            let counts = d.node_counts(&store, index).unwrap();
            assert_eq!(counts.size(), node.size);
            let direct = log_likelihood(&counts, &prior);
            assert!((direct - node.log_likelihood).abs() < 1e-9);
            if let Some((left, right)) = node.children() {
                assert!(d.node(left).key < d.node(right).key);
                assert_eq!(node.key, d.node(left).key);
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let (store, prior) = fixture();
        let engine = BhcEngine::default();
        let first = engine.build(&store, &prior, None).unwrap();
        let second = engine.build(&store, &prior, None).unwrap();
        assert_eq!(first.linkage(), second.linkage());
    }

    #[test]
    fn test_neighbor_mode_completes() {
        let (store, prior) = fixture();
        let engine = BhcEngine::new(BhcConfig {
            neighbors: 2,
            exhaustive_limit: 3,
            ..BhcConfig::default()
        });
        let d = engine.build(&store, &prior, None).unwrap();
        assert_eq!(d.n_internal(), 7);
        assert_eq!(d.members(d.root()).len(), 8);
    }

    #[test]
    fn test_seeded_build() {
        let (store, prior) = fixture();
        let seed = Partition::from_labels(&[1, 1, 2, 1, 2, 2, 1, 2]).unwrap();
        let d = BhcEngine::default().build(&store, &prior, Some(&seed)).unwrap();
        assert_eq!(d.n_leaves(), 2);
        assert_eq!(d.n_internal(), 1);
        assert_eq!(d.members(d.root()).len(), 8);

        let short = Partition::from_labels(&[1, 2]).unwrap();
        assert!(matches!(
            BhcEngine::default().build(&store, &prior, Some(&short)),
            Err(BapsError::MismatchedDimensions { .. })
        ));
        let single = Partition::single(8).unwrap();
        assert!(matches!(
            BhcEngine::default().build(&store, &prior, Some(&single)),
            Err(BapsError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let (store, prior) = fixture();
        let one = store.subset(&[0]).unwrap();
        assert!(matches!(
            BhcEngine::default().build(&one, &prior, None),
            Err(BapsError::EmptyInput { .. })
        ));
        let other = store.resample_sites(&[0, 1]).unwrap();
        assert!(matches!(
            BhcEngine::default().build(&other, &prior, None),
            Err(BapsError::MismatchedDimensions { .. })
        ));
        let engine = BhcEngine::new(BhcConfig {
            mixture_concentration: Some(0.0),
            ..BhcConfig::default()
        });
        assert!(matches!(
            engine.build(&store, &prior, None),
            Err(BapsError::Config { .. })
        ));
    }
}
