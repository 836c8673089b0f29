// selector.rs - Cutting a dendrogram into a flat partition

use crate::core::dendrogram::Dendrogram;
use crate::core::prior::Prior;
use crate::data::{ExternalTree, Partition, SparseCountStore};
use crate::error::{BapsError, Result};

/// Top-down cut: a node is kept whole when its merge probability r reaches
/// the threshold, otherwise the cut descends into both children.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSelector {
    threshold: f64,
    log_odds_threshold: f64,
}

impl Default for PartitionSelector {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            log_odds_threshold: 0.0,
        }
    }
}

impl PartitionSelector {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(BapsError::config(format!(
                "threshold must lie strictly between 0 and 1, got {}",
                threshold
            )));
        }
        Ok(Self {
            threshold,
            log_odds_threshold: (threshold / (1.0 - threshold)).ln(),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a node with these log-odds stays a single cluster
    pub fn accepts(&self, log_odds: f64) -> bool {
        log_odds >= self.log_odds_threshold
    }

    /// Nodes where the cut stops, ordered by smallest member
    pub fn cut_nodes(&self, dendrogram: &Dendrogram) -> Vec<usize> {
        let mut cut = Vec::new();
        let mut stack = vec![dendrogram.root()];
        while let Some(index) = stack.pop() {
            let node = dendrogram.node(index);
            match (node.children(), node.log_odds) {
                (Some((left, right)), Some(log_odds)) if !self.accepts(log_odds) => {
                    stack.push(right);
                    stack.push(left);
                }
                _ => cut.push(index),
            }
        }
        cut.sort_by_key(|&index| dendrogram.node(index).key);
        cut
    }

    /// Member lists of the cut clusters
    pub fn clusters(&self, dendrogram: &Dendrogram) -> Vec<Vec<usize>> {
        self.cut_nodes(dendrogram)
            .into_iter()
            .map(|index| dendrogram.members(index))
            .collect()
    }

    pub fn partition(&self, dendrogram: &Dendrogram) -> Result<Partition> {
        let partition = Partition::from_clusters(dendrogram.n_sequences(), &self.clusters(dendrogram))?;
        log::debug!(
            "Cut at r >= {}: {} clusters",
            self.threshold,
            partition.n_clusters()
        );
        Ok(partition)
    }

    /// Partition conditioned on an externally supplied tree
    pub fn partition_tree(
        &self,
        store: &SparseCountStore,
        prior: &Prior,
        tree: &ExternalTree,
        mixture_concentration: Option<f64>,
    ) -> Result<Partition> {
        let dendrogram = Dendrogram::from_tree(store, prior, tree, mixture_concentration)?;
        self.partition(&dendrogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::BhcEngine;
    use crate::core::prior::{PriorOptimizer, PriorType};
    use crate::data::Alignment;

    fn fixture() -> (SparseCountStore, Prior) {
        let aln = Alignment::from_pairs(&[
            ("a1", "AAAAAAAAAA"),
            ("b1", "TTTTTTTTTT"),
            ("a2", "AAAAAAAAAC"),
            ("b2", "TTTTTTTTTG"),
            ("a3", "AAAAAAAACA"),
            ("b3", "TTTTTTTTGT"),
        ])
        .unwrap();
        let store = SparseCountStore::from_alignment(&aln).unwrap();
        let prior = PriorOptimizer::default()
            .optimize(&store, PriorType::Symmetric)
            .unwrap();
        (store, prior)
    }

    #[test]
    fn test_threshold_validation() {
        assert!(PartitionSelector::new(0.0).is_err());
        assert!(PartitionSelector::new(1.0).is_err());
        let s = PartitionSelector::new(0.5).unwrap();
        assert!(s.accepts(0.0));
        assert!(!s.accepts(-1e-9));
    }

    #[test]
    fn test_two_groups_are_recovered() {
        let (store, prior) = fixture();
        let d = BhcEngine::default().build(&store, &prior, None).unwrap();
        let p = PartitionSelector::default().partition(&d).unwrap();
        assert_eq!(p.labels(), &[1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_cut_is_idempotent_on_subtrees() {
        let (store, prior) = fixture();
        let d = BhcEngine::default().build(&store, &prior, None).unwrap();
        let selector = PartitionSelector::default();
        for node in selector.cut_nodes(&d) {
            let sub = d.subtree(node);
            assert_eq!(selector.cut_nodes(&sub), vec![sub.root()]);
        }
    }

    #[test]
    fn test_higher_threshold_refines() {
        let (store, prior) = fixture();
        let d = BhcEngine::default().build(&store, &prior, None).unwrap();
        let coarse = PartitionSelector::new(0.5).unwrap().partition(&d).unwrap();
        let fine = PartitionSelector::new(0.999999).unwrap().partition(&d).unwrap();
        assert!(fine.is_refinement_of(&coarse));
        assert!(fine.n_clusters() >= coarse.n_clusters());
    }

    #[test]
    fn test_partition_tree() {
        let (store, prior) = fixture();
        let mut t = ExternalTree::new();
        let leaves: Vec<usize> = ["a1", "a2", "a3", "b1", "b2", "b3"]
            .iter()
            .map(|name| t.add_leaf(name))
            .collect();
        let a12 = t.add_internal(vec![leaves[0], leaves[1]]);
        let a = t.add_internal(vec![a12, leaves[2]]);
        let b12 = t.add_internal(vec![leaves[3], leaves[4]]);
        let b = t.add_internal(vec![b12, leaves[5]]);
        let root = t.add_internal(vec![a, b]);
        t.set_root(root);

        let p = PartitionSelector::default()
            .partition_tree(&store, &prior, &t, None)
            .unwrap();
        assert_eq!(p.labels(), &[1, 2, 1, 2, 1, 2]);

        let mut bad = ExternalTree::new();
        let x = bad.add_leaf("a1");
        let y = bad.add_leaf("zz");
        let r = bad.add_internal(vec![x, y]);
        bad.set_root(r);
        assert!(matches!(
            PartitionSelector::default().partition_tree(&store, &prior, &bad, None),
            Err(BapsError::InvalidTree { .. })
        ));
    }
}
