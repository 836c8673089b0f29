// multires.rs - Nested multi-level partitions by recursive re-clustering

use crate::core::engine::BhcEngine;
use crate::core::prior::{PriorOptimizer, PriorType};
use crate::core::selector::PartitionSelector;
use crate::data::{Partition, SparseCountStore};
use crate::error::{BapsError, Result};
use rayon::prelude::*;

/// Partition at one level of the hierarchy
#[derive(Debug, Clone)]
pub struct LevelPartition {
    pub name: String,
    pub partition: Partition,
}

/// A cluster that could not be re-clustered and was carried forward unchanged
#[derive(Debug, Clone)]
pub struct BranchFailure {
    pub level: usize,
    pub size: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MultiResolution {
    pub levels: Vec<LevelPartition>,
    pub failures: Vec<BranchFailure>,
}

impl MultiResolution {
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

/// One cluster awaiting re-clustering at the next level
#[derive(Debug, Clone)]
struct Branch {
    members: Vec<usize>,
    frozen: bool,
}

/// Outcome of re-clustering one branch
enum Split {
    Children(Vec<Vec<usize>>),
    Resisted,
}

#[derive(Debug, Clone)]
pub struct MultiResolutionPartitioner {
    engine: BhcEngine,
    selector: PartitionSelector,
    optimizer: PriorOptimizer,
    prior_type: PriorType,
    /// Clusters smaller than this are never split further
    min_split_size: usize,
}

impl MultiResolutionPartitioner {
    pub fn new(
        engine: BhcEngine,
        selector: PartitionSelector,
        optimizer: PriorOptimizer,
        prior_type: PriorType,
        min_split_size: usize,
    ) -> Self {
        Self {
            engine,
            selector,
            optimizer,
            prior_type,
            min_split_size: min_split_size.max(2),
        }
    }

    /// Levels 1..=levels, each refining the one above
    pub fn run(&self, store: &SparseCountStore, levels: usize) -> Result<MultiResolution> {
        if levels == 0 {
            return Err(BapsError::empty_input("at least one level is required"));
        }
        let prior = self.optimizer.optimize(store, self.prior_type)?;
        let dendrogram = self.engine.build_auto(store, &prior)?;
        let first = self.selector.partition(&dendrogram)?;
        self.run_from(store, first, levels)
    }

    /// Continue from an already computed first level
    pub fn run_from(
        &self,
        store: &SparseCountStore,
        first: Partition,
        levels: usize,
    ) -> Result<MultiResolution> {
        if levels == 0 {
            return Err(BapsError::empty_input("at least one level is required"));
        }
        if first.len() != store.n_sequences() {
            return Err(BapsError::mismatched(format!(
                "first level covers {} sequences but the store has {}",
                first.len(),
                store.n_sequences()
            )));
        }

        let n = store.n_sequences();
        log::info!("Level 1: {} clusters", first.n_clusters());
        let mut branches: Vec<Branch> = first
            .clusters()
            .into_iter()
            .map(|members| Branch {
                members,
                frozen: false,
            })
            .collect();
        let mut result = MultiResolution {
            levels: vec![LevelPartition {
                name: "Level 1".to_string(),
                partition: first,
            }],
            failures: Vec::new(),
        };

        for level in 2..=levels {
            let outcomes: Vec<(Vec<Branch>, Option<BranchFailure>)> = branches
                .into_par_iter()
                .map(|branch| self.advance(store, branch, level))
                .collect();

            let mut next = Vec::new();
            for (children, failure) in outcomes {
                next.extend(children);
                result.failures.extend(failure);
            }
            branches = next;

            let clusters: Vec<Vec<usize>> = branches.iter().map(|b| b.members.clone()).collect();
            let partition = Partition::from_clusters(n, &clusters)?;
            log::info!("Level {}: {} clusters", level, partition.n_clusters());
            result.levels.push(LevelPartition {
                name: format!("Level {}", level),
                partition,
            });
        }

        Ok(result)
    }

    fn advance(
        &self,
        store: &SparseCountStore,
        branch: Branch,
        level: usize,
    ) -> (Vec<Branch>, Option<BranchFailure>) {
        if branch.frozen || branch.members.len() < self.min_split_size {
            return (
                vec![Branch {
                    frozen: true,
                    ..branch
                }],
                None,
            );
        }

        match self.split(store, &branch.members) {
            Ok(Split::Children(children)) => (
                children
                    .into_iter()
                    .map(|members| Branch {
                        members,
                        frozen: false,
                    })
                    .collect(),
                None,
            ),
            Ok(Split::Resisted) => (
                vec![Branch {
                    frozen: true,
                    ..branch
                }],
                None,
            ),
            Err(e) => {
                log::warn!(
                    "Level {}: cluster of {} sequences could not be split: {}",
                    level,
                    branch.members.len(),
                    e
                );
                let failure = BranchFailure {
                    level,
                    size: branch.members.len(),
                    message: e.to_string(),
                };
                (
                    vec![Branch {
                        frozen: true,
                        ..branch
                    }],
                    Some(failure),
                )
            }
        }
    }

    fn split(&self, store: &SparseCountStore, members: &[usize]) -> Result<Split> {
        let sub = store.subset(members)?;
        if sub.segregating_sites() == 0 {
            return Ok(Split::Resisted);
        }
        let prior = self.optimizer.optimize(&sub, self.prior_type)?;
        let dendrogram = self.engine.build_auto(&sub, &prior)?;
        let root = dendrogram.node(dendrogram.root());
        if root.log_odds.map_or(true, |r| self.selector.accepts(r)) {
            return Ok(Split::Resisted);
        }
        Ok(Split::Children(
            self.selector
                .clusters(&dendrogram)
                .into_iter()
                .map(|local| local.into_iter().map(|i| members[i]).collect())
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Alignment;

    fn partitioner() -> MultiResolutionPartitioner {
        MultiResolutionPartitioner::new(
            BhcEngine::default(),
            PartitionSelector::default(),
            PriorOptimizer::default(),
            PriorType::Symmetric,
            2,
        )
    }

    fn nested_store() -> SparseCountStore {
        // Two deep groups, each with two shallower subgroups
        let aln = Alignment::from_pairs(&[
            ("a1", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            ("a2", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            ("a3", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            ("a4", "AAAAAAAAAAAAAAAAAAAACCCCCCCCCCAAAAAAAAAA"),
            ("a5", "AAAAAAAAAAAAAAAAAAAACCCCCCCCCCAAAAAAAAAA"),
            ("a6", "AAAAAAAAAAAAAAAAAAAACCCCCCCCCCAAAAAAAAAA"),
            ("b1", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"),
            ("b2", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"),
            ("b3", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"),
            ("b4", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTGGGGGGGGGG"),
            ("b5", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTGGGGGGGGGG"),
            ("b6", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTGGGGGGGGGG"),
        ])
        .unwrap();
        SparseCountStore::from_alignment(&aln).unwrap()
    }

    #[test]
    fn test_levels_are_nested() {
        let store = nested_store();
        let result = partitioner().run(&store, 3).unwrap();
        assert_eq!(result.n_levels(), 3);
        assert_eq!(result.levels[0].name, "Level 1");
        assert_eq!(result.levels[2].name, "Level 3");
        for pair in result.levels.windows(2) {
            assert!(pair[1].partition.is_refinement_of(&pair[0].partition));
            assert!(pair[1].partition.n_clusters() >= pair[0].partition.n_clusters());
        }
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_zero_levels_is_rejected() {
        let store = nested_store();
        assert!(matches!(
            partitioner().run(&store, 0),
            Err(BapsError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_small_clusters_are_frozen() {
        let store = nested_store();
        let first = Partition::from_labels(&[1, 1, 1, 1, 1, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let p = MultiResolutionPartitioner::new(
            BhcEngine::default(),
            PartitionSelector::default(),
            PriorOptimizer::default(),
            PriorType::Symmetric,
            10,
        );
        let result = p.run_from(&store, first.clone(), 2).unwrap();
        assert_eq!(result.levels[1].partition, first);
    }

    #[test]
    fn test_identical_branch_is_not_a_failure() {
        let store = nested_store();
        let first = Partition::from_labels(&[1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]).unwrap();
        let result = partitioner().run_from(&store, first.clone(), 2).unwrap();
        assert_eq!(result.levels[1].partition, first);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_branch_is_clustered_as_its_own_alignment() {
        let outside = "A".repeat(40);
        let other = "T".repeat(40);
        let rows = vec![
            ("p1".to_string(), format!("AAAAA{}", outside)),
            ("p2".to_string(), format!("AAAAA{}", outside)),
            ("q1".to_string(), format!("CCCCC{}", outside)),
            ("q2".to_string(), format!("CCCCC{}", outside)),
            ("o1".to_string(), format!("AAAAA{}", other)),
            ("o2".to_string(), format!("AAAAA{}", other)),
        ];
        let store = SparseCountStore::from_alignment(&Alignment::from_pairs(&rows).unwrap()).unwrap();
        let branch = store.subset(&[0, 1, 2, 3]).unwrap();
        let fresh =
            SparseCountStore::from_alignment(&Alignment::from_pairs(&rows[..4]).unwrap()).unwrap();
        assert_eq!(branch.segregating_sites(), 5);

        let root_log_odds = |s: &SparseCountStore| {
            let prior = PriorOptimizer::default().optimize(s, PriorType::Symmetric).unwrap();
            let dendrogram = BhcEngine::default().build(s, &prior, None).unwrap();
            dendrogram.node(dendrogram.root()).log_odds.unwrap()
        };
        let (from_branch, from_fresh) = (root_log_odds(&branch), root_log_odds(&fresh));
        assert!((from_branch - from_fresh).abs() < 1e-9);
        assert!(from_branch < 0.0);

        let first = Partition::from_labels(&[1, 1, 1, 1, 2, 2]).unwrap();
        let result = partitioner().run_from(&store, first, 2).unwrap();
        let level2 = &result.levels[1].partition;
        assert_eq!(level2.n_clusters(), 3);
        assert!(level2.co_clustered(0, 1));
        assert!(level2.co_clustered(2, 3));
        assert!(!level2.co_clustered(0, 2));
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_failed_branch_is_frozen_and_reported() {
        let store = nested_store();
        // a1..a6 vary inside their group; b1..b3 are identical
        let first = Partition::from_labels(&[1, 1, 1, 1, 1, 1, 2, 2, 2, 3, 3, 3]).unwrap();
        let p = MultiResolutionPartitioner::new(
            BhcEngine::default(),
            PartitionSelector::default(),
            PriorOptimizer {
                max_iterations: 1,
                ..PriorOptimizer::default()
            },
            PriorType::OptimiseSymmetric,
            2,
        );
        let result = p.run_from(&store, first.clone(), 3).unwrap();
        assert_eq!(result.n_levels(), 3);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].level, 2);
        assert_eq!(result.failures[0].size, 6);
        assert_eq!(result.levels[1].partition, first);
        assert_eq!(result.levels[2].partition, first);
        for pair in result.levels.windows(2) {
            assert!(pair[1].partition.is_refinement_of(&pair[0].partition));
        }
    }
}
