// seeding.rs - Greedy leader clustering used to seed large agglomerations

use crate::data::{Partition, SparseCountStore};
use crate::error::{BapsError, Result};
use rayon::prelude::*;

/// Farthest-point leader selection on sparse Hamming distance.
///
/// Leaders are picked one at a time as the sequence farthest from every
/// existing leader (ties to the lowest index), starting from sequence 0. Each
/// sequence then joins its nearest leader, ties going to the earlier leader.
#[derive(Debug, Clone)]
pub struct LeaderSeeder {
    pub k_init: usize,
}

impl LeaderSeeder {
    pub fn new(k_init: usize) -> Self {
        Self { k_init }
    }

    pub fn seed(&self, store: &SparseCountStore) -> Result<Partition> {
        let n = store.n_sequences();
        if n == 0 {
            return Err(BapsError::empty_input("cannot seed an empty store"));
        }
        if self.k_init == 0 {
            return Err(BapsError::config("k_init must be at least 1"));
        }

        let mut leaders = vec![0usize];
        let mut nearest = vec![0usize; n];
        let mut distance: Vec<usize> = (0..n).into_par_iter().map(|i| store.hamming(i, 0)).collect();

        while leaders.len() < self.k_init.min(n) {
            // Largest distance, lowest index on ties
            let (next, &farthest) = distance
                .iter()
                .enumerate()
                .fold((0, &0usize), |best, (i, d)| if *d > *best.1 { (i, d) } else { best });
            if farthest == 0 {
                break;
            }
            let leader_slot = leaders.len();
            leaders.push(next);
            distance
                .par_iter_mut()
                .zip(nearest.par_iter_mut())
                .enumerate()
                .for_each(|(i, (dist, near))| {
                    let d = store.hamming(i, next);
                    if d < *dist {
                        *dist = d;
                        *near = leader_slot;
                    }
                });
        }

        log::debug!("Leader seeding: {} leaders over {} sequences", leaders.len(), n);
        Partition::from_labels(&nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Alignment;

    #[test]
    fn test_leaders_split_divergent_groups() {
        let aln = Alignment::from_pairs(&[
            ("a1", "AAAAAAAA"),
            ("b1", "TTTTTTTT"),
            ("a2", "AAAAAAAC"),
            ("b2", "TTTTTTTG"),
            ("a3", "AAAAAACA"),
        ])
        .unwrap();
        let store = SparseCountStore::from_alignment(&aln).unwrap();
        let seed = LeaderSeeder::new(2).seed(&store).unwrap();
        assert_eq!(seed.n_clusters(), 2);
        assert_eq!(seed.labels(), &[1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_identical_sequences_give_one_seed() {
        let aln = Alignment::from_pairs(&[("a", "ACGT"), ("b", "ACGT"), ("c", "ACGT")]).unwrap();
        let store = SparseCountStore::from_alignment(&aln).unwrap();
        let seed = LeaderSeeder::new(3).seed(&store).unwrap();
        assert_eq!(seed.n_clusters(), 1);
        assert!(LeaderSeeder::new(0).seed(&store).is_err());
    }
}
