// bootstrap.rs - Co-assignment frequencies over site-resampled replicates

use crate::core::engine::BhcEngine;
use crate::core::prior::Prior;
use crate::core::progress_bar;
use crate::core::selector::PartitionSelector;
use crate::data::{Partition, SparseCountStore};
use crate::error::{BapsError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// N x N co-assignment counts over successful replicates
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMatrix {
    n: usize,
    replicates: usize,
    failed: usize,
    counts: Vec<u32>,
}

impl BootstrapMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            replicates: 0,
            failed: 0,
            counts: vec![0; n * n],
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of replicates that produced a partition
    pub fn replicates(&self) -> usize {
        self.replicates
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn get(&self, i: usize, j: usize) -> u32 {
        self.counts[i * self.n + j]
    }

    /// Co-assignment frequency in [0, 1]
    pub fn frequency(&self, i: usize, j: usize) -> f64 {
        if self.replicates == 0 {
            0.0
        } else {
            self.get(i, j) as f64 / self.replicates as f64
        }
    }

    pub fn normalized(&self) -> Vec<Vec<f64>> {
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self.frequency(i, j)).collect())
            .collect()
    }

    pub fn is_symmetric(&self) -> bool {
        (0..self.n).all(|i| (i + 1..self.n).all(|j| self.get(i, j) == self.get(j, i)))
    }

    pub fn add_partition(&mut self, partition: &Partition) {
        for members in partition.clusters() {
            for &i in &members {
                let row = i * self.n;
                for &j in &members {
                    self.counts[row + j] += 1;
                }
            }
        }
        self.replicates += 1;
    }

    fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Sum of two accumulators over disjoint replicate sets
    pub fn merge(mut self, other: BootstrapMatrix) -> Self {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.replicates += other.replicates;
        self.failed += other.failed;
        self
    }
}

/// Replicate `r` draws its sites from a stream derived from the base seed
fn replicate_seed(seed: u64, replicate: usize) -> u64 {
    let mut z = seed ^ (replicate as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
pub struct BootstrapEstimator {
    engine: BhcEngine,
    selector: PartitionSelector,
    seed: u64,
    show_progress: bool,
}

impl BootstrapEstimator {
    pub fn new(engine: BhcEngine, selector: PartitionSelector, seed: u64) -> Self {
        Self {
            engine,
            selector,
            seed,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Partition of one replicate
    pub fn replicate(
        &self,
        store: &SparseCountStore,
        prior: &Prior,
        replicate: usize,
    ) -> Result<Partition> {
        let n_sites = store.n_sites();
        let mut rng = StdRng::seed_from_u64(replicate_seed(self.seed, replicate));
        let sites: Vec<usize> = (0..n_sites).map(|_| rng.gen_range(0..n_sites)).collect();
        let resampled = store.resample_sites(&sites)?;
        let resampled_prior = prior.resample(&sites)?;
        let dendrogram = self.engine.build_auto(&resampled, &resampled_prior)?;
        self.selector.partition(&dendrogram)
    }

    pub fn bootstrap(
        &self,
        store: &SparseCountStore,
        prior: &Prior,
        replicates: usize,
    ) -> Result<BootstrapMatrix> {
        let n = store.n_sequences();
        if n < 2 {
            return Err(BapsError::empty_input("need at least two sequences to bootstrap"));
        }
        if replicates == 0 {
            return Err(BapsError::empty_input("at least one replicate is required"));
        }
        prior.check_store(store)?;

        log::info!(
            "Bootstrap: {} replicates over {} sites (seed {})",
            replicates,
            store.n_sites(),
            self.seed
        );
        let pb = self.show_progress.then(|| progress_bar(replicates as u64));

        let matrix = (0..replicates)
            .into_par_iter()
            .fold(
                || BootstrapMatrix::new(n),
                |mut acc, r| {
                    match self.replicate(store, prior, r) {
                        Ok(partition) => acc.add_partition(&partition),
                        Err(e) => {
                            log::warn!("Bootstrap replicate {} failed: {}", r, e);
                            acc.record_failure();
                        }
                    }
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                    acc
                },
            )
            .reduce(|| BootstrapMatrix::new(n), BootstrapMatrix::merge);

        if let Some(pb) = pb {
            pb.finish_with_message("✅ Bootstrap completed!");
        }
        if matrix.failed > 0 {
            log::warn!(
                "{} of {} bootstrap replicates failed and were skipped",
                matrix.failed,
                replicates
            );
        }
        Ok(matrix)
    }
}
