// mod.rs - Core clustering module

pub mod bootstrap;
pub mod dendrogram;
pub mod engine;
pub mod likelihood;
pub mod multires;
pub mod prior;
pub mod seeding;
pub mod selector;

// Re-export main types for convenience
pub use bootstrap::{BootstrapEstimator, BootstrapMatrix};
pub use dendrogram::{ClusterNode, Dendrogram, LinkageRow, NodeKind};
pub use engine::{BhcConfig, BhcEngine, MIN_SEEDED_SEQUENCES};
pub use likelihood::{log_likelihood, ClusterState, MergeLikelihood, MergeScore};
pub use multires::{BranchFailure, LevelPartition, MultiResolution, MultiResolutionPartitioner};
pub use prior::{Prior, PriorOptimizer, PriorType};
pub use seeding::LeaderSeeder;
pub use selector::PartitionSelector;

use indicatif::{ProgressBar, ProgressStyle};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA: {eta}";

/// Progress bar for merge loops and replicate batches
pub(crate) fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
