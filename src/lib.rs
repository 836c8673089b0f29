// lib.rs - popbhc library root

//! # popbhc - Bayesian hierarchical clustering of aligned sequences
//!
//! This library infers nested population structure from a multiple sequence
//! alignment. Sequences are grouped by agglomerative Bayesian hierarchical
//! clustering (BHC) under a Dirichlet-multinomial model of per-site allele
//! counts, and the resulting dendrogram is cut wherever the posterior merge
//! probability favours a single population.
//!
//! ## Features
//!
//! - **Sparse counts**: only non-consensus and missing calls are stored
//! - **Prior policies**: symmetric, optimised symmetric, BAPS and BHC-style priors
//! - **Multi-resolution**: nested partitions by recursive re-clustering
//! - **Bootstrap**: co-assignment frequencies over site-resampled replicates
//! - **Parallel**: candidate scoring, branches and replicates run on rayon
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use popbhc::prelude::*;
//!
//! let alignment = Alignment::from_fasta(std::path::Path::new("alignment.fasta"))?;
//! let store = SparseCountStore::from_alignment(&alignment)?;
//! let prior = PriorOptimizer::default().optimize(&store, PriorType::OptimiseSymmetric)?;
//!
//! let dendrogram = BhcEngine::default().build(&store, &prior, None)?;
//! let partition = PartitionSelector::default().partition(&dendrogram)?;
//! println!("{} clusters", partition.n_clusters());
//! # Ok::<(), popbhc::BapsError>(())
//! ```

// Re-export all main modules
pub mod cli;
pub mod core;
pub mod data;
pub mod error;
pub mod output;

// Convenience prelude for common imports
pub mod prelude {
    pub use crate::cli::{validate_args, Args, ValidationResult};
    pub use crate::core::{BhcConfig, BhcEngine, Dendrogram, PartitionSelector};
    pub use crate::core::{BootstrapEstimator, BootstrapMatrix};
    pub use crate::core::{MultiResolution, MultiResolutionPartitioner};
    pub use crate::core::{Prior, PriorOptimizer, PriorType};
    pub use crate::data::{Alignment, ExternalTree, Partition, SparseCountStore};
    pub use crate::error::BapsError;
    pub use crate::output::{write_bootstrap, write_multires, write_partition};
}

// Re-export main types at the root level for convenience
pub use crate::core::{BhcEngine, Dendrogram, PartitionSelector, PriorOptimizer, PriorType};
pub use crate::data::{Alignment, Partition, SparseCountStore};
pub use crate::error::{BapsError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_info() -> String {
    format!(
        "popbhc v{} - Bayesian hierarchical clustering for population structure",
        VERSION
    )
}
