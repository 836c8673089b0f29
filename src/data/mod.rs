// mod.rs - Data structures module

pub mod alignment;
pub mod partition;
pub mod store;
pub mod tree;

// Re-export main types for convenience
pub use alignment::{nucleotide_code, Alignment, NUCLEOTIDES};
pub use partition::Partition;
pub use store::{ClusterCounts, SiteCall, SparseCount, SparseCountStore, MISSING};
pub use tree::{ExternalTree, TreeNode};
