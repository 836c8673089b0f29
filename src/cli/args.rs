// args.rs - Command line arguments definition

use argh::FromArgs;

#[derive(FromArgs)]
/// popbhc - Bayesian hierarchical clustering of aligned sequences into population structure
pub struct Args {
    /// path to aligned FASTA file
    #[argh(option)]
    pub alignment: Option<String>,

    /// output partition file (one column per level when --levels > 1)
    #[argh(option)]
    pub output: Option<String>,

    /// prior policy: symmetric, optimise.symmetric, baps, hc (default: optimise.symmetric)
    #[argh(option, default = "String::from(\"optimise.symmetric\")")]
    pub prior: String,

    /// number of nested partition levels (default: 1)
    #[argh(option, default = "1")]
    pub levels: usize,

    /// number of bootstrap replicates, 0 disables (default: 0)
    #[argh(option, default = "0")]
    pub bootstrap: usize,

    /// output file for the bootstrap co-assignment matrix
    #[argh(option)]
    pub bootstrap_output: Option<String>,

    /// rooted bifurcating Newick tree to condition the first-level partition on
    #[argh(option)]
    pub tree: Option<String>,

    /// seed partition file (name, cluster) used as starting clusters
    #[argh(option)]
    pub seed_partition: Option<String>,

    /// number of leader seed clusters for large inputs (default: ceil(N/4))
    #[argh(option)]
    pub k_init: Option<usize>,

    /// disable automatic leader seeding
    #[argh(switch)]
    pub no_seed: bool,

    /// merge probability threshold for keeping a subtree whole (default: 0.5)
    #[argh(option, default = "0.5")]
    pub threshold: f64,

    /// clusters smaller than this are not split further (default: 2)
    #[argh(option, default = "2")]
    pub min_split_size: usize,

    /// candidate partners kept per cluster on large frontiers (default: 16)
    #[argh(option, default = "16")]
    pub neighbors: usize,

    /// frontier size at or below which every pair is scored (default: 512)
    #[argh(option, default = "512")]
    pub exhaustive_limit: usize,

    /// dirichlet-process concentration (default: 1/N)
    #[argh(option)]
    pub mixture_concentration: Option<f64>,

    /// random seed for bootstrap resampling (default: 42)
    #[argh(option, default = "42")]
    pub random_seed: u64,

    /// number of threads (default: auto-detect)
    #[argh(option)]
    pub threads: Option<usize>,

    /// output format: tsv, csv (default: tsv)
    #[argh(option, default = "String::from(\"tsv\")")]
    pub format: String,

    /// write the dendrogram in Newick format
    #[argh(option)]
    pub dendrogram: Option<String>,

    /// write the merge (linkage) table
    #[argh(option)]
    pub linkage: Option<String>,

    /// dendrogram cache file path (.lz4 extension)
    #[argh(option)]
    pub cache_file: Option<String>,

    /// user note to save with the cache for future reference
    #[argh(option)]
    pub cache_note: Option<String>,

    /// rebuild the dendrogram even if a cache file exists
    #[argh(switch)]
    pub force_recompute: bool,

    /// include only samples matching regex pattern
    #[argh(option)]
    pub include_samples: Option<String>,

    /// exclude samples matching regex pattern
    #[argh(option)]
    pub exclude_samples: Option<String>,

    /// include only samples listed in a file (one sample per line)
    #[argh(option)]
    pub include_samples_list: Option<String>,

    /// exclude samples listed in a file (one sample per line)
    #[argh(option)]
    pub exclude_samples_list: Option<String>,

    /// validate inputs without computation (dry run)
    #[argh(switch)]
    pub dry_run: bool,

    /// path to TOML configuration file
    #[argh(option)]
    pub config: Option<String>,

    /// generate sample configuration file and exit
    #[argh(switch)]
    pub generate_config: bool,
}
