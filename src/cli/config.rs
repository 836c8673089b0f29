// config.rs - Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    // Input/Output
    pub alignment: Option<String>,
    pub output: Option<String>,
    pub format: Option<String>,
    pub dendrogram: Option<String>,
    pub linkage: Option<String>,

    // Model
    pub prior: Option<String>,
    pub levels: Option<usize>,
    pub threshold: Option<f64>,
    pub min_split_size: Option<usize>,
    pub mixture_concentration: Option<f64>,
    pub tree: Option<String>,

    // Seeding and candidates
    pub seed_partition: Option<String>,
    pub k_init: Option<usize>,
    pub no_seed: Option<bool>,
    pub neighbors: Option<usize>,
    pub exhaustive_limit: Option<usize>,

    // Bootstrap
    pub bootstrap: Option<usize>,
    pub bootstrap_output: Option<String>,
    pub random_seed: Option<u64>,

    // Performance
    pub threads: Option<usize>,
    pub cache_file: Option<String>,
    pub cache_note: Option<String>,

    // Sample filtering
    pub include_samples: Option<String>,
    pub exclude_samples: Option<String>,
    pub include_samples_list: Option<String>,
    pub exclude_samples_list: Option<String>,

    // Flags
    pub force_recompute: Option<bool>,
    pub dry_run: Option<bool>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        println!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        println!("📄 Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Generate a sample configuration file with comments
    pub fn generate_sample() -> String {
        r#"# popbhc.toml - Configuration file for popbhc
# Command line arguments will override these settings

# =============================================================================
# INPUT/OUTPUT
# =============================================================================

# Aligned FASTA file
alignment = "/path/to/alignment.fasta"

# Output partition file
output = "clusters.tsv"

# Output format: tsv, csv
format = "tsv"

# Newick dendrogram and merge table (optional)
# dendrogram = "dendrogram.nwk"
# linkage = "linkage.tsv"

# =============================================================================
# MODEL
# =============================================================================

# Prior policy: symmetric, optimise.symmetric, baps, hc
prior = "optimise.symmetric"

# Number of nested partition levels
levels = 2

# Merge probability threshold for keeping a subtree whole
threshold = 0.5

# Clusters smaller than this are not split further
min_split_size = 2

# Dirichlet-process concentration (omit for 1/N)
# mixture_concentration = 0.01

# Condition the first level on a fixed Newick tree
# tree = "tree.nwk"

# =============================================================================
# SEEDING AND CANDIDATES
# =============================================================================

# Seed partition file (name, cluster)
# seed_partition = "seed.tsv"

# Leader seed clusters for large inputs (omit for ceil(N/4))
# k_init = 250

# Disable automatic leader seeding
no_seed = false

# Candidate partners kept per cluster on large frontiers
neighbors = 16

# Frontier size at or below which every pair is scored
exhaustive_limit = 512

# =============================================================================
# BOOTSTRAP
# =============================================================================

# Number of replicates (0 disables)
bootstrap = 0

# Co-assignment matrix output
# bootstrap_output = "bootstrap.tsv"

# Random seed for site resampling
random_seed = 42

# =============================================================================
# PERFORMANCE
# =============================================================================

# Number of threads (omit for auto-detection)
threads = 8

# Dendrogram cache file (.lz4 extension)
# cache_file = "dendrogram.lz4"

# User note to save with the cache for future reference
# cache_note = "My analysis run"

# =============================================================================
# SAMPLE FILTERING
# =============================================================================

# Include only samples matching regex pattern
# include_samples = "pattern.*"

# Exclude samples matching regex pattern
# exclude_samples = "control.*"

# Include only samples listed in a file (one sample per line)
# include_samples_list = "samples.txt"

# Exclude samples listed in a file (one sample per line)
# exclude_samples_list = "exclude.txt"

# =============================================================================
# FLAGS
# =============================================================================

# Rebuild the dendrogram even if a cache file exists
force_recompute = false

# Validate inputs without computation (dry run)
dry_run = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert_eq!(config.prior.as_deref(), Some("optimise.symmetric"));
        assert_eq!(config.levels, Some(2));
        assert_eq!(config.neighbors, Some(16));
        assert_eq!(config.tree, None);
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!("popbhc_config_{}.toml", std::process::id()));
        let mut config = Config::new();
        config.levels = Some(3);
        config.prior = Some("baps".to_string());
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.levels, Some(3));
        assert_eq!(loaded.prior.as_deref(), Some("baps"));
        std::fs::remove_file(&path).ok();
    }
}
