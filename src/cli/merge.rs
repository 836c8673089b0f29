// merge.rs - Merge configuration file with CLI arguments

use crate::cli::{Args, Config};

impl Args {
    /// Merge with configuration from file
    /// CLI arguments take precedence over config file values
    pub fn merge_with_config(mut self, config: Config) -> Self {
        // Input/Output
        if self.alignment.is_none() {
            self.alignment = config.alignment;
        }
        if self.output.is_none() {
            self.output = config.output;
        }
        if self.dendrogram.is_none() {
            self.dendrogram = config.dendrogram;
        }
        if self.linkage.is_none() {
            self.linkage = config.linkage;
        }
        if self.format == "tsv" {
            if let Some(format) = config.format {
                self.format = format;
            }
        }

        // Model (only override defaults, not explicit CLI values)
        if self.prior == "optimise.symmetric" {
            if let Some(prior) = config.prior {
                self.prior = prior;
            }
        }
        if self.levels == 1 {
            if let Some(levels) = config.levels {
                self.levels = levels;
            }
        }
        if self.threshold == 0.5 {
            if let Some(threshold) = config.threshold {
                self.threshold = threshold;
            }
        }
        if self.min_split_size == 2 {
            if let Some(size) = config.min_split_size {
                self.min_split_size = size;
            }
        }
        if self.mixture_concentration.is_none() {
            self.mixture_concentration = config.mixture_concentration;
        }
        if self.tree.is_none() {
            self.tree = config.tree;
        }

        // Seeding and candidates
        if self.seed_partition.is_none() {
            self.seed_partition = config.seed_partition;
        }
        if self.k_init.is_none() {
            self.k_init = config.k_init;
        }
        if self.neighbors == 16 {
            if let Some(neighbors) = config.neighbors {
                self.neighbors = neighbors;
            }
        }
        if self.exhaustive_limit == 512 {
            if let Some(limit) = config.exhaustive_limit {
                self.exhaustive_limit = limit;
            }
        }

        // Bootstrap
        if self.bootstrap == 0 {
            if let Some(replicates) = config.bootstrap {
                self.bootstrap = replicates;
            }
        }
        if self.bootstrap_output.is_none() {
            self.bootstrap_output = config.bootstrap_output;
        }
        if self.random_seed == 42 {
            if let Some(seed) = config.random_seed {
                self.random_seed = seed;
            }
        }

        // Performance
        if self.threads.is_none() {
            self.threads = config.threads;
        }
        if self.cache_file.is_none() {
            self.cache_file = config.cache_file;
        }
        if self.cache_note.is_none() {
            self.cache_note = config.cache_note;
        }

        // Sample filtering
        if self.include_samples.is_none() {
            self.include_samples = config.include_samples;
        }
        if self.exclude_samples.is_none() {
            self.exclude_samples = config.exclude_samples;
        }
        if self.include_samples_list.is_none() {
            self.include_samples_list = config.include_samples_list;
        }
        if self.exclude_samples_list.is_none() {
            self.exclude_samples_list = config.exclude_samples_list;
        }

        // Flags (CLI flags take precedence, config only sets if not explicitly set)
        if !self.no_seed && config.no_seed.unwrap_or(false) {
            self.no_seed = true;
        }
        if !self.force_recompute && config.force_recompute.unwrap_or(false) {
            self.force_recompute = true;
        }
        if !self.dry_run && config.dry_run.unwrap_or(false) {
            self.dry_run = true;
        }

        self
    }

    /// Load configuration and merge with CLI args
    pub fn with_config_file(self, config_path: &str) -> Result<Self, String> {
        let config = Config::from_file(config_path)?;
        Ok(self.merge_with_config(config))
    }
}
