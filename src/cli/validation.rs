// validation.rs - Input validation utilities

use crate::cli::args::Args;
use crate::core::{PartitionSelector, PriorType};
use crate::output::delimiter_for;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

pub struct ValidationResult {
    pub prior_type: PriorType,
    pub selector: PartitionSelector,
    pub sample_include_regex: Option<Regex>,
    pub sample_exclude_regex: Option<Regex>,
    pub samples_include_set: Option<HashSet<String>>,
    pub samples_exclude_set: Option<HashSet<String>>,
}

/// Validate all command line arguments
pub fn validate_args(args: &Args) -> Result<ValidationResult, String> {
    let alignment = args
        .alignment
        .as_ref()
        .ok_or("--alignment is required (or set 'alignment' in the config file)")?;
    if !Path::new(alignment).exists() {
        return Err(format!("Alignment file '{}' does not exist", alignment));
    }
    if args.output.is_none() && !args.dry_run {
        return Err("--output is required".to_string());
    }

    let prior_type = PriorType::from_str(&args.prior).map_err(|e| e.to_string())?;
    let selector = PartitionSelector::new(args.threshold).map_err(|e| e.to_string())?;
    delimiter_for(&args.format).map_err(|e| e.to_string())?;

    if args.levels == 0 {
        return Err("--levels must be at least 1".to_string());
    }
    if args.min_split_size < 2 {
        return Err("--min-split-size must be at least 2".to_string());
    }
    if args.neighbors == 0 {
        return Err("--neighbors must be at least 1".to_string());
    }
    if let Some(k) = args.k_init {
        if k < 2 {
            return Err("--k-init must be at least 2".to_string());
        }
    }
    if let Some(alpha) = args.mixture_concentration {
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err("--mixture-concentration must be positive".to_string());
        }
    }
    if args.bootstrap > 0 && args.bootstrap_output.is_none() {
        return Err("--bootstrap requires --bootstrap-output".to_string());
    }
    if args.seed_partition.is_some() && args.tree.is_some() {
        return Err("--seed-partition cannot be combined with --tree".to_string());
    }
    for (flag, path) in [
        ("--tree", &args.tree),
        ("--seed-partition", &args.seed_partition),
    ] {
        if let Some(path) = path {
            if !Path::new(path).exists() {
                return Err(format!("{} file '{}' does not exist", flag, path));
            }
        }
    }

    // Compile regex patterns
    let sample_include_regex = if let Some(pattern) = &args.include_samples {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid include_samples regex: {}", e))?)
    } else {
        None
    };

    let sample_exclude_regex = if let Some(pattern) = &args.exclude_samples {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid exclude_samples regex: {}", e))?)
    } else {
        None
    };

    // Load filter sets from files
    let samples_include_set = if let Some(file_path) = &args.include_samples_list {
        Some(load_set_from_file(file_path)?)
    } else {
        None
    };

    let samples_exclude_set = if let Some(file_path) = &args.exclude_samples_list {
        Some(load_set_from_file(file_path)?)
    } else {
        None
    };

    Ok(ValidationResult {
        prior_type,
        selector,
        sample_include_regex,
        sample_exclude_regex,
        samples_include_set,
        samples_exclude_set,
    })
}

/// Load a set of strings from a file (one per line)
fn load_set_from_file(file_path: &str) -> Result<HashSet<String>, String> {
    let file = File::open(file_path)
        .map_err(|e| format!("Failed to open filter file '{}': {}", file_path, e))?;

    let reader = BufReader::new(file);
    let mut set = HashSet::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            format!("Failed to read line {} from '{}': {}", line_num + 1, file_path, e)
        })?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            set.insert(trimmed.to_string());
        }
    }

    println!("📋 Loaded {} items from filter file '{}'", set.len(), file_path);
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn args_with(alignment: &str, extra: &[&str]) -> Args {
        let mut all = vec!["--alignment", alignment, "--output", "out.tsv"];
        all.extend_from_slice(extra);
        Args::from_args(&["popbhc"], &all).unwrap()
    }

    fn alignment_file() -> String {
        let path = std::env::temp_dir().join(format!("popbhc_validate_{}.fasta", std::process::id()));
        std::fs::write(&path, ">a\nACGT\n>b\nACGA\n").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_valid_arguments() {
        let aln = alignment_file();
        let result = validate_args(&args_with(&aln, &["--prior", "hc"])).unwrap();
        assert_eq!(result.prior_type, PriorType::Hc);
        assert_eq!(result.selector.threshold(), 0.5);
    }

    #[test]
    fn test_invalid_arguments() {
        let aln = alignment_file();
        assert!(validate_args(&args_with(&aln, &["--prior", "flat"])).is_err());
        assert!(validate_args(&args_with(&aln, &["--threshold", "1.5"])).is_err());
        assert!(validate_args(&args_with(&aln, &["--levels", "0"])).is_err());
        assert!(validate_args(&args_with(&aln, &["--format", "nexus"])).is_err());
        assert!(validate_args(&args_with(&aln, &["--bootstrap", "10"])).is_err());
        assert!(validate_args(&args_with("/nonexistent/aln.fasta", &[])).is_err());
    }
}
