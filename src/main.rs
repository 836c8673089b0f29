// main.rs - CLI entry point

use std::path::Path;
use std::time::Instant;

use popbhc::cli::Config;
use popbhc::output::{load_dendrogram_cache, save_dendrogram_cache, write_linkage, write_newick};
use popbhc::prelude::*;

fn main() {
    if let Err(e) = run_main() {
        eprintln!("❌ ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), String> {
    let mut args: Args = argh::from_env();
    let command_line = std::env::args().collect::<Vec<String>>().join(" ");

    // Handle generate config first
    if args.generate_config {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        println!("\n💡 Save this content to a .toml file and use --config /path/to/config.toml");
        return Ok(());
    }

    // Load configuration file if specified
    if let Some(config_path) = args.config.clone() {
        args = args.with_config_file(&config_path)?;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let validation_result = validate_args(&args)?;
    let alignment_path = args
        .alignment
        .clone()
        .ok_or("--alignment is required")?;

    println!("🚀 popbhc v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "🧪 Prior: {} ({})",
        validation_result.prior_type,
        validation_result.prior_type.description()
    );
    println!("🎚️  Merge threshold: {}", validation_result.selector.threshold());

    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
        println!("🧵 Threads: {}", n);
    } else {
        println!("🧵 Threads: {} (auto-detected)", rayon::current_num_threads());
    }

    let total_start = Instant::now();

    // Load and filter the alignment
    println!("📂 Loading alignment: {}", alignment_path);
    let alignment = Alignment::from_fasta(Path::new(&alignment_path))
        .and_then(|a| {
            a.filter_samples(
                validation_result.sample_include_regex.as_ref(),
                validation_result.sample_exclude_regex.as_ref(),
                validation_result.samples_include_set.as_ref(),
                validation_result.samples_exclude_set.as_ref(),
            )
        })
        .map_err(|e| e.to_string())?;
    let store = SparseCountStore::from_alignment(&alignment).map_err(|e| e.to_string())?;
    println!(
        "📊 Alignment: {} sequences × {} columns ({} stored sites, {} segregating)",
        store.n_sequences(),
        alignment.length(),
        store.n_sites(),
        store.segregating_sites()
    );

    if args.dry_run {
        println!("✅ Dry run completed successfully");
        return Ok(());
    }
    let output = args.output.clone().ok_or("--output is required")?;

    // Prior
    let prior_start = Instant::now();
    let prior = PriorOptimizer::default()
        .optimize(&store, validation_result.prior_type)
        .map_err(|e| e.to_string())?;
    match prior.concentration() {
        Some(c) => println!(
            "🎯 Prior ready: concentration {:.5} ({:.2}s)",
            c,
            prior_start.elapsed().as_secs_f64()
        ),
        None => println!("🎯 Prior ready ({:.2}s)", prior_start.elapsed().as_secs_f64()),
    }

    let engine = BhcEngine::new(BhcConfig {
        mixture_concentration: args.mixture_concentration,
        neighbors: args.neighbors,
        exhaustive_limit: args.exhaustive_limit,
        k_init: args.k_init,
        auto_seed: !args.no_seed,
        show_progress: true,
    });

    // Dendrogram: external tree, cache, or a fresh build
    let dendrogram = if let Some(tree_path) = &args.tree {
        println!("🌳 Scoring external tree: {}", tree_path);
        let tree = ExternalTree::from_newick_file(Path::new(tree_path)).map_err(|e| e.to_string())?;
        Dendrogram::from_tree(&store, &prior, &tree, args.mixture_concentration)
            .map_err(|e| e.to_string())?
    } else {
        let cached = match &args.cache_file {
            Some(cache_path) if Path::new(cache_path).exists() && !args.force_recompute => {
                match load_dendrogram_cache(cache_path, &store) {
                    Ok(dendrogram) => Some(dendrogram),
                    Err(e) => {
                        println!("⚠️  Cache not usable ({}), rebuilding", e);
                        None
                    }
                }
            }
            _ => None,
        };

        match cached {
            Some(dendrogram) => dendrogram,
            None => {
                let build_start = Instant::now();
                let dendrogram = if let Some(seed_path) = &args.seed_partition {
                    let seed = Partition::from_file(Path::new(seed_path), store.names())
                        .map_err(|e| e.to_string())?;
                    println!("🌱 Seed partition: {} clusters from {}", seed.n_clusters(), seed_path);
                    engine.build(&store, &prior, Some(&seed))
                } else {
                    engine.build_auto(&store, &prior)
                }
                .map_err(|e| e.to_string())?;
                println!(
                    "🌳 Dendrogram built: {} merges in {:.2}s",
                    dendrogram.n_internal(),
                    build_start.elapsed().as_secs_f64()
                );

                if let Some(cache_path) = &args.cache_file {
                    save_dendrogram_cache(cache_path, &dendrogram, args.cache_note.as_deref())
                        .map_err(|e| e.to_string())?;
                }
                dendrogram
            }
        }
    };

    let partition = validation_result
        .selector
        .partition(&dendrogram)
        .map_err(|e| e.to_string())?;
    println!("🧩 Level 1: {} clusters", partition.n_clusters());

    if args.levels > 1 {
        let partitioner = MultiResolutionPartitioner::new(
            BhcEngine::new(BhcConfig {
                show_progress: false,
                ..engine.config().clone()
            }),
            validation_result.selector,
            PriorOptimizer::default(),
            validation_result.prior_type,
            args.min_split_size,
        );
        let result = partitioner
            .run_from(&store, partition, args.levels)
            .map_err(|e| e.to_string())?;
        for level in &result.levels {
            println!("🧩 {}: {} clusters", level.name, level.partition.n_clusters());
        }
        if !result.failures.is_empty() {
            println!("⚠️  {} branches could not be split further", result.failures.len());
        }
        write_multires(&output, &args.format, store.names(), &result, &command_line)
            .map_err(|e| e.to_string())?;
    } else {
        write_partition(&output, &args.format, store.names(), &partition, &command_line)
            .map_err(|e| e.to_string())?;
    }

    if let Some(path) = &args.dendrogram {
        write_newick(path, &dendrogram, store.names()).map_err(|e| e.to_string())?;
    }
    if let Some(path) = &args.linkage {
        write_linkage(path, &args.format, &dendrogram, &command_line).map_err(|e| e.to_string())?;
    }

    if args.bootstrap > 0 {
        let bootstrap_output = args
            .bootstrap_output
            .clone()
            .ok_or("--bootstrap requires --bootstrap-output")?;
        println!("🔁 Bootstrap: {} replicates (seed {})", args.bootstrap, args.random_seed);
        let estimator = BootstrapEstimator::new(
            BhcEngine::new(BhcConfig {
                show_progress: false,
                ..engine.config().clone()
            }),
            validation_result.selector,
            args.random_seed,
        )
        .with_progress(true);
        let matrix = estimator
            .bootstrap(&store, &prior, args.bootstrap)
            .map_err(|e| e.to_string())?;
        if matrix.failed() > 0 {
            println!("⚠️  {} replicates failed and were skipped", matrix.failed());
        }
        write_bootstrap(&bootstrap_output, &args.format, store.names(), &matrix, &command_line)
            .map_err(|e| e.to_string())?;
    }

    println!("\n🎉 === POPBHC COMPLETED SUCCESSFULLY ===");
    println!(
        "⏱️  Total execution time: {:.2}s",
        total_start.elapsed().as_secs_f64()
    );
    Ok(())
}
