// cache.rs - LZ4-compressed dendrogram cache

use crate::core::Dendrogram;
use crate::data::SparseCountStore;
use crate::error::{BapsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: String,
    pub created: String,
    pub prior_type: String,
    pub mixture_concentration: f64,
    pub fingerprint: u32,
    pub n_sequences: usize,
    pub user_note: Option<String>,
    pub format_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DendrogramCache {
    pub metadata: CacheMetadata,
    pub dendrogram: Dendrogram,
}

pub fn save_dendrogram_cache(
    cache_path: &str,
    dendrogram: &Dendrogram,
    note: Option<&str>,
) -> Result<()> {
    println!("💾 Saving dendrogram cache to {}...", cache_path);
    let start = Instant::now();

    let metadata = CacheMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        prior_type: dendrogram.prior_type().tag().to_string(),
        mixture_concentration: dendrogram.mixture_concentration(),
        fingerprint: dendrogram.fingerprint(),
        n_sequences: dendrogram.n_sequences(),
        user_note: note.map(str::to_string),
        format_version: CACHE_FORMAT_VERSION,
    };
    let cache = DendrogramCache {
        metadata,
        dendrogram: dendrogram.clone(),
    };

    let data = serde_json::to_vec(&cache)
        .map_err(|e| BapsError::parse(format!("Failed to serialize cache: {}", e)))?;
    let compressed = lz4_flex::compress_prepend_size(&data);
    std::fs::write(cache_path, &compressed)?;

    println!(
        "✅ Cache saved in {:.2}s ({} nodes, {} KB)",
        start.elapsed().as_secs_f64(),
        dendrogram.nodes().len(),
        compressed.len() / 1024
    );
    if let Some(note) = note {
        println!("📝 User note: {}", note);
    }
    Ok(())
}

/// Load a cached dendrogram, refusing caches built from a different store
pub fn load_dendrogram_cache(cache_path: &str, store: &SparseCountStore) -> Result<Dendrogram> {
    println!("📂 Loading dendrogram cache from {}...", cache_path);
    let compressed = std::fs::read(cache_path)?;
    let decompressed = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| BapsError::parse(format!("Failed to decompress cache: {}", e)))?;
    let cache: DendrogramCache = serde_json::from_slice(&decompressed)
        .map_err(|e| BapsError::parse(format!("Failed to parse cache: {}", e)))?;

    if cache.metadata.format_version != CACHE_FORMAT_VERSION {
        return Err(BapsError::parse(format!(
            "Unsupported cache format version {}",
            cache.metadata.format_version
        )));
    }
    let expected = store.fingerprint();
    if cache.metadata.fingerprint != expected || cache.dendrogram.fingerprint() != expected {
        return Err(BapsError::mismatched(format!(
            "Cache was built from different data (fingerprint {:08x}, current {:08x})",
            cache.metadata.fingerprint, expected
        )));
    }

    println!(
        "✅ Loaded cached dendrogram (prior {}, created {})",
        cache.metadata.prior_type, cache.metadata.created
    );
    if let Some(note) = &cache.metadata.user_note {
        println!("📝 User note: {}", note);
    }
    Ok(cache.dendrogram)
}
