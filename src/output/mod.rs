// mod.rs - Output formatters module

pub mod cache;

pub use cache::{load_dendrogram_cache, save_dendrogram_cache, CacheMetadata, DendrogramCache};

use crate::core::{BootstrapMatrix, Dendrogram, MultiResolution};
use crate::data::Partition;
use crate::error::{BapsError, Result};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Ensure parent directory exists before creating file
fn ensure_parent_dir(file_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(file_path).parent() {
        create_dir_all(parent)?;
    }
    Ok(())
}

fn create_output(file_path: &str) -> Result<BufWriter<File>> {
    ensure_parent_dir(file_path)?;
    let file = File::create(file_path).map_err(|e| {
        BapsError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create output file '{}': {}", file_path, e),
        ))
    })?;
    Ok(BufWriter::new(file))
}

fn write_header<W: Write>(writer: &mut W, command_line: &str) -> Result<()> {
    writeln!(writer, "# Command: {}", command_line)?;
    writeln!(
        writer,
        "# Generated: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(writer, "# popbhc v{}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Field separator for a table format
pub fn delimiter_for(format: &str) -> Result<char> {
    match format.to_lowercase().as_str() {
        "tsv" => Ok('\t'),
        "csv" => Ok(','),
        _ => Err(BapsError::config(format!(
            "Unsupported output format: {}. Use: tsv, csv",
            format
        ))),
    }
}

/// Delimited writer continuing after the `#` header lines
fn table_writer(writer: BufWriter<File>, sep: char) -> csv::Writer<BufWriter<File>> {
    csv::WriterBuilder::new()
        .delimiter(sep as u8)
        .from_writer(writer)
}

/// Write a flat partition as `Isolate, Cluster` rows
pub fn write_partition(
    file_path: &str,
    format: &str,
    names: &[String],
    partition: &Partition,
    command_line: &str,
) -> Result<()> {
    let sep = delimiter_for(format)?;
    let mut writer = create_output(file_path)?;
    write_header(&mut writer, command_line)?;

    let mut table = table_writer(writer, sep);
    table.write_record(["Isolate", "Cluster"])?;
    for (name, label) in names.iter().zip(partition.labels()) {
        table.write_record([name.clone(), label.to_string()])?;
    }

    table.flush()?;
    println!("✅ Partition written to: {}", file_path);
    Ok(())
}

/// Write nested partitions with one column per level
pub fn write_multires(
    file_path: &str,
    format: &str,
    names: &[String],
    result: &MultiResolution,
    command_line: &str,
) -> Result<()> {
    let sep = delimiter_for(format)?;
    let mut writer = create_output(file_path)?;
    write_header(&mut writer, command_line)?;
    for failure in &result.failures {
        writeln!(
            writer,
            "# Level {}: cluster of {} sequences carried forward ({})",
            failure.level, failure.size, failure.message
        )?;
    }

    let mut table = table_writer(writer, sep);
    let mut header = vec!["Isolate".to_string()];
    header.extend(result.levels.iter().map(|level| level.name.clone()));
    table.write_record(&header)?;

    for (i, name) in names.iter().enumerate() {
        let mut row = vec![name.clone()];
        row.extend(result.levels.iter().map(|level| level.partition.label(i).to_string()));
        table.write_record(&row)?;
    }

    table.flush()?;
    println!("✅ {} levels written to: {}", result.levels.len(), file_path);
    Ok(())
}

/// Write the co-assignment frequency matrix
pub fn write_bootstrap(
    file_path: &str,
    format: &str,
    names: &[String],
    matrix: &BootstrapMatrix,
    command_line: &str,
) -> Result<()> {
    let sep = delimiter_for(format)?;
    let mut writer = create_output(file_path)?;
    write_header(&mut writer, command_line)?;
    writeln!(
        writer,
        "# Replicates: {} successful, {} failed",
        matrix.replicates(),
        matrix.failed()
    )?;

    let mut table = table_writer(writer, sep);
    let mut header = vec!["Isolate".to_string()];
    header.extend(names.iter().cloned());
    table.write_record(&header)?;

    for (i, name) in names.iter().enumerate() {
        let mut row = vec![name.clone()];
        row.extend((0..names.len()).map(|j| format!("{:.4}", matrix.frequency(i, j))));
        table.write_record(&row)?;
    }

    table.flush()?;
    println!("✅ Bootstrap co-assignment matrix written to: {}", file_path);
    Ok(())
}

pub fn write_newick(file_path: &str, dendrogram: &Dendrogram, names: &[String]) -> Result<()> {
    let mut writer = create_output(file_path)?;
    writeln!(writer, "{}", dendrogram.to_newick(names))?;
    writer.flush()?;
    println!("✅ Dendrogram written to: {}", file_path);
    Ok(())
}

/// Write the merge table (step, left, right, size, merge probability)
pub fn write_linkage(
    file_path: &str,
    format: &str,
    dendrogram: &Dendrogram,
    command_line: &str,
) -> Result<()> {
    let sep = delimiter_for(format)?;
    let mut writer = create_output(file_path)?;
    write_header(&mut writer, command_line)?;
    writeln!(writer, "# Negative ids are starting clusters, positive ids earlier steps")?;

    let mut table = table_writer(writer, sep);
    table.write_record(["Step", "Left", "Right", "Size", "MergeProbability"])?;
    for row in dendrogram.linkage() {
        table.write_record([
            row.step.to_string(),
            row.left.to_string(),
            row.right.to_string(),
            row.size.to_string(),
            format!("{:.6}", row.merge_probability),
        ])?;
    }
    table.flush()?;
    println!("✅ Linkage table written to: {}", file_path);
    Ok(())
}
