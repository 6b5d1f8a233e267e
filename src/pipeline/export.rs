use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::CompressionMethod;

use crate::constants::OUTPUT_DELIMITER;
use crate::error::Result;

/// Writes `records` as a `;`-delimited UTF-8 file with a header row.
pub fn write_delimited<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(OUTPUT_DELIMITER)
        .from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("💾 Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

pub fn read_delimited<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(OUTPUT_DELIMITER)
        .from_path(path)?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        out.push(record?);
    }
    Ok(out)
}

/// Compresses a single file into a new ZIP archive, stored under `entry_name` only.
pub fn zip_single_file(source: &Path, archive: &Path, entry_name: &str) -> Result<()> {
    let out = BufWriter::new(File::create(archive)?);
    let mut zip = zip::ZipWriter::new(out);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    let mut input = File::open(source)?;
    io::copy(&mut input, &mut zip)?;
    zip.finish()?;
    info!("🗜️  Compressed {} into {}", entry_name, archive.display());
    Ok(())
}
