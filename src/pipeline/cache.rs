//! Consolidated-output cache.
//!
//! Normalization is the slow part of a run, so its output is kept next to the archives and
//! reused while the archive set is unchanged. The fingerprint covers every archive's name and
//! bytes; a new or re-published archive invalidates the cache. `force_refresh` bypasses it.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::constants::{CONSOLIDATED_CSV, CONSOLIDATED_FINGERPRINT, CONSOLIDATED_ZIP};
use crate::domain::CanonicalExpenseRecord;
use crate::error::Result;
use crate::pipeline::export::{read_delimited, write_delimited, zip_single_file};

/// SHA-256 over the archives, ordered by file name.
pub fn fingerprint_archives(archive_paths: &[PathBuf]) -> Result<String> {
    let mut sorted: Vec<&PathBuf> = archive_paths.iter().collect();
    sorted.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    let mut hasher = Sha256::new();
    for path in sorted {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut hasher)?;
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub struct ConsolidatedCache {
    dir: PathBuf,
}

impl ConsolidatedCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(CONSOLIDATED_CSV)
    }

    pub fn zip_path(&self) -> PathBuf {
        self.dir.join(CONSOLIDATED_ZIP)
    }

    fn fingerprint_path(&self) -> PathBuf {
        self.dir.join(CONSOLIDATED_FINGERPRINT)
    }

    /// Returns the cached records when they were produced from the same archive set.
    ///
    /// A stale, missing or unreadable cache is a miss, never an error.
    pub fn load(&self, fingerprint: &str) -> Option<Vec<CanonicalExpenseRecord>> {
        let stored = fs::read_to_string(self.fingerprint_path()).ok()?;
        if stored.trim() != fingerprint {
            info!("Consolidated output is stale; archives changed since it was written");
            return None;
        }
        match read_delimited::<CanonicalExpenseRecord>(&self.csv_path()) {
            Ok(records) => {
                info!(
                    "♻️  Reusing consolidated output ({} records) from {}",
                    records.len(),
                    self.csv_path().display()
                );
                Some(records)
            }
            Err(e) => {
                warn!("Ignoring unreadable consolidated output: {}", e);
                None
            }
        }
    }

    /// Writes the CSV, its ZIP copy, and finally the fingerprint that validates both.
    pub fn store(&self, records: &[CanonicalExpenseRecord], fingerprint: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let fingerprint_path = self.fingerprint_path();
        if fingerprint_path.exists() {
            fs::remove_file(&fingerprint_path)?;
        }
        let csv_path = self.csv_path();
        write_delimited(&csv_path, records)?;
        zip_single_file(&csv_path, &self.zip_path(), CONSOLIDATED_CSV)?;
        fs::write(&fingerprint_path, fingerprint)?;
        Ok(())
    }
}
