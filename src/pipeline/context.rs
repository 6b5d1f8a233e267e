use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::constants::RUN_LOCK_FILE;
use crate::error::{PipelineError, Result};

/// Counters for the download side of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Artifacts fetched over the network during this run.
    pub downloaded: usize,
    /// Artifacts already present in the cache.
    pub reused: usize,
    /// Artifacts skipped because the fetch failed.
    pub failed: usize,
}

/// Everything one pipeline execution needs, passed explicitly to each stage.
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: Config,
    pub http: Arc<dyn HttpClientPort>,
    pub downloads: DownloadStats,
}

impl RunContext {
    pub fn new(config: Config, http: Arc<dyn HttpClientPort>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            http,
            downloads: DownloadStats::default(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache.dir
    }

    pub fn cache_path(&self, file_name: &str) -> PathBuf {
        self.config.cache.dir.join(file_name)
    }

    pub fn force_refresh(&self) -> bool {
        self.config.cache.force_refresh
    }

    pub fn ensure_cache_dir(&self) -> Result<()> {
        fs::create_dir_all(self.cache_dir())?;
        Ok(())
    }
}

/// Exclusive lock over a cache directory, released on drop.
///
/// The lock file holds the owning run id. A file left behind by a crashed run keeps
/// refusing new runs until it is removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(cache_dir: &Path, run_id: Uuid) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(RUN_LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(PipelineError::CacheLocked {
                    path: path.display().to_string(),
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{run_id}")?;
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_lock_is_refused_until_release() {
        let dir = tempdir().unwrap();
        let first_id = Uuid::new_v4();
        let first = RunLock::acquire(dir.path(), first_id).unwrap();
        let second = RunLock::acquire(dir.path(), Uuid::new_v4());
        match second {
            Err(PipelineError::CacheLocked { holder, .. }) => assert_eq!(holder, first_id.to_string()),
            other => panic!("unexpected result: {other:?}"),
        }

        drop(first);
        assert!(!dir.path().join(RUN_LOCK_FILE).exists());
        assert!(RunLock::acquire(dir.path(), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_stale_lock_message_names_file_and_holder() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join(RUN_LOCK_FILE);
        fs::write(&lock_path, "crashed-run-42\n").unwrap();

        let err = RunLock::acquire(dir.path(), Uuid::new_v4()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&lock_path.display().to_string()), "{message}");
        assert!(message.contains("crashed-run-42"), "{message}");
        // the foreign lock is left in place
        assert!(lock_path.exists());
    }
}
