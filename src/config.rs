use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub catalog_url: String,
    pub registry_url: String,
    pub max_artifacts: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Ignore cached archives, registry and consolidated output for this run.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            catalog_url: constants::DEFAULT_CATALOG_URL.to_string(),
            registry_url: constants::DEFAULT_REGISTRY_URL.to_string(),
            max_artifacts: constants::DEFAULT_MAX_ARTIFACTS,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::DEFAULT_CACHE_DIR),
            force_refresh: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: constants::DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(constants::DEFAULT_DATABASE_PATH),
            batch_size: constants::DEFAULT_LOAD_BATCH_SIZE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_SERVER_PORT,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, then applies environment overrides.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Applies `EXPENSE_*` overrides supplied by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EXPENSE_CATALOG_URL") {
            self.source.catalog_url = v;
        }
        if let Some(v) = lookup("EXPENSE_REGISTRY_URL") {
            self.source.registry_url = v;
        }
        if let Some(v) = lookup("EXPENSE_MAX_ARTIFACTS") {
            self.source.max_artifacts = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("EXPENSE_MAX_ARTIFACTS is not a number: {v}"))
            })?;
        }
        if let Some(v) = lookup("EXPENSE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EXPENSE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("EXPENSE_HTTP_TIMEOUT_SECS") {
            self.http.timeout_seconds = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("EXPENSE_HTTP_TIMEOUT_SECS is not a number: {v}"))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.max_artifacts == 0 {
            return Err(PipelineError::Config(
                "source.max_artifacts must be at least 1".to_string(),
            ));
        }
        if self.store.batch_size == 0 {
            return Err(PipelineError::Config(
                "store.batch_size must be at least 1".to_string(),
            ));
        }
        if self.http.timeout_seconds == 0 {
            return Err(PipelineError::Config(
                "http.timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.source.max_artifacts, 3);
        assert_eq!(config.store.batch_size, 1000);
        assert_eq!(config.source.catalog_url, constants::DEFAULT_CATALOG_URL);
        assert!(!config.cache.force_refresh);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [cache]
            dir = "/tmp/ans"

            [http]
            timeout_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/ans"));
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("EXPENSE_CATALOG_URL", "http://localhost/catalog/"),
            ("EXPENSE_MAX_ARTIFACTS", "2"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.source.catalog_url, "http://localhost/catalog/");
        assert_eq!(config.source.max_artifacts, 2);
    }

    #[test]
    fn test_bad_numeric_override_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "EXPENSE_MAX_ARTIFACTS").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
