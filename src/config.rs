use crate::constants::{
    ARCHIVE_CENTERS, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS,
};
use crate::error::{IngestError, Result};
use crate::pipeline::RegionFilter;
use crate::source::Mirror;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "argo-ingest.toml";

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    pub region: Option<RegionFilter>,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub timeout_seconds: u64,
    pub max_attempts: usize,
    pub archive_centers: Vec<String>,
    pub mirrors: Vec<Mirror>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            archive_centers: ARCHIVE_CENTERS.iter().map(|c| c.to_string()).collect(),
            mirrors: Mirror::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/argo.db"),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen_address: Option<String>,
}

impl Config {
    /// Read `path` if it exists, otherwise start from defaults; then apply
    /// `ARGO_*` environment overrides and validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                IngestError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&content)?
        } else {
            info!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| IngestError::Config(format!("{key} has an invalid value: {raw}")))
        }

        if let Some(path) = lookup("ARGO_DB_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("ARGO_BATCH_SIZE") {
            self.storage.batch_size = parsed("ARGO_BATCH_SIZE", raw)?;
        }
        if let Some(raw) = lookup("ARGO_MAX_ATTEMPTS") {
            self.archive.max_attempts = parsed("ARGO_MAX_ATTEMPTS", raw)?;
        }
        if let Some(raw) = lookup("ARGO_TIMEOUT_SECONDS") {
            self.archive.timeout_seconds = parsed("ARGO_TIMEOUT_SECONDS", raw)?;
        }
        if let Some(addr) = lookup("ARGO_METRICS_ADDR") {
            self.metrics.listen_address = Some(addr).filter(|a| !a.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be at least 1".into()));
        }
        if self.archive.max_attempts == 0 {
            return Err(IngestError::Config("max_attempts must be at least 1".into()));
        }
        if self.archive.mirrors.is_empty() {
            return Err(IngestError::Config("at least one mirror is required".into()));
        }
        if self.archive.archive_centers.is_empty() {
            return Err(IngestError::Config("archive_centers must not be empty".into()));
        }
        if let Some(region) = &self.region {
            region.validate()?;
        }
        Ok(())
    }
}
