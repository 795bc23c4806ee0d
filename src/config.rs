//! Configuration - TOML File With Defaults
//!
//! Lookup order for [`AppConfig::discover`]: `TAILOR_CONFIG`, then
//! `./config/tailor.toml`, then built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "TAILOR_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("tailor.toml"))
            .map_err(|source| ConfigError::Context {
                message: "Failed to resolve current directory".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: Self::default_level() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("data")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: Self::default_data_dir() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_max_upload")]
    pub max_upload_bytes: usize,
    /// Designs serializing above this size move their full content to the
    /// blob store.
    #[serde(default = "LimitsConfig::default_threshold")]
    pub externalize_threshold_bytes: usize,
    #[serde(default = "LimitsConfig::default_max_blob")]
    pub max_blob_bytes: usize,
}

impl LimitsConfig {
    fn default_max_upload() -> usize {
        5 * 1024 * 1024
    }

    fn default_threshold() -> usize {
        1024 * 1024
    }

    fn default_max_blob() -> usize {
        32 * 1024 * 1024
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: Self::default_max_upload(),
            externalize_threshold_bytes: Self::default_threshold(),
            max_blob_bytes: Self::default_max_blob(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "FetchConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl FetchConfig {
    fn default_timeout_ms() -> u64 {
        5_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_ms: Self::default_timeout_ms() }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
