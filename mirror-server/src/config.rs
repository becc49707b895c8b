//! # Configuration Management
//!
//! [`Config`] is read from an optional JSON file; every section and field
//! falls back to a default, and most defaults consult an environment
//! variable first:
//!
//! | Field | Environment | Fallback |
//! |-------|-------------|----------|
//! | `storage.cache_root` | `CRATES_DIR` | `<tmp>/crates` |
//! | `storage.db_path` | `CRATES_MIRROR_DB` | `<data dir>/crates-mirror/crates.db` |
//! | `storage.index_dir` | `CRATES_MIRROR_INDEX` | `<data dir>/crates-mirror/index` |
//! | `server.port` | `CRATES_MIRROR_PORT` | `8080` |
//!
//! Command-line flags are applied on top by the binary.

use crate::error::AppResult;
use mirror_index::RegistryConfig;
use mirror_logging::LogSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub upstream: UpstreamSettings,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub logging: LogSettings,
}

/// Where artifacts, metadata and the index clone live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_root: PathBuf,
    pub db_path: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            db_path: default_db_path(),
            index_dir: default_index_dir(),
        }
    }
}

/// The origin registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Artifact URL template with `{crate}` and `{version}` placeholders.
    pub download_url: String,
    /// Git URL of the registry index.
    pub index_url: String,
    /// Web API advertised in the mirrored index config.
    pub api_url: String,
    pub timeout_secs: u64,
    /// Largest artifact accepted from the origin, in bytes.
    pub max_artifact_size: u64,
    /// Compare fetched bytes against the index checksum before caching.
    pub verify_checksums: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            download_url: "https://crates.io/api/v1/crates/{crate}/{version}/download".to_string(),
            index_url: "https://github.com/rust-lang/crates.io-index".to_string(),
            api_url: "https://crates.io".to_string(),
            timeout_secs: 30,
            max_artifact_size: 64 * 1024 * 1024,
            verify_checksums: true,
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Address clients use to reach the mirror; defaults to `http://host:port`.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: default_port(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the index syncer inside `serve`.
    pub enabled: bool,
    /// Seconds between sync passes; 0 runs a single pass at startup.
    pub interval_secs: u64,
    /// Point the mirrored index's `config.json` at this server.
    pub rewrite_config: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            rewrite_config: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from file with fallback to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn public_url(&self) -> String {
        self.server
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }

    /// Registry config pointing cargo at this mirror's download route.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::for_mirror(&self.public_url(), &self.upstream.api_url)
    }
}

fn default_cache_root() -> PathBuf {
    std::env::var_os("CRATES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("crates"))
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("crates-mirror")
}

fn default_db_path() -> PathBuf {
    std::env::var_os("CRATES_MIRROR_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("crates.db"))
}

fn default_index_dir() -> PathBuf {
    std::env::var_os("CRATES_MIRROR_INDEX")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("index"))
}

fn default_port() -> u16 {
    std::env::var("CRATES_MIRROR_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080)
}
