use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{parse_bool_var, parse_secs_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub daemon: FileDaemonConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    /// Root for persisted metadata and source configs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Where default SourceConfigs are discovered on first boot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_config_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDaemonConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<bool>,
    /// Seconds to sleep before any work begins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay_secs: Option<u64>,
    /// Default cadence for the fetcher, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_poll_interval_secs: Option<u64>,
    /// Maximum concurrent blob downloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_fetch_concurrency: Option<usize>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub store_path: Option<PathBuf>,
    pub source_config_dir: Option<PathBuf>,
    pub auto_update: Option<bool>,
    pub startup_delay: Option<Duration>,
    pub blob_poll_interval: Option<Duration>,
    pub blob_fetch_concurrency: Option<usize>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            server_host: std::env::var("AMBER_HOST").ok(),
            server_port: std::env::var("AMBER_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            store_path: std::env::var("AMBER_STORE_PATH")
                .ok()
                .map(PathBuf::from),
            source_config_dir: std::env::var("AMBER_SOURCE_CONFIG_DIR")
                .ok()
                .map(PathBuf::from),
            auto_update: parse_bool_var("AMBER_AUTO_UPDATE"),
            startup_delay: parse_secs_var("AMBER_STARTUP_DELAY"),
            blob_poll_interval: parse_secs_var("AMBER_BLOB_POLL_INTERVAL"),
            blob_fetch_concurrency: std::env::var(
                "AMBER_BLOB_FETCH_CONCURRENCY",
            )
            .ok()
            .and_then(|raw| raw.parse().ok()),
        }
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.store.path)
    }

    pub fn store_path(&self) -> &Path {
        &self.store.path
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub source_config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub auto_update: bool,
    pub startup_delay: Duration,
    pub blob_poll_interval: Duration,
    pub blob_fetch_concurrency: usize,
}

/// Where each piece of the final config came from, for startup logging.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
}
