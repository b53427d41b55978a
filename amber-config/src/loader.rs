use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::models::{
    Config, ConfigMetadata, DaemonConfig, EnvConfig, FileConfig, ServerConfig,
    StoreConfig,
};
use crate::validation::{validate, ConfigWarnings};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8084;
pub const DEFAULT_STORE_PATH: &str = "/var/lib/amber";
pub const DEFAULT_BLOB_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BLOB_FETCH_CONCURRENCY: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Merges file, environment, and defaults into a [`Config`].
///
/// Precedence is environment over file over built-in default, field by
/// field.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Overrides the environment snapshot; tests use this instead of
    /// mutating the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(self) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let file = match &self.config_path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        let env = self.env.unwrap_or_else(EnvConfig::from_env);

        let config = merge(file, env, self.config_path.clone());
        let warnings = validate(&config);
        if let Some(path) = &config.metadata.config_path {
            info!(path = %path.display(), "loaded config file");
        }
        Ok((config, warnings))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let raw =
        std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_owned(),
            source,
        })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn merge(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Config {
    Config {
        server: ServerConfig {
            host: env
                .server_host
                .or(file.server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: env.server_port.or(file.server.port).unwrap_or(DEFAULT_PORT),
        },
        store: StoreConfig {
            path: env
                .store_path
                .or(file.store.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            source_config_dir: env
                .source_config_dir
                .or(file.store.source_config_dir),
        },
        daemon: DaemonConfig {
            auto_update: env
                .auto_update
                .or(file.daemon.auto_update)
                .unwrap_or(false),
            startup_delay: env
                .startup_delay
                .or(file.daemon.startup_delay_secs.map(Duration::from_secs))
                .unwrap_or(Duration::ZERO),
            blob_poll_interval: env
                .blob_poll_interval
                .or(file
                    .daemon
                    .blob_poll_interval_secs
                    .map(Duration::from_secs))
                .unwrap_or(DEFAULT_BLOB_POLL_INTERVAL),
            blob_fetch_concurrency: env
                .blob_fetch_concurrency
                .or(file.daemon.blob_fetch_concurrency)
                .unwrap_or(DEFAULT_BLOB_FETCH_CONCURRENCY),
        },
        metadata: ConfigMetadata { config_path },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_supplied() {
        let (config, warnings) = ConfigLoader::new()
            .with_env(EnvConfig::default())
            .load()
            .unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.store.path, PathBuf::from(DEFAULT_STORE_PATH));
        assert!(!config.daemon.auto_update);
        assert_eq!(
            config.daemon.blob_poll_interval,
            DEFAULT_BLOB_POLL_INTERVAL
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn env_wins_over_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [daemon]
            auto_update = false
            blob_poll_interval_secs = 60
            "#,
        )
        .unwrap();
        let env = EnvConfig {
            auto_update: Some(true),
            ..Default::default()
        };
        let config = merge(file, env, None);
        assert!(config.daemon.auto_update);
        assert_eq!(
            config.daemon.blob_poll_interval,
            Duration::from_secs(60)
        );
    }
}
