use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use amber_config::{ConfigLoader, ConfigWarning, EnvConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn file_values_apply_when_env_silent() {
    let file = write_config(
        r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [store]
        path = "/tmp/amber-test-store"

        [daemon]
        auto_update = true
        startup_delay_secs = 5
        blob_poll_interval_secs = 120
        blob_fetch_concurrency = 8
        "#,
    );

    let (config, warnings) = ConfigLoader::new()
        .with_config_path(file.path())
        .with_env(EnvConfig::default())
        .load()
        .unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.store.path, PathBuf::from("/tmp/amber-test-store"));
    assert!(config.daemon.auto_update);
    assert_eq!(config.daemon.startup_delay, Duration::from_secs(5));
    assert_eq!(config.daemon.blob_poll_interval, Duration::from_secs(120));
    assert_eq!(config.daemon.blob_fetch_concurrency, 8);
    assert!(warnings.is_empty());
}

#[test]
fn env_overrides_file() {
    let file = write_config(
        r#"
        [store]
        path = "/from/file"

        [daemon]
        blob_poll_interval_secs = 120
        "#,
    );

    let env = EnvConfig {
        store_path: Some(PathBuf::from("/from/env")),
        blob_poll_interval: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    let (config, _) = ConfigLoader::new()
        .with_config_path(file.path())
        .with_env(env)
        .load()
        .unwrap();

    assert_eq!(config.store.path, PathBuf::from("/from/env"));
    assert_eq!(config.daemon.blob_poll_interval, Duration::from_secs(60));
}

#[test]
fn guard_rails_flag_degenerate_settings() {
    let file = write_config(
        r#"
        [daemon]
        blob_poll_interval_secs = 1
        blob_fetch_concurrency = 0
        "#,
    );

    let (_, warnings) = ConfigLoader::new()
        .with_config_path(file.path())
        .with_env(EnvConfig::default())
        .load()
        .unwrap();

    assert!(warnings.contains(&ConfigWarning::BlobConcurrencyZero));
    assert!(warnings.iter().any(|w| matches!(
        w,
        ConfigWarning::PollIntervalVeryShort { .. }
    )));
}

#[test]
fn missing_file_is_an_error() {
    let result = ConfigLoader::new()
        .with_config_path("/definitely/not/here.toml")
        .with_env(EnvConfig::default())
        .load();
    assert!(result.is_err());
}

#[test]
fn malformed_file_is_an_error() {
    let file = write_config("this is not toml ][");
    let result = ConfigLoader::new()
        .with_config_path(file.path())
        .with_env(EnvConfig::default())
        .load();
    assert!(result.is_err());
}
