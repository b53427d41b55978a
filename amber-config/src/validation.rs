use std::fmt;
use std::time::Duration;

use crate::models::Config;

/// A non-fatal configuration concern surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    PollIntervalVeryShort { configured: Duration },
    BlobConcurrencyZero,
    StartupDelayLong { configured: Duration },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::PollIntervalVeryShort { configured } => write!(
                f,
                "blob poll interval of {}s will hammer sources",
                configured.as_secs()
            ),
            ConfigWarning::BlobConcurrencyZero => {
                write!(f, "blob fetch concurrency of 0 stalls all downloads")
            }
            ConfigWarning::StartupDelayLong { configured } => write!(
                f,
                "startup delay of {}s postpones the first update check",
                configured.as_secs()
            ),
        }
    }
}

pub type ConfigWarnings = Vec<ConfigWarning>;

const MIN_SANE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const LONG_STARTUP_DELAY: Duration = Duration::from_secs(3600);

pub fn validate(config: &Config) -> ConfigWarnings {
    let mut warnings = Vec::new();
    if config.daemon.blob_poll_interval < MIN_SANE_POLL_INTERVAL {
        warnings.push(ConfigWarning::PollIntervalVeryShort {
            configured: config.daemon.blob_poll_interval,
        });
    }
    if config.daemon.blob_fetch_concurrency == 0 {
        warnings.push(ConfigWarning::BlobConcurrencyZero);
    }
    if config.daemon.startup_delay > LONG_STARTUP_DELAY {
        warnings.push(ConfigWarning::StartupDelayLong {
            configured: config.daemon.startup_delay,
        });
    }
    warnings
}
