//! The system update monitor: a pure client of the core that watches the
//! distinguished system-image package and reboots the host once a new
//! image is active.

use std::sync::Arc;
use std::time::Duration;

use amber_model::{ContentHash, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::fetch::Fetcher;
use crate::ticker::{Tick, TickGen};

/// The distinguished package whose activation means "new system image".
pub const SYSTEM_IMAGE_PACKAGE: &str = "system_image";

/// Host reboot seam. Production wires the platform call; tests observe.
#[async_trait]
pub trait RebootHook: Send + Sync {
    async fn reboot(&self) -> Result<()>;
}

/// Watches for system-image version changes and applies them.
///
/// The first successful resolution is taken as the running baseline; only a
/// hash change after that triggers an update and, once the image is active,
/// the reboot hook.
pub struct SystemUpdateMonitor {
    fetcher: Arc<Fetcher>,
    package_name: String,
    reboot: Arc<dyn RebootHook>,
    baseline: tokio::sync::Mutex<Option<ContentHash>>,
}

impl std::fmt::Debug for SystemUpdateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemUpdateMonitor")
            .field("package", &self.package_name)
            .finish()
    }
}

impl SystemUpdateMonitor {
    pub fn new(fetcher: Arc<Fetcher>, reboot: Arc<dyn RebootHook>) -> Self {
        Self::with_package(fetcher, reboot, SYSTEM_IMAGE_PACKAGE)
    }

    pub fn with_package(
        fetcher: Arc<Fetcher>,
        reboot: Arc<dyn RebootHook>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            package_name: package_name.into(),
            reboot,
            baseline: tokio::sync::Mutex::new(None),
        }
    }

    /// The periodic check loop; also serviced early via the tick handle's
    /// poke (the CheckForSystemUpdate operation).
    pub async fn run(
        self: Arc<Self>,
        mut ticks: TickGen,
        interval: Duration,
    ) {
        let mut delay = Duration::ZERO;
        loop {
            if let Tick::Shutdown = ticks.next(delay).await {
                break;
            }
            delay = interval;
            match self.check_now().await {
                Ok(true) => info!("system update applied"),
                Ok(false) => debug!("system image unchanged"),
                Err(e) => warn!(error = %e, "system update check failed"),
            }
        }
        debug!("system update monitor exited");
    }

    /// One check: resolve the system package and, when its hash moved off
    /// the baseline, drive it to activation and reboot. Returns whether an
    /// update was applied.
    pub async fn check_now(&self) -> Result<bool> {
        let result = self.fetcher.resolve(&self.package_name, None).await?;
        let hash = result.update.content_hash();

        let mut baseline = self.baseline.lock().await;
        match *baseline {
            None => {
                // First sighting is the running version, not an update.
                *baseline = Some(hash);
                return Ok(false);
            }
            Some(current) if current == hash => return Ok(false),
            Some(_) => {}
        }
        info!(%hash, "system image changed, applying");

        let (reply_tx, reply_rx) = oneshot::channel();
        self.fetcher
            .process_resolved(result, Some(reply_tx))
            .await?;
        // Closed-without-data means the write failed; surface as a fetch
        // failure and leave the baseline so the next tick retries.
        reply_rx.await.map_err(|_| {
            amber_model::AmberError::io(
                "system image activation did not complete",
            )
        })?;

        *baseline = Some(hash);
        drop(baseline);
        self.reboot.reboot().await?;
        Ok(true)
    }
}
