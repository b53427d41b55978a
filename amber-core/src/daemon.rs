//! Long-running coordinator wiring the engine together.
//!
//! The daemon owns the package set, the source set, the activation monitor,
//! and the fetch workers, and exposes the operations the RPC surface calls
//! into. Construction is eager: everything is built and running before the
//! first operation is served.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use amber_model::{
    AmberError, ContentHash, Package, PackageSet, Result, SourceConfig,
};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::activation::{ActivationMonitor, MonitorHandle, DEFAULT_CHANNEL_CAPACITY};
use crate::cache::ResolutionCache;
use crate::fetch::{Fetcher, GetResult};
use crate::pkgfs::{ActivationWatcher, DirPackageFs, PackageFs};
use crate::source::{http_source_builder, SourceBuilder, SourceSet};
use crate::system_update::{RebootHook, SystemUpdateMonitor};
use crate::ticker::{TickGen, TickHandle};

/// Deadline for resolving a package to a content hash.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for fetching content and observing activation.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds a [`Daemon`] with explicit collaborators. Tests swap in in-memory
/// transports and package filesystems; the binary uses the defaults.
pub struct DaemonBuilder {
    store_root: PathBuf,
    pkgfs: Option<Arc<dyn PackageFs>>,
    source_builder: Option<SourceBuilder>,
    default_config_dir: Option<PathBuf>,
    activation_dir: Option<PathBuf>,
    poll_interval: Duration,
    blob_concurrency: usize,
    cache: Option<ResolutionCache>,
    reboot: Option<Arc<dyn RebootHook>>,
    auto_update: bool,
}

impl std::fmt::Debug for DaemonBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonBuilder")
            .field("store_root", &self.store_root)
            .finish()
    }
}

impl DaemonBuilder {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            pkgfs: None,
            source_builder: None,
            default_config_dir: None,
            activation_dir: None,
            poll_interval: Duration::from_secs(300),
            blob_concurrency: 5,
            cache: None,
            reboot: None,
            auto_update: false,
        }
    }

    pub fn pkgfs(mut self, pkgfs: Arc<dyn PackageFs>) -> Self {
        self.pkgfs = Some(pkgfs);
        self
    }

    pub fn source_builder(mut self, builder: SourceBuilder) -> Self {
        self.source_builder = Some(builder);
        self
    }

    pub fn default_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_config_dir = Some(dir.into());
        self
    }

    /// Directory whose entries announce activations; watched when set.
    pub fn activation_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.activation_dir = Some(dir.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn blob_concurrency(mut self, concurrency: usize) -> Self {
        self.blob_concurrency = concurrency;
        self
    }

    pub fn cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn auto_update(
        mut self,
        enabled: bool,
        reboot: Arc<dyn RebootHook>,
    ) -> Self {
        self.auto_update = enabled;
        self.reboot = Some(reboot);
        self
    }

    /// Constructs everything and starts the background workers.
    pub async fn start(self) -> Result<Daemon> {
        let pkgfs: Arc<dyn PackageFs> = match self.pkgfs {
            Some(pkgfs) => pkgfs,
            None => {
                let fs = DirPackageFs::open(self.store_root.join("pkgfs"))?;
                Arc::new(fs)
            }
        };
        let source_builder = self.source_builder.unwrap_or_else(|| {
            http_source_builder(reqwest::Client::new())
        });

        let sources =
            Arc::new(SourceSet::open(&self.store_root, source_builder).await?);
        if let Some(dir) = &self.default_config_dir {
            sources.import_defaults(dir).await?;
        }

        let (monitor, monitor_task) =
            ActivationMonitor::spawn(Arc::clone(&pkgfs), DEFAULT_CHANNEL_CAPACITY);

        let watcher = match &self.activation_dir {
            Some(dir) => Some(ActivationWatcher::spawn(
                dir,
                monitor.activation_sender(),
            )?),
            None => None,
        };

        let packages = Arc::new(PackageSet::new());
        let cache = Arc::new(self.cache.unwrap_or_default());
        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&packages),
            Arc::clone(&sources),
            Arc::clone(&pkgfs),
            monitor.clone(),
            Arc::clone(&cache),
            self.blob_concurrency,
        ));

        let (fetch_tick, fetch_gen) = TickGen::new();
        let fetch_task = tokio::spawn(
            Arc::clone(&fetcher).run(fetch_gen, self.poll_interval),
        );

        let mut system_tick = None;
        let mut system_task = None;
        if self.auto_update && let Some(reboot) = self.reboot {
            let system = Arc::new(SystemUpdateMonitor::new(
                Arc::clone(&fetcher),
                reboot,
            ));
            let (tick, r#gen) = TickGen::new();
            system_task =
                Some(tokio::spawn(system.run(r#gen, self.poll_interval)));
            system_tick = Some(tick);
        }

        info!(store = %self.store_root.display(), "daemon started");
        Ok(Daemon {
            packages,
            sources,
            fetcher,
            monitor,
            cache,
            poll_interval: self.poll_interval,
            _watcher: watcher,
            fetch_tick,
            system_tick,
            monitor_task,
            fetch_task,
            system_task,
        })
    }
}

/// The running engine. One per process.
pub struct Daemon {
    packages: Arc<PackageSet>,
    sources: Arc<SourceSet>,
    fetcher: Arc<Fetcher>,
    monitor: MonitorHandle,
    cache: Arc<ResolutionCache>,
    poll_interval: Duration,
    _watcher: Option<ActivationWatcher>,
    fetch_tick: TickHandle,
    system_tick: Option<TickHandle>,
    monitor_task: tokio::task::JoinHandle<()>,
    fetch_task: tokio::task::JoinHandle<()>,
    system_task: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").finish()
    }
}

impl Daemon {
    pub fn builder(store_root: impl Into<PathBuf>) -> DaemonBuilder {
        DaemonBuilder::new(store_root)
    }

    pub fn packages(&self) -> &Arc<PackageSet> {
        &self.packages
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    pub async fn add_source(&self, config: SourceConfig) -> Result<()> {
        self.cache.invalidate_source(&config.id);
        self.sources.add_source(config).await?;
        // New source may publish newer versions; check soon.
        self.fetch_tick.poke();
        Ok(())
    }

    pub async fn remove_source(&self, id: &str) -> Result<()> {
        self.cache.invalidate_source(id);
        self.sources.remove_source(id).await
    }

    pub async fn list_sources(&self) -> Vec<SourceConfig> {
        self.sources.list().await
    }

    /// The blob repositories the daemon currently tracks.
    pub async fn blob_repos(&self) -> Vec<amber_model::BlobRepo> {
        self.sources.blob_repos(self.poll_interval).await
    }

    pub async fn set_src_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<()> {
        self.cache.invalidate_source(id);
        self.sources.set_enabled(id, enabled).await
    }

    /// Resolves a package, drives it to activation, and returns its content
    /// hash once active. The package joins the monitored set.
    ///
    /// With `merkle` supplied, resolution is skipped and the given hash is
    /// fetched directly.
    pub async fn get_update(
        &self,
        name: &str,
        version: Option<&str>,
        merkle: Option<ContentHash>,
    ) -> Result<ContentHash> {
        let name = name.strip_prefix('/').unwrap_or(name);
        if name.is_empty() {
            return Err(AmberError::not_found(
                "package name must not be empty",
            ));
        }

        let result = match merkle {
            Some(hash) => {
                let update =
                    Package::new(name, version.unwrap_or("0"), hash)?;
                GetResult::new(update, None)
            }
            None => tokio::time::timeout(
                RESOLVE_TIMEOUT,
                self.fetcher.resolve(name, version),
            )
            .await
            .map_err(|_| {
                AmberError::timeout(format!(
                    "resolving {name:?} timed out"
                ))
            })??,
        };

        let hash = result.update.content_hash();
        self.packages.add(result.update.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::time::timeout(FETCH_TIMEOUT, async {
            self.fetcher
                .process_resolved(result, Some(reply_tx))
                .await?;
            // Bytes on the endpoint mean the artifact is active; a closed
            // endpoint means the write failed.
            reply_rx.await.map_err(|_| {
                AmberError::io(format!(
                    "update of {name:?} did not complete"
                ))
            })
        })
        .await
        .map_err(|_| {
            AmberError::timeout(format!("fetching {name:?} timed out"))
        })??;

        debug!(package = name, %hash, "update active");
        Ok(hash)
    }

    /// Fetches one blob into the content-addressed blob area.
    pub async fn get_blob(&self, hash: ContentHash) -> Result<()> {
        tokio::time::timeout(
            FETCH_TIMEOUT,
            self.fetcher.fetch_blob_to_pkgfs(hash),
        )
        .await
        .map_err(|_| {
            AmberError::timeout(format!("fetching blob {hash} timed out"))
        })?
    }

    /// Requests an immediate system update check.
    pub fn check_for_system_update(&self) -> bool {
        match &self.system_tick {
            Some(tick) => {
                tick.poke();
                true
            }
            None => {
                // Auto-update is off; still worth refreshing packages.
                self.fetch_tick.poke();
                false
            }
        }
    }

    /// Stops the workers and flushes the activation monitor. Returns false
    /// when a core worker had panicked, so the process can exit abnormally.
    pub async fn shutdown(self) -> bool {
        self.fetch_tick.shutdown();
        if let Some(tick) = &self.system_tick {
            tick.shutdown();
        }
        self.sources.teardown().await;

        let Daemon {
            monitor,
            _watcher,
            monitor_task,
            fetch_task,
            system_task,
            ..
        } = self;
        // Closing all three monitor inputs (the handle and the watcher's
        // activation sender) lets the loop flush and exit.
        drop(_watcher);
        drop(monitor);

        let mut clean = true;
        clean &= fetch_task.await.is_ok();
        if let Some(task) = system_task {
            clean &= task.await.is_ok();
        }
        clean &= monitor_task.await.is_ok();
        info!(clean, "daemon stopped");
        clean
    }
}
