use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use amber_model::{
    AmberError, ContentHash, Package, PackageKey, PackageSet, Result,
};
use amber_model::error::Backoff;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::meta::MetaContents;
use super::GetResult;
use crate::activation::MonitorHandle;
use crate::cache::ResolutionCache;
use crate::pkgfs::PackageFs;
use crate::source::SourceSet;
use crate::ticker::{Tick, TickGen};

/// Tick-driven update processor.
///
/// Each cycle snapshots the monitored package set, resolves every entry
/// across the source set, and drives changed packages through the
/// activation monitor: claim the write, download the meta-artifact and
/// every referenced blob, then hand over any caller-supplied reply
/// endpoint.
pub struct Fetcher {
    packages: Arc<PackageSet>,
    sources: Arc<SourceSet>,
    pkgfs: Arc<dyn PackageFs>,
    monitor: MonitorHandle,
    cache: Arc<ResolutionCache>,
    installed: tokio::sync::Mutex<HashMap<PackageKey, ContentHash>>,
    concurrency: usize,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Fetcher {
    pub fn new(
        packages: Arc<PackageSet>,
        sources: Arc<SourceSet>,
        pkgfs: Arc<dyn PackageFs>,
        monitor: MonitorHandle,
        cache: Arc<ResolutionCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            packages,
            sources,
            pkgfs,
            monitor,
            cache,
            installed: tokio::sync::Mutex::new(HashMap::new()),
            concurrency: concurrency.max(1),
        }
    }

    /// The poll loop. The first cycle runs immediately; later cycles are
    /// spaced by `poll_interval`, stretched by exponential backoff while
    /// cycles keep failing.
    pub async fn run(
        self: Arc<Self>,
        mut ticks: TickGen,
        poll_interval: Duration,
    ) {
        let mut backoff = Backoff::new();
        let mut delay = Duration::ZERO;
        loop {
            match ticks.next(delay).await {
                Tick::Shutdown => break,
                Tick::Scheduled | Tick::Poked => {}
            }
            match self.run_once().await {
                Ok(()) => {
                    backoff.reset();
                    delay = poll_interval;
                }
                Err(e) => {
                    delay = backoff.next_delay();
                    if e.kind == amber_model::ErrorKind::Cancelled {
                        debug!(error = %e, "update cycle cancelled");
                    } else {
                        warn!(
                            error = %e,
                            retry_secs = delay.as_secs(),
                            "update cycle failed"
                        );
                    }
                }
            }
        }
        debug!("fetcher exited");
    }

    /// One poll cycle: serve outstanding blob needs, then check every
    /// monitored package for updates.
    pub async fn run_once(&self) -> Result<()> {
        let mut first_error: Option<AmberError> = None;

        if let Err(e) = self.fetch_needed().await {
            first_error.get_or_insert(e);
        }

        for package in self.packages.snapshot() {
            let key = package.key();
            let pinned = self.packages.pinned_version(&key);
            let version = pinned.as_deref().unwrap_or(package.version());
            match self
                .process_package(package.name(), Some(version), None)
                .await
            {
                Ok(hash) => {
                    debug!(package = package.name(), %hash, "package current");
                }
                Err(e) => {
                    warn!(
                        package = package.name(),
                        error = %e,
                        "package update failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves a package across enabled sources, consulting the resolution
    /// cache first.
    pub async fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<GetResult> {
        self.sources
            .resolve_cached(name, version, &self.cache)
            .await
    }

    /// Resolves and, when the content hash changed, drives the update
    /// through the monitor. Returns the resolved hash.
    pub async fn process_package(
        &self,
        name: &str,
        version: Option<&str>,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    ) -> Result<ContentHash> {
        let result = self.resolve(name, version).await?;
        let key = result.update.key();
        let hash = result.update.content_hash();

        if reply.is_none()
            && self.installed.lock().await.get(&key) == Some(&hash)
        {
            // Nothing new and nobody waiting.
            return Ok(hash);
        }
        self.process_resolved(result, reply).await
    }

    /// Drives an already resolved update: claim the write, fetch content,
    /// then register the caller's reply endpoint.
    pub async fn process_resolved(
        &self,
        result: GetResult,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    ) -> Result<ContentHash> {
        let hash = result.update.content_hash();
        let key = result.update.key();

        self.monitor.start_update(result.clone()).await?;

        if !self.pkgfs.has_blob(hash).await? {
            self.fetch_content(&result).await?;
        }

        if let Some(reply) = reply {
            self.monitor.complete_update(result, reply).await?;
        }

        self.installed.lock().await.insert(key, hash);
        Ok(hash)
    }

    /// Downloads the meta-artifact and every blob it references.
    async fn fetch_content(&self, result: &GetResult) -> Result<()> {
        let hash = result.update.content_hash();
        let meta_bytes = self.fetch_verified(result, hash).await?;
        let meta = MetaContents::parse(&meta_bytes)?;

        self.pkgfs.write_install(hash, &meta_bytes).await?;
        self.pkgfs.write_blob(hash, &meta_bytes).await?;

        let failure = std::sync::Mutex::new(None::<AmberError>);
        futures::stream::iter(meta.hashes())
            .for_each_concurrent(self.concurrency, |blob_hash| {
                let failure = &failure;
                async move {
                    if let Err(e) =
                        self.fetch_blob_for(result, blob_hash).await
                    {
                        warn!(blob = %blob_hash, error = %e, "blob fetch failed");
                        failure
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .get_or_insert(e);
                    }
                }
            })
            .await;
        match failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(e) => Err(e),
            None => {
                info!(
                    package = result.update.name(),
                    %hash,
                    blobs = meta.len(),
                    "package content fetched"
                );
                Ok(())
            }
        }
    }

    async fn fetch_blob_for(
        &self,
        result: &GetResult,
        hash: ContentHash,
    ) -> Result<()> {
        if self.pkgfs.has_blob(hash).await? {
            return Ok(());
        }
        let bytes = self.fetch_verified(result, hash).await?;
        write_blob_retrying(&*self.pkgfs, hash, &bytes).await
    }

    /// Fetches a verified blob, preferring the source the resolution came
    /// from and falling back to the whole set.
    async fn fetch_verified(
        &self,
        result: &GetResult,
        hash: ContentHash,
    ) -> Result<Vec<u8>> {
        if let Some(source) = &result.source {
            let mut buffer = Vec::new();
            match source.fetch_blob(hash, &mut buffer).await {
                Ok(()) => return Ok(buffer),
                Err(e) => {
                    debug!(
                        source = %source.id(),
                        blob = %hash,
                        error = %e,
                        "resolving source lacks blob, trying the set"
                    );
                }
            }
        }
        self.sources.fetch_blob(hash).await
    }

    /// Fetches a single blob by hash into the content-addressed blob area.
    pub async fn fetch_blob_to_pkgfs(&self, hash: ContentHash) -> Result<()> {
        if self.pkgfs.has_blob(hash).await? {
            return Ok(());
        }
        let bytes = self.sources.fetch_blob(hash).await?;
        write_blob_retrying(&*self.pkgfs, hash, &bytes).await
    }

    /// Serves the package filesystem's outstanding blob requests.
    pub async fn fetch_needed(&self) -> Result<()> {
        let needed = self.pkgfs.needed_blobs().await?;
        if needed.is_empty() {
            return Ok(());
        }
        debug!(count = needed.len(), "serving needed blobs");
        let failure = std::sync::Mutex::new(None::<AmberError>);
        futures::stream::iter(needed)
            .for_each_concurrent(self.concurrency, |hash| {
                let failure = &failure;
                async move {
                    if let Err(e) = self.fetch_blob_to_pkgfs(hash).await {
                        warn!(blob = %hash, error = %e, "needed blob fetch failed");
                        failure
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .get_or_insert(e);
                    }
                }
            })
            .await;
        match failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The monitor handle this fetcher submits requests through.
    pub fn monitor_handle(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Forgets the recorded installed hash for a package so the next cycle
    /// re-fetches it.
    pub async fn forget_installed(&self, key: &PackageKey) {
        self.installed.lock().await.remove(key);
    }

    /// Records an installed hash; used when state is learned out of band.
    pub async fn record_installed(&self, package: &Package) {
        self.installed
            .lock()
            .await
            .insert(package.key(), package.content_hash());
    }
}

/// Local filesystem writes get one retry; repeated failure surfaces.
async fn write_blob_retrying(
    pkgfs: &dyn PackageFs,
    hash: ContentHash,
    bytes: &[u8],
) -> Result<()> {
    match pkgfs.write_blob(hash, bytes).await {
        Err(e) if e.kind == amber_model::ErrorKind::Io => {
            debug!(blob = %hash, error = %e, "blob write failed, retrying once");
            pkgfs.write_blob(hash, bytes).await
        }
        other => other,
    }
}
