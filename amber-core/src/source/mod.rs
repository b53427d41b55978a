//! One cryptographically verified remote repository, and the ordered set of
//! them the daemon routes requests across.

pub mod blob;
pub mod set;

pub use blob::{BlobRemote, ByteStream, HttpBlobRemote};
pub use set::{http_source_builder, SourceBuilder, SourceSet};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use amber_model::{
    AmberError, BlobRepo, ContentHash, Package, Result, SourceConfig,
};
use constant_time_eq::constant_time_eq;
use futures::StreamExt;
use sha2::{Digest, Sha512};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::tuf::{
    HttpMetadataRemote, InitState, LocalStore, MetadataClient, MetadataRemote,
};

/// A runtime view of one remote repository: verified metadata plus a blob
/// transport.
///
/// Created from a [`SourceConfig`], initialized once against its persisted
/// metadata store, and dropped when the config is removed. Metadata refresh
/// and lookup are serialized per source behind one async mutex; blob fetches
/// from different sources run independently.
pub struct Source {
    config: SourceConfig,
    client: tokio::sync::Mutex<MetadataClient>,
    blobs: Arc<dyn BlobRemote>,
    enabled: AtomicBool,
    initialized: AtomicBool,
    /// Serializes metadata refresh against blob transfers for this source,
    /// and carries the last-fetch instant for rate limiting.
    transfer: tokio::sync::Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.config.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Source {
    /// Builds the production source: HTTP transports for both metadata and
    /// blobs, metadata store under `<store_root>/sources/<id>/metadata`.
    pub fn open(
        config: SourceConfig,
        store_root: &Path,
        http: reqwest::Client,
    ) -> Result<Self> {
        let metadata_remote = Arc::new(HttpMetadataRemote::new(
            config.repo_url.clone(),
            http.clone(),
        ));
        let blob_remote =
            Arc::new(HttpBlobRemote::new(config.blob_url.clone(), http));
        Self::with_remotes(config, store_root, metadata_remote, blob_remote)
    }

    /// Wires explicit transports; tests use in-memory ones.
    pub fn with_remotes(
        config: SourceConfig,
        store_root: &Path,
        metadata_remote: Arc<dyn MetadataRemote>,
        blob_remote: Arc<dyn BlobRemote>,
    ) -> Result<Self> {
        config.validate()?;
        let store = LocalStore::open(
            store_root
                .join("sources")
                .join(&config.id)
                .join("metadata"),
        )?;
        let client = MetadataClient::new(store, metadata_remote);
        let enabled = config.status.enabled;
        Ok(Self {
            config,
            client: tokio::sync::Mutex::new(client),
            blobs: blob_remote,
            enabled: AtomicBool::new(enabled),
            initialized: AtomicBool::new(false),
            transfer: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Stops any in-flight root-install retry loop.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    /// Checks the persisted store and, when no trusted root exists yet,
    /// installs one from the remote using the configured root keys.
    ///
    /// Transient network failures retry with backoff for as long as the
    /// daemon lives; a signature failure surfaces immediately and leaves the
    /// source unusable until its config changes.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut client = self.client.lock().await;
        match client.init()? {
            InitState::Ready => {
                debug!(source = %self.config.id, "metadata store ready");
            }
            InitState::NeedsInit => {
                info!(source = %self.config.id, "installing root of trust");
                client
                    .install_roots(&self.config.root_keys, &self.cancel)
                    .await?;
            }
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Refreshes signed metadata. Safe to call repeatedly. Serialized
    /// against this source's blob transfers.
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_initialized().await?;
        let _transfer = self.transfer.lock().await;
        let mut client = self.client.lock().await;
        client.refresh().await
    }

    /// Resolves a package name (optionally pinned to a version) to its
    /// currently published content hash.
    pub async fn lookup(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Package> {
        let name = name.strip_prefix('/').unwrap_or(name);
        if name.is_empty() {
            return Err(AmberError::not_found(
                "package name must not be empty",
            ));
        }
        self.refresh().await?;
        let client = self.client.lock().await;
        let (entry, resolved_version) = match version {
            Some(version) if !version.is_empty() => {
                let key = format!("{name}/{version}");
                (client.target(&key), version.to_owned())
            }
            _ => {
                // No pin: prefer a bare entry for the name, falling back to
                // the conventional "0" variant.
                match client.target(name) {
                    Some(entry) => (Some(entry), "0".to_owned()),
                    None => {
                        (client.target(&format!("{name}/0")), "0".to_owned())
                    }
                }
            }
        };
        let entry = entry.ok_or_else(|| {
            AmberError::not_found(format!(
                "package {name:?} not found in source {:?}",
                self.config.id
            ))
        })?;
        let hash = entry.content_hash()?;
        Package::new(name, resolved_version, hash)
    }

    /// Streams the blob for `hash` into `sink`, verifying the digest on the
    /// fly. On mismatch the sink's contents must be discarded by the caller.
    /// Transfers for one source run one at a time; different sources are
    /// independent.
    pub async fn fetch_blob<W>(
        &self,
        hash: ContentHash,
        sink: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let mut transfer = self.transfer.lock().await;
        self.rate_limit(&mut transfer).await;

        let mut stream = self.blobs.open(hash).await?;
        let mut hasher = Sha512::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            sink.write_all(&chunk).await.map_err(|e| {
                AmberError::io(format!("blob sink write failed: {e}"))
            })?;
        }
        sink.flush().await.map_err(|e| {
            AmberError::io(format!("blob sink flush failed: {e}"))
        })?;
        let digest = hasher.finalize();
        if !constant_time_eq(digest.as_slice(), hash.as_bytes()) {
            return Err(AmberError::integrity(format!(
                "blob {hash} failed digest verification"
            )));
        }
        Ok(())
    }

    async fn rate_limit(&self, last_fetch: &mut Option<Instant>) {
        let Some(per_sec) = self.config.rate_limit_per_sec else {
            return;
        };
        if per_sec == 0 {
            return;
        }
        let spacing = Duration::from_secs_f64(1.0 / per_sec as f64);
        let now = Instant::now();
        if let Some(last) = *last_fetch {
            let next = last + spacing;
            if next > now {
                tokio::time::sleep(next - now).await;
            }
        }
        *last_fetch = Some(Instant::now());
    }

    /// The blob repository this source serves content from.
    pub fn blob_repo(&self, poll_interval: Duration) -> BlobRepo {
        BlobRepo {
            address: self.config.blob_url.clone(),
            poll_interval,
        }
    }
}
