use std::path::{Path, PathBuf};
use std::sync::Arc;

use amber_model::{
    AmberError, ContentHash, ErrorKind, Result, SourceConfig,
};
use tracing::{debug, info, warn};

use super::Source;
use crate::fetch::GetResult;
use crate::tuf::store::write_atomic;

/// Constructs a [`Source`] from its persisted config. The default builder
/// wires HTTP transports; tests substitute in-memory ones.
pub type SourceBuilder =
    Arc<dyn Fn(SourceConfig, &Path) -> Result<Source> + Send + Sync>;

pub fn http_source_builder(http: reqwest::Client) -> SourceBuilder {
    Arc::new(move |config, store_root| {
        Source::open(config, store_root, http.clone())
    })
}

const INIT_MARKER: &str = ".initialized";

/// The ordered collection of live sources.
///
/// Owns the persisted `sources/<id>/config.json` records; every mutation of
/// that directory happens under the internal lock. Resolution walks enabled
/// sources in insertion order; persisted configs are loaded in sorted-id
/// order on startup, which fixes the order across restarts.
pub struct SourceSet {
    store_root: PathBuf,
    builder: SourceBuilder,
    inner: tokio::sync::Mutex<Vec<Arc<Source>>>,
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet")
            .field("store_root", &self.store_root)
            .finish()
    }
}

impl SourceSet {
    /// Opens the set, loading every persisted config under
    /// `<store_root>/sources/`.
    pub async fn open(
        store_root: impl Into<PathBuf>,
        builder: SourceBuilder,
    ) -> Result<Self> {
        let store_root = store_root.into();
        std::fs::create_dir_all(store_root.join("sources")).map_err(|e| {
            AmberError::io(format!("cannot create sources dir: {e}"))
        })?;
        let set = Self {
            store_root,
            builder,
            inner: tokio::sync::Mutex::new(Vec::new()),
        };
        set.load_persisted().await?;
        Ok(set)
    }

    async fn load_persisted(&self) -> Result<()> {
        let sources_dir = self.store_root.join("sources");
        let mut ids: Vec<String> = Vec::new();
        let entries = std::fs::read_dir(&sources_dir).map_err(|e| {
            AmberError::io(format!(
                "cannot read {}: {e}",
                sources_dir.display()
            ))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join("config.json").is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str())
                {
                    ids.push(name.to_owned());
                }
            }
        }
        ids.sort();

        let mut inner = self.inner.lock().await;
        for id in ids {
            let path = sources_dir.join(&id).join("config.json");
            let config = match read_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(source = %id, error = %e, "skipping unreadable source config");
                    continue;
                }
            };
            match (self.builder)(config, &self.store_root) {
                Ok(source) => {
                    let source = Arc::new(source);
                    spawn_background_init(&source);
                    inner.push(source);
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "skipping unbuildable source");
                }
            }
        }
        info!(count = inner.len(), "loaded persisted sources");
        Ok(())
    }

    /// Imports default configs on first boot. The marker file makes the
    /// import idempotent: once it exists the directory is never consulted
    /// again.
    pub async fn import_defaults(&self, default_dir: &Path) -> Result<()> {
        let marker = self.store_root.join("sources").join(INIT_MARKER);
        if marker.is_file() {
            return Ok(());
        }
        if default_dir.is_dir() {
            let mut paths: Vec<PathBuf> = Vec::new();
            let entries = std::fs::read_dir(default_dir).map_err(|e| {
                AmberError::io(format!(
                    "cannot read default config dir {}: {e}",
                    default_dir.display()
                ))
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    paths.push(path);
                } else if path.is_dir() && path.join("config.json").is_file()
                {
                    paths.push(path.join("config.json"));
                }
            }
            paths.sort();
            for path in paths {
                let config = read_config(&path)?;
                match self.add_source(config).await {
                    Ok(())
                    | Err(AmberError {
                        kind: ErrorKind::DuplicateId,
                        ..
                    }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        write_atomic(
            &self.store_root.join("sources"),
            &marker,
            b"",
        )?;
        info!("default source configs imported");
        Ok(())
    }

    /// Persists the config atomically, then constructs the live source.
    pub async fn add_source(&self, config: SourceConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.lock().await;
        if inner.iter().any(|s| s.id() == config.id) {
            return Err(AmberError::duplicate_id(format!(
                "source {:?} already exists",
                config.id
            )));
        }

        let mut config = config;
        if config.auto_enable_on_add {
            config.status.enabled = true;
        }

        let dir = self.store_root.join("sources").join(&config.id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            AmberError::io(format!("cannot create {}: {e}", dir.display()))
        })?;
        let bytes = serde_json::to_vec_pretty(&config).map_err(|e| {
            AmberError::io(format!("cannot serialize source config: {e}"))
        })?;
        write_atomic(&dir, &dir.join("config.json"), &bytes)?;

        let source = Arc::new((self.builder)(config, &self.store_root)?);
        spawn_background_init(&source);
        info!(source = %source.id(), "source added");
        inner.push(source);
        Ok(())
    }

    /// Deletes the persisted config and tears down the live source.
    pub async fn remove_source(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let index = inner
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| {
                AmberError::not_found(format!("source {id:?} not found"))
            })?;
        let source = inner.remove(index);
        source.teardown();
        let dir = self.store_root.join("sources").join(id);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!(source = %id, error = %e, "could not delete source dir");
        }
        info!(source = %id, "source removed");
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let inner = self.inner.lock().await;
        let source = inner
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| {
                AmberError::not_found(format!("source {id:?} not found"))
            })?;
        source.set_enabled(enabled);

        let mut config = source.config().clone();
        config.status.enabled = enabled;
        let dir = self.store_root.join("sources").join(id);
        let bytes = serde_json::to_vec_pretty(&config).map_err(|e| {
            AmberError::io(format!("cannot serialize source config: {e}"))
        })?;
        write_atomic(&dir, &dir.join("config.json"), &bytes)?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<SourceConfig> {
        let inner = self.inner.lock().await;
        inner
            .iter()
            .map(|source| {
                let mut config = source.config().clone();
                config.status.enabled = source.is_enabled();
                config
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Source>> {
        let inner = self.inner.lock().await;
        inner.iter().find(|s| s.id() == id).cloned()
    }

    async fn enabled_sources(&self) -> Vec<Arc<Source>> {
        let inner = self.inner.lock().await;
        inner.iter().filter(|s| s.is_enabled()).cloned().collect()
    }

    /// Resolves a package across enabled sources in insertion order. The
    /// first successful lookup wins; individual source errors do not
    /// short-circuit the search. On exhaustion a signature failure seen
    /// along the way outranks plain not-found.
    pub async fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<GetResult> {
        let sources = self.enabled_sources().await;
        let mut signature_error: Option<AmberError> = None;
        for source in sources {
            match source.lookup(name, version).await {
                Ok(update) => {
                    return Ok(GetResult {
                        update,
                        error: None,
                        source: Some(source),
                    });
                }
                Err(e) => {
                    debug!(
                        source = %source.id(),
                        error = %e,
                        "lookup failed, trying next source"
                    );
                    if e.kind == ErrorKind::Signature
                        && signature_error.is_none()
                    {
                        signature_error = Some(e);
                    }
                }
            }
        }
        Err(signature_error.unwrap_or_else(|| {
            AmberError::not_found(format!(
                "package {name:?} not found in any enabled source"
            ))
        }))
    }

    /// [`SourceSet::resolve`] with a resolution cache in front. Only
    /// unpinned lookups are cached; the cache key carries no version.
    pub async fn resolve_cached(
        &self,
        name: &str,
        version: Option<&str>,
        cache: &crate::cache::ResolutionCache,
    ) -> Result<GetResult> {
        let unpinned = version.is_none_or(|v| v.is_empty());
        if unpinned {
            let canonical = name.strip_prefix('/').unwrap_or(name);
            for source in self.enabled_sources().await {
                if let Some(hash) = cache.get(source.id(), canonical)
                    && let Ok(update) =
                        amber_model::Package::new(canonical, "0", hash)
                {
                    debug!(package = canonical, "resolution served from cache");
                    return Ok(GetResult {
                        update,
                        error: None,
                        source: Some(source),
                    });
                }
            }
        }
        let result = self.resolve(name, version).await?;
        if unpinned && let Some(source) = &result.source {
            cache.put(
                source.id(),
                result.update.name(),
                result.update.content_hash(),
            );
        }
        Ok(result)
    }

    /// Fetches and verifies a blob from the first enabled source that has
    /// it. Each attempt gets a fresh buffer, so a partial download from one
    /// source never leaks into another's.
    pub async fn fetch_blob(&self, hash: ContentHash) -> Result<Vec<u8>> {
        let sources = self.enabled_sources().await;
        let mut last_error: Option<AmberError> = None;
        for source in sources {
            let mut buffer = Vec::new();
            match source.fetch_blob(hash, &mut buffer).await {
                Ok(()) => return Ok(buffer),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AmberError::not_found(format!("blob {hash} not found"))
        }))
    }

    /// The blob repositories currently tracked, one per source.
    pub async fn blob_repos(
        &self,
        poll_interval: std::time::Duration,
    ) -> Vec<amber_model::BlobRepo> {
        let inner = self.inner.lock().await;
        inner
            .iter()
            .map(|source| source.blob_repo(poll_interval))
            .collect()
    }

    /// Tears down every source; used on shutdown.
    pub async fn teardown(&self) {
        let inner = self.inner.lock().await;
        for source in inner.iter() {
            source.teardown();
        }
    }
}

fn read_config(path: &Path) -> Result<SourceConfig> {
    let raw = std::fs::read(path).map_err(|e| {
        AmberError::io(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: SourceConfig =
        serde_json::from_slice(&raw).map_err(|e| {
            AmberError::invalid_config(format!(
                "malformed source config {}: {e}",
                path.display()
            ))
        })?;
    config.validate()?;
    Ok(config)
}

fn spawn_background_init(source: &Arc<Source>) {
    if tokio::runtime::Handle::try_current().is_err() {
        return;
    }
    let source = Arc::clone(source);
    tokio::spawn(async move {
        match source.ensure_initialized().await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Cancelled => {
                debug!(source = %source.id(), "source initialization cancelled");
            }
            Err(e) => {
                warn!(source = %source.id(), error = %e, "source initialization failed");
            }
        }
    });
}
