use std::collections::BTreeMap;

use amber_model::{AmberError, KeyConfig, Result};
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::keys::root_keys_from_config;
use super::metadata::{
    check_expiry, parse_payload, Envelope, Role, RootPayload,
    SnapshotPayload, TargetEntry, TargetsPayload, TimestampPayload,
};
use super::store::{InitState, LocalStore};
use amber_model::error::Backoff;

/// Transport for role documents. The HTTP implementation is the production
/// path; tests substitute an in-memory repository.
#[async_trait]
pub trait MetadataRemote: Send + Sync {
    async fn fetch_role(&self, role: Role) -> Result<Vec<u8>>;
}

/// Fetches `<repo_url>/<role>.json` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataRemote {
    base: Url,
    http: reqwest::Client,
}

impl HttpMetadataRemote {
    pub fn new(base: Url, http: reqwest::Client) -> Self {
        Self { base, http }
    }

    fn role_url(&self, role: Role) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AmberError::invalid_config(format!(
                    "repo url {} cannot carry paths",
                    self.base
                ))
            })?
            .pop_if_empty()
            .push(role.file_name());
        Ok(url)
    }
}

#[async_trait]
impl MetadataRemote for HttpMetadataRemote {
    async fn fetch_role(&self, role: Role) -> Result<Vec<u8>> {
        let url = self.role_url(role)?;
        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            AmberError::network(format!("fetch {url}: {e}"))
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AmberError::not_found(format!("{url} not found")));
        }
        if !response.status().is_success() {
            return Err(AmberError::network(format!(
                "fetch {url}: HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(|e| {
            AmberError::network(format!("read {url}: {e}"))
        })?;
        Ok(bytes.to_vec())
    }
}

/// The trusted root and the verified, current view of the repository.
struct TrustedRoot {
    payload: RootPayload,
    keys: BTreeMap<String, VerifyingKey>,
}

/// Signed-metadata client for one source.
///
/// Holds the local document store, the transport, and the in-memory trusted
/// state. `refresh` walks timestamp -> snapshot -> targets and persists each
/// verified document; on any error the previously trusted state is kept
/// untouched.
pub struct MetadataClient {
    store: LocalStore,
    remote: std::sync::Arc<dyn MetadataRemote>,
    trusted: Option<TrustedRoot>,
    timestamp: Option<TimestampPayload>,
    snapshot: Option<SnapshotPayload>,
    targets: Option<TargetsPayload>,
}

impl std::fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataClient")
            .field("store", &self.store.path())
            .field("trusted", &self.trusted.is_some())
            .finish()
    }
}

impl MetadataClient {
    pub fn new(
        store: LocalStore,
        remote: std::sync::Arc<dyn MetadataRemote>,
    ) -> Self {
        Self {
            store,
            remote,
            trusted: None,
            timestamp: None,
            snapshot: None,
            targets: None,
        }
    }

    /// Loads the persisted root of trust, if any.
    pub fn init(&mut self) -> Result<InitState> {
        match self.store.init_state() {
            InitState::NeedsInit => Ok(InitState::NeedsInit),
            InitState::Ready => {
                let envelope = self
                    .store
                    .read_role(Role::Root)?
                    .ok_or_else(|| {
                        AmberError::io("root document vanished during init")
                    })?;
                self.adopt_root(&envelope, None)?;
                // Cached downstream documents are best-effort; refresh
                // replaces them.
                if let Ok(Some(envelope)) = self.store.read_role(Role::Targets)
                    && let Ok(targets) = self.verify_targets(&envelope)
                {
                    self.targets = Some(targets);
                }
                Ok(InitState::Ready)
            }
        }
    }

    /// Installs the root of trust from the remote, anchored in the
    /// configured keys.
    ///
    /// Retries forever on transient network failure with exponential
    /// backoff; a signature failure surfaces immediately so the caller can
    /// refuse to enable the source.
    pub async fn install_roots(
        &mut self,
        configured: &[KeyConfig],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut backoff = Backoff::new();
        loop {
            match self.install_roots_once(configured).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        delay_secs = delay.as_secs(),
                        "root install failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(AmberError::cancelled(
                                "root install cancelled",
                            ));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn install_roots_once(
        &mut self,
        configured: &[KeyConfig],
    ) -> Result<()> {
        let anchor = root_keys_from_config(configured)?;
        let raw = self.remote.fetch_role(Role::Root).await?;
        let envelope = Envelope::parse(&raw)?;
        let payload: RootPayload = parse_payload(&envelope, Role::Root)?;

        // The fetched root must be signed by a threshold of the configured
        // anchor keys and by its own declared root role.
        let anchor_role = super::metadata::RoleKeys {
            keyids: anchor.keys().cloned().collect(),
            threshold: 1,
        };
        envelope.verify(&anchor, &anchor_role)?;
        let own_keys = payload.verifying_keys();
        envelope.verify(&own_keys, payload.role(Role::Root)?)?;

        self.store.write_role(Role::Root, &envelope)?;
        self.trusted = Some(TrustedRoot {
            keys: own_keys,
            payload,
        });
        info!("root of trust installed");
        Ok(())
    }

    fn adopt_root(
        &mut self,
        envelope: &Envelope,
        previous: Option<&TrustedRoot>,
    ) -> Result<()> {
        let payload: RootPayload = parse_payload(envelope, Role::Root)?;
        if let Some(previous) = previous {
            if payload.version < previous.payload.version {
                return Err(AmberError::signature(format!(
                    "root version rollback: {} < {}",
                    payload.version, previous.payload.version
                )));
            }
            envelope.verify(
                &previous.keys,
                previous.payload.role(Role::Root)?,
            )?;
        }
        let own_keys = payload.verifying_keys();
        envelope.verify(&own_keys, payload.role(Role::Root)?)?;
        self.trusted = Some(TrustedRoot {
            keys: own_keys,
            payload,
        });
        Ok(())
    }

    fn trusted(&self) -> Result<&TrustedRoot> {
        self.trusted.as_ref().ok_or_else(|| {
            AmberError::signature("no root of trust installed")
        })
    }

    /// Refreshes the metadata chain. Idempotent; on error no externally
    /// visible state changes.
    pub async fn refresh(&mut self) -> Result<()> {
        self.refresh_root().await?;

        let timestamp = self.fetch_timestamp().await?;
        let snapshot = self.fetch_snapshot(&timestamp).await?;
        let targets = self.fetch_targets(&snapshot).await?;

        self.timestamp = Some(timestamp);
        self.snapshot = Some(snapshot);
        self.targets = Some(targets);
        debug!("metadata refresh complete");
        Ok(())
    }

    async fn refresh_root(&mut self) -> Result<()> {
        let raw = match self.remote.fetch_role(Role::Root).await {
            Ok(raw) => raw,
            // A repository that never rotates its root serves no updated
            // document; keep the persisted one.
            Err(e) if e.kind == amber_model::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let envelope = Envelope::parse(&raw)?;
        let payload: RootPayload = parse_payload(&envelope, Role::Root)?;
        if payload.version <= self.trusted()?.payload.version {
            return Ok(());
        }
        let previous = self.trusted.take();
        if let Err(e) = self.adopt_root(&envelope, previous.as_ref()) {
            self.trusted = previous;
            return Err(e);
        }
        self.store.write_role(Role::Root, &envelope)?;
        info!(version = payload.version, "root rotated");
        Ok(())
    }

    async fn fetch_timestamp(&self) -> Result<TimestampPayload> {
        let trusted = self.trusted()?;
        let raw = self.remote.fetch_role(Role::Timestamp).await?;
        let envelope = Envelope::parse(&raw)?;
        envelope
            .verify(&trusted.keys, trusted.payload.role(Role::Timestamp)?)?;
        let payload: TimestampPayload =
            parse_payload(&envelope, Role::Timestamp)?;
        check_expiry(payload.expires, Role::Timestamp)?;
        if let Some(current) = &self.timestamp
            && payload.version < current.version
        {
            return Err(AmberError::signature(format!(
                "timestamp version rollback: {} < {}",
                payload.version, current.version
            )));
        }
        self.store.write_role(Role::Timestamp, &envelope)?;
        Ok(payload)
    }

    async fn fetch_snapshot(
        &self,
        timestamp: &TimestampPayload,
    ) -> Result<SnapshotPayload> {
        let trusted = self.trusted()?;
        let raw = self.remote.fetch_role(Role::Snapshot).await?;
        let envelope = Envelope::parse(&raw)?;
        envelope
            .verify(&trusted.keys, trusted.payload.role(Role::Snapshot)?)?;
        let payload: SnapshotPayload =
            parse_payload(&envelope, Role::Snapshot)?;
        check_expiry(payload.expires, Role::Snapshot)?;
        let expected = timestamp
            .meta
            .get(Role::Snapshot.file_name())
            .map(|m| m.version);
        if let Some(expected) = expected
            && payload.version != expected
        {
            return Err(AmberError::signature(format!(
                "snapshot version {} does not match timestamp ({expected})",
                payload.version
            )));
        }
        self.store.write_role(Role::Snapshot, &envelope)?;
        Ok(payload)
    }

    async fn fetch_targets(
        &self,
        snapshot: &SnapshotPayload,
    ) -> Result<TargetsPayload> {
        let raw = self.remote.fetch_role(Role::Targets).await?;
        let envelope = Envelope::parse(&raw)?;
        let payload = self.verify_targets(&envelope)?;
        let expected = snapshot
            .meta
            .get(Role::Targets.file_name())
            .map(|m| m.version);
        if let Some(expected) = expected
            && payload.version != expected
        {
            return Err(AmberError::signature(format!(
                "targets version {} does not match snapshot ({expected})",
                payload.version
            )));
        }
        self.store.write_role(Role::Targets, &envelope)?;
        Ok(payload)
    }

    fn verify_targets(&self, envelope: &Envelope) -> Result<TargetsPayload> {
        let trusted = self.trusted()?;
        envelope
            .verify(&trusted.keys, trusted.payload.role(Role::Targets)?)?;
        let payload: TargetsPayload =
            parse_payload(envelope, Role::Targets)?;
        check_expiry(payload.expires, Role::Targets)?;
        Ok(payload)
    }

    /// Looks up a target by its exact metadata name.
    pub fn target(&self, name: &str) -> Option<&TargetEntry> {
        self.targets
            .as_ref()
            .and_then(|targets| targets.targets.get(name))
    }

    /// Names of all currently published targets.
    pub fn target_names(&self) -> Vec<String> {
        self.targets
            .as_ref()
            .map(|targets| targets.targets.keys().cloned().collect())
            .unwrap_or_default()
    }
}
