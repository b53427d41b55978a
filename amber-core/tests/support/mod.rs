//! Shared fixtures: an in-memory package filesystem with scripted conflict
//! behavior and an in-memory signed repository.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use amber_core::fetch::GetResult;
use amber_core::pkgfs::PackageFs;
use amber_core::source::{BlobRemote, ByteStream, Source};
use amber_core::tuf::{key_id, Role, MetadataRemote};
use amber_model::{
    AmberError, ContentHash, KeyConfig, KeyType, Package, Result,
    SourceConfig,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;

/// A content hash whose hex form is `byte` repeated.
pub fn hash_of(byte: u8) -> ContentHash {
    ContentHash::from_bytes([byte; 64])
}

pub fn package(name: &str, hash: ContentHash) -> Package {
    Package::new(name, "0", hash).unwrap()
}

pub fn get_result(name: &str, hash: ContentHash) -> GetResult {
    GetResult::new(package(name, hash), None)
}

/// In-memory package filesystem. Tracks create calls per hash so tests can
/// assert the at-most-one-write invariant.
#[derive(Debug, Default)]
pub struct MemPackageFs {
    state: Mutex<MemPkgfsState>,
}

#[derive(Debug, Default)]
struct MemPkgfsState {
    claimed: HashSet<ContentHash>,
    active: HashSet<ContentHash>,
    blobs: HashMap<ContentHash, Vec<u8>>,
    needs: HashSet<ContentHash>,
    create_calls: HashMap<ContentHash, usize>,
}

impl MemPackageFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks an artifact as already on disk, so creates conflict.
    pub fn preinstall(&self, hash: ContentHash) {
        self.state.lock().unwrap().active.insert(hash);
    }

    pub fn add_need(&self, hash: ContentHash) {
        self.state.lock().unwrap().needs.insert(hash);
    }

    pub fn create_calls(&self, hash: ContentHash) -> usize {
        self.state
            .lock()
            .unwrap()
            .create_calls
            .get(&hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn blob(&self, hash: ContentHash) -> Option<Vec<u8>> {
        self.state.lock().unwrap().blobs.get(&hash).cloned()
    }
}

#[async_trait]
impl PackageFs for MemPackageFs {
    async fn create_install(&self, hash: ContentHash) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.create_calls.entry(hash).or_insert(0) += 1;
        if state.active.contains(&hash) || !state.claimed.insert(hash) {
            return Err(AmberError::conflict(format!(
                "install entry for {hash} already exists"
            )));
        }
        Ok(())
    }

    async fn write_install(
        &self,
        _hash: ContentHash,
        _bytes: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    async fn write_blob(&self, hash: ContentHash, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.blobs.insert(hash, bytes.to_vec());
        state.needs.remove(&hash);
        Ok(())
    }

    async fn has_blob(&self, hash: ContentHash) -> Result<bool> {
        Ok(self.state.lock().unwrap().blobs.contains_key(&hash))
    }

    async fn needed_blobs(&self) -> Result<Vec<ContentHash>> {
        Ok(self.state.lock().unwrap().needs.iter().copied().collect())
    }
}

/// An in-memory signed repository: one ed25519 key for every role, plus the
/// target map and blob store the tests mutate.
pub struct TestRepo {
    signing: SigningKey,
    /// When set, documents are signed with a throwaway key so verification
    /// fails.
    pub tampered: bool,
    pub version: u64,
    pub targets: BTreeMap<String, ContentHash>,
    pub blobs: HashMap<ContentHash, Vec<u8>>,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            signing: SigningKey::from_bytes(&rand::random::<[u8; 32]>()),
            tampered: false,
            version: 1,
            targets: BTreeMap::new(),
            blobs: HashMap::new(),
        }
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    pub fn keyid(&self) -> String {
        key_id(&self.public_hex())
    }

    pub fn key_config(&self) -> KeyConfig {
        KeyConfig {
            key_type: KeyType::Ed25519,
            public: self.public_hex(),
        }
    }

    /// Adds a target and stages its blob.
    pub fn publish(&mut self, name: &str, blob: &[u8]) -> ContentHash {
        let hash = self.stage_blob(blob);
        self.targets.insert(name.to_owned(), hash);
        hash
    }

    /// Stages a blob without publishing a target for it.
    pub fn stage_blob(&mut self, blob: &[u8]) -> ContentHash {
        use sha2::Digest;
        let digest = sha2::Sha512::digest(blob);
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&digest);
        let hash = ContentHash::from_bytes(raw);
        self.blobs.insert(hash, blob.to_vec());
        hash
    }

    /// Publishes a package whose meta-artifact references the given blobs.
    pub fn publish_package(
        &mut self,
        name: &str,
        blobs: &[&[u8]],
    ) -> (ContentHash, Vec<ContentHash>) {
        let blob_hashes: Vec<ContentHash> =
            blobs.iter().map(|blob| self.stage_blob(blob)).collect();
        let entries: std::collections::BTreeMap<String, ContentHash> =
            blob_hashes
                .iter()
                .enumerate()
                .map(|(i, hash)| (format!("bin/{i}"), *hash))
                .collect();
        let meta = amber_core::fetch::MetaContents::from_entries(entries)
            .encode()
            .unwrap();
        // Published under the conventional "0" variant, the form unpinned
        // lookups fall back to.
        let meta_hash = self.publish(&format!("{name}/0"), &meta);
        (meta_hash, blob_hashes)
    }

    fn payload(&self, role: Role) -> serde_json::Value {
        let expires = (Utc::now() + Duration::days(30)).to_rfc3339();
        match role {
            Role::Root => json!({
                "_type": "root",
                "version": self.version,
                "expires": expires,
                "keys": {
                    (self.keyid()): {
                        "keytype": "ed25519",
                        "public": self.public_hex(),
                    }
                },
                "roles": {
                    "root": {"keyids": [self.keyid()], "threshold": 1},
                    "timestamp": {"keyids": [self.keyid()], "threshold": 1},
                    "snapshot": {"keyids": [self.keyid()], "threshold": 1},
                    "targets": {"keyids": [self.keyid()], "threshold": 1},
                },
            }),
            Role::Timestamp => json!({
                "_type": "timestamp",
                "version": self.version,
                "expires": expires,
                "meta": {"snapshot.json": {"version": self.version}},
            }),
            Role::Snapshot => json!({
                "_type": "snapshot",
                "version": self.version,
                "expires": expires,
                "meta": {"targets.json": {"version": self.version}},
            }),
            Role::Targets => {
                let targets: serde_json::Map<String, serde_json::Value> =
                    self.targets
                        .iter()
                        .map(|(name, hash)| {
                            (
                                name.clone(),
                                json!({"custom": {"merkle": hash.to_string()}}),
                            )
                        })
                        .collect();
                json!({
                    "_type": "targets",
                    "version": self.version,
                    "expires": expires,
                    "targets": targets,
                })
            }
        }
    }

    pub fn document(&self, role: Role) -> Vec<u8> {
        let payload = self.payload(role);
        let message = serde_json::to_vec(&payload).unwrap();
        let signer = if self.tampered {
            SigningKey::from_bytes(&rand::random::<[u8; 32]>())
        } else {
            self.signing.clone()
        };
        let envelope = json!({
            "signatures": [{
                "keyid": self.keyid(),
                "sig": hex::encode(signer.sign(&message).to_bytes()),
            }],
            "signed": payload,
        });
        serde_json::to_vec(&envelope).unwrap()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct MemRemote {
    pub repo: Arc<Mutex<TestRepo>>,
}

impl MemRemote {
    pub fn new(repo: TestRepo) -> Self {
        Self {
            repo: Arc::new(Mutex::new(repo)),
        }
    }
}

#[async_trait]
impl MetadataRemote for MemRemote {
    async fn fetch_role(&self, role: Role) -> Result<Vec<u8>> {
        Ok(self.repo.lock().unwrap().document(role))
    }
}

#[async_trait]
impl BlobRemote for MemRemote {
    async fn open(&self, hash: ContentHash) -> Result<ByteStream> {
        let blob = self
            .repo
            .lock()
            .unwrap()
            .blobs
            .get(&hash)
            .cloned()
            .ok_or_else(|| {
                AmberError::not_found(format!("blob {hash} not found"))
            })?;
        Ok(Box::pin(futures::stream::once(async move { Ok(blob) })))
    }
}

pub fn source_config(id: &str, repo: &TestRepo) -> SourceConfig {
    SourceConfig {
        id: id.to_owned(),
        repo_url: "http://repo.test/repo".parse().unwrap(),
        blob_url: "http://repo.test/repo".parse().unwrap(),
        root_keys: vec![repo.key_config()],
        status: amber_model::SourceStatus { enabled: true },
        rate_limit_per_sec: None,
        auto_enable_on_add: true,
    }
}

/// Builds a live source over in-memory transports.
pub fn mem_source(
    config: SourceConfig,
    store_root: &std::path::Path,
    remote: MemRemote,
) -> Source {
    Source::with_remotes(
        config,
        store_root,
        Arc::new(remote.clone()),
        Arc::new(remote),
    )
    .unwrap()
}

/// A source-set builder that serves every source from the same in-memory
/// repository.
pub fn mem_source_builder(
    remote: MemRemote,
) -> amber_core::source::SourceBuilder {
    Arc::new(move |config, store_root| {
        Ok(mem_source(config, store_root, remote.clone()))
    })
}
