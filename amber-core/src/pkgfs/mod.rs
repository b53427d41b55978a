//! The seam to the package filesystem.
//!
//! The package filesystem is the one externally shared mutable resource in
//! the engine. Writes go through exactly two doors: install creates (owned
//! by the activation monitor) and content-addressed blob writes (owned by
//! the blob fetcher). Activations flow back on a feed the watcher translates
//! into a channel of content hashes.

pub mod dir;
pub mod watcher;

pub use dir::DirPackageFs;
pub use watcher::ActivationWatcher;

use amber_model::{ContentHash, Result};
use async_trait::async_trait;

/// Operations the engine needs from the package filesystem.
///
/// `create_install` has exclusive-create semantics: success means this
/// process owns the write for that artifact; a `Conflict` error means
/// another writer is in progress or the artifact is already installed. Blob
/// writes are idempotent.
#[async_trait]
pub trait PackageFs: Send + Sync {
    async fn create_install(&self, hash: ContentHash) -> Result<()>;

    /// Writes the meta-artifact bytes into an install entry previously
    /// claimed with `create_install`.
    async fn write_install(
        &self,
        hash: ContentHash,
        bytes: &[u8],
    ) -> Result<()>;

    async fn write_blob(&self, hash: ContentHash, bytes: &[u8]) -> Result<()>;

    async fn has_blob(&self, hash: ContentHash) -> Result<bool>;

    /// Content hashes the filesystem is currently requesting (its "needs"
    /// directory).
    async fn needed_blobs(&self) -> Result<Vec<ContentHash>>;
}
