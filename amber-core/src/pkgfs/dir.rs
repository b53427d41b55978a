use std::path::{Path, PathBuf};

use amber_model::{AmberError, ContentHash, Result};
use async_trait::async_trait;
use tracing::debug;

use super::PackageFs;
use crate::tuf::store::write_atomic;

/// Package filesystem over a plain directory tree:
///
/// - `install/<hash>`: exclusive-create claims for in-flight writes
/// - `blobs/<hash>`: the content-addressed blob area
/// - `needs/<hash>`: blob requests published by the filesystem
/// - `active/<hash>`: artifacts made visible; watched for the activation feed
#[derive(Debug, Clone)]
pub struct DirPackageFs {
    root: PathBuf,
}

impl DirPackageFs {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["install", "blobs", "needs", "active"] {
            std::fs::create_dir_all(root.join(sub)).map_err(|e| {
                AmberError::io(format!(
                    "cannot create pkgfs dir {}/{sub}: {e}",
                    root.display()
                ))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_dir(&self) -> PathBuf {
        self.root.join("active")
    }

    fn install_path(&self, hash: ContentHash) -> PathBuf {
        self.root.join("install").join(hash.to_string())
    }

    fn blob_path(&self, hash: ContentHash) -> PathBuf {
        self.root.join("blobs").join(hash.to_string())
    }
}

#[async_trait]
impl PackageFs for DirPackageFs {
    async fn create_install(&self, hash: ContentHash) -> Result<()> {
        if self.root.join("active").join(hash.to_string()).is_file() {
            return Err(AmberError::conflict(format!(
                "artifact {hash} is already active"
            )));
        }
        let path = self.install_path(hash);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {
                debug!(%hash, "claimed install entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AmberError::conflict(format!(
                    "install entry for {hash} already exists"
                )))
            }
            Err(e) => Err(AmberError::io(format!(
                "cannot create {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_install(
        &self,
        hash: ContentHash,
        bytes: &[u8],
    ) -> Result<()> {
        let path = self.install_path(hash);
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            AmberError::io(format!("cannot write {}: {e}", path.display()))
        })
    }

    async fn write_blob(&self, hash: ContentHash, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(hash);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        let dir = self.root.join("blobs");
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            write_atomic(&dir, &path, &bytes)
        })
        .await
        .map_err(|e| AmberError::io(format!("blob write task failed: {e}")))??;
        // Satisfied needs are retired so the fetcher stops seeing them.
        let need = self.root.join("needs").join(hash.to_string());
        let _ = tokio::fs::remove_file(need).await;
        Ok(())
    }

    async fn has_blob(&self, hash: ContentHash) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(hash))
            .await
            .unwrap_or(false))
    }

    async fn needed_blobs(&self) -> Result<Vec<ContentHash>> {
        let needs_dir = self.root.join("needs");
        let mut out = Vec::new();
        let mut entries =
            tokio::fs::read_dir(&needs_dir).await.map_err(|e| {
                AmberError::io(format!(
                    "cannot read {}: {e}",
                    needs_dir.display()
                ))
            })?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str()
                && let Ok(hash) = name.parse::<ContentHash>()
            {
                out.push(hash);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_model::ErrorKind;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_bytes([byte; 64])
    }

    #[tokio::test]
    async fn create_install_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirPackageFs::open(dir.path()).unwrap();
        fs.create_install(hash(1)).await.unwrap();
        let err = fs.create_install(hash(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn active_artifact_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirPackageFs::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("active").join(hash(2).to_string()),
            b"",
        )
        .unwrap();
        let err = fs.create_install(hash(2)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn blob_writes_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirPackageFs::open(dir.path()).unwrap();
        fs.write_blob(hash(3), b"payload").await.unwrap();
        fs.write_blob(hash(3), b"payload").await.unwrap();
        assert!(fs.has_blob(hash(3)).await.unwrap());
    }

    #[tokio::test]
    async fn needs_scan_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirPackageFs::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("needs").join(hash(4).to_string()),
            b"",
        )
        .unwrap();
        std::fs::write(dir.path().join("needs").join("not-a-hash"), b"")
            .unwrap();
        let needs = fs.needed_blobs().await.unwrap();
        assert_eq!(needs, vec![hash(4)]);
    }

    #[tokio::test]
    async fn satisfied_need_is_retired() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirPackageFs::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("needs").join(hash(5).to_string()),
            b"",
        )
        .unwrap();
        fs.write_blob(hash(5), b"bytes").await.unwrap();
        assert!(fs.needed_blobs().await.unwrap().is_empty());
    }
}
