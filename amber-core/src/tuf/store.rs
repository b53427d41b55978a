use std::path::{Path, PathBuf};

use amber_model::{AmberError, Result};
use tracing::debug;

use super::metadata::{Envelope, Role};

/// Whether a persisted root of trust exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Ready,
    NeedsInit,
}

/// Persisted copies of the four role documents for one source.
///
/// All writes are atomic (temp file in the same directory, then rename) so a
/// crash mid-update leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Opens the store rooted at `dir`, creating the directory on first use.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AmberError::io(format!(
                "cannot create metadata store {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Reports whether a trusted root document is already persisted.
    pub fn init_state(&self) -> InitState {
        if self.dir.join(Role::Root.file_name()).is_file() {
            InitState::Ready
        } else {
            InitState::NeedsInit
        }
    }

    pub fn read_role(&self, role: Role) -> Result<Option<Envelope>> {
        let path = self.dir.join(role.file_name());
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => {
                return Err(AmberError::io(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        Envelope::parse(&raw).map(Some)
    }

    pub fn write_role(&self, role: Role, envelope: &Envelope) -> Result<()> {
        let path = self.dir.join(role.file_name());
        let bytes = serde_json::to_vec_pretty(envelope).map_err(|e| {
            AmberError::io(format!("cannot serialize {}: {e}", role.file_name()))
        })?;
        write_atomic(&self.dir, &path, &bytes)?;
        debug!(role = role.type_name(), path = %path.display(), "persisted metadata");
        Ok(())
    }
}

/// Temp-file-plus-rename in the target directory, so the rename never
/// crosses a filesystem boundary.
pub(crate) fn write_atomic(
    dir: &Path,
    path: &Path,
    bytes: &[u8],
) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        AmberError::io(format!(
            "cannot create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    std::io::Write::write_all(&mut tmp, bytes).map_err(|e| {
        AmberError::io(format!("cannot write temp file: {e}"))
    })?;
    tmp.persist(path).map_err(|e| {
        AmberError::io(format!("cannot persist {}: {e}", path.display()))
    })?;
    Ok(())
}
