use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AmberError, Result};
use crate::hash::ContentHash;

/// A named, versioned artifact identified collectively by its content hash.
///
/// Two packages are equal iff their content hashes are equal; name and
/// version are lookup identity only (see [`PackageKey`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    name: String,
    version: String,
    content_hash: ContentHash,
}

impl Package {
    /// Constructs a package, canonicalizing the name by stripping one
    /// leading `/`. An empty name is rejected.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        content_hash: ContentHash,
    ) -> Result<Self> {
        let name = canonical_name(&name.into());
        if name.is_empty() {
            return Err(AmberError::invalid_config(
                "package name must not be empty",
            ));
        }
        Ok(Self {
            name,
            version: version.into(),
            content_hash,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn key(&self) -> PackageKey {
        PackageKey {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content_hash.hash(state);
    }
}

/// Lookup identity for a package: `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageKey {
    pub name: String,
    pub version: String,
}

impl PackageKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: canonical_name(&name.into()),
            version: version.into(),
        }
    }
}

fn canonical_name(name: &str) -> String {
    name.strip_prefix('/').unwrap_or(name).to_owned()
}

#[derive(Clone)]
struct Tracked {
    package: Package,
    /// Optional version pin; when set, resolve requests without an explicit
    /// version use this one.
    pin: Option<String>,
    order: u64,
}

/// The set of packages the daemon is monitoring.
///
/// Concurrent: the update loop snapshots it while RPC handlers mutate it.
/// Iteration follows insertion order for diagnostics only; nothing in the
/// engine may depend on that order.
#[derive(Default)]
pub struct PackageSet {
    entries: DashMap<PackageKey, Tracked>,
    next_order: AtomicU64,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the package under its `(name, version)` key.
    pub fn add(&self, package: Package) {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            package.key(),
            Tracked {
                package,
                pin: None,
                order,
            },
        );
    }

    pub fn remove(&self, key: &PackageKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &PackageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Pins the entry to an exact version. Returns false when the key is
    /// not tracked.
    pub fn pin(&self, key: &PackageKey, version: impl Into<String>) -> bool {
        match self.entries.get_mut(key) {
            Some(mut tracked) => {
                tracked.pin = Some(version.into());
                true
            }
            None => false,
        }
    }

    pub fn pinned_version(&self, key: &PackageKey) -> Option<String> {
        self.entries.get(key).and_then(|t| t.pin.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insertion-ordered snapshot of the tracked packages.
    pub fn snapshot(&self) -> Vec<Package> {
        let mut rows: Vec<(u64, Package)> = self
            .entries
            .iter()
            .map(|entry| (entry.order, entry.package.clone()))
            .collect();
        rows.sort_by_key(|(order, _)| *order);
        rows.into_iter().map(|(_, package)| package).collect()
    }
}

impl std::fmt::Debug for PackageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageSet")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DIGEST_LEN;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_bytes([byte; DIGEST_LEN])
    }

    #[test]
    fn equality_is_by_content_hash() {
        let a = Package::new("pkg/a", "1", hash(1)).unwrap();
        let b = Package::new("pkg/b", "2", hash(1)).unwrap();
        let c = Package::new("pkg/a", "1", hash(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_name_rejected() {
        assert!(Package::new("", "1", hash(1)).is_err());
        // A bare "/" canonicalizes to empty and is rejected too.
        assert!(Package::new("/", "1", hash(1)).is_err());
    }

    #[test]
    fn leading_separator_stripped() {
        let pkg = Package::new("/system/image", "0", hash(3)).unwrap();
        assert_eq!(pkg.name(), "system/image");
        assert_eq!(
            pkg.key(),
            PackageKey::new("system/image", "0")
        );
    }

    #[test]
    fn snapshot_is_insertion_ordered() {
        let set = PackageSet::new();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            set.add(Package::new(*name, "1", hash(i as u8)).unwrap());
        }
        let names: Vec<_> =
            set.snapshot().iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn pin_round_trip() {
        let set = PackageSet::new();
        let pkg = Package::new("pinned", "1", hash(9)).unwrap();
        let key = pkg.key();
        set.add(pkg);
        assert!(set.pin(&key, "1.2.3"));
        assert_eq!(set.pinned_version(&key).as_deref(), Some("1.2.3"));
        assert!(!set.pin(&PackageKey::new("missing", "1"), "2"));
    }
}
