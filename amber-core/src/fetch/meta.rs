use std::collections::BTreeMap;
use std::fmt;

use amber_model::{AmberError, ContentHash, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Size cap on a meta-artifact document.
pub const MAX_META_BYTES: usize = 4 * 1024 * 1024;

/// The package meta-artifact: a bounded directory of entry name to content
/// hash.
///
/// Encoding is canonical (sorted keys, stable JSON rendering), so
/// `parse(encode(m)) == m` and encoding a parsed document reproduces the
/// original bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MetaContents {
    #[serde(flatten)]
    entries: BTreeMap<String, ContentHash>,
}

impl MetaContents {
    pub fn from_entries(entries: BTreeMap<String, ContentHash>) -> Self {
        Self { entries }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_META_BYTES {
            return Err(AmberError::integrity(format!(
                "meta-artifact of {} bytes exceeds the {} byte cap",
                bytes.len(),
                MAX_META_BYTES
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| {
            AmberError::integrity(format!("malformed meta-artifact: {e}"))
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            AmberError::io(format!("cannot encode meta-artifact: {e}"))
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, ContentHash)> {
        self.entries.iter().map(|(name, hash)| (name.as_str(), *hash))
    }

    /// The distinct content hashes this package references.
    pub fn hashes(&self) -> Vec<ContentHash> {
        let mut hashes: Vec<ContentHash> =
            self.entries.values().copied().collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Hand-written so duplicate entry names are rejected instead of silently
// last-one-wins.
impl<'de> Deserialize<'de> for MetaContents {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct ContentsVisitor;

        impl<'de> Visitor<'de> for ContentsVisitor {
            type Value = MetaContents;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of entry name to content hash")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some((name, hash)) =
                    access.next_entry::<String, ContentHash>()?
                {
                    if name.is_empty() {
                        return Err(serde::de::Error::custom(
                            "empty entry name",
                        ));
                    }
                    if entries.insert(name.clone(), hash).is_some() {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate entry {name:?}"
                        )));
                    }
                }
                Ok(MetaContents { entries })
            }
        }

        deserializer.deserialize_map(ContentsVisitor)
    }
}
