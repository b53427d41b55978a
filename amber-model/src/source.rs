use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AmberError, Result};

/// Signature scheme of a root key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Ed25519,
}

/// One root-of-trust key: scheme plus hex-encoded public key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub public: String,
}

/// Mutable per-source switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub enabled: bool,
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Persisted record describing one remote repository.
///
/// Serialized as `sources/<id>/config.json`; the serde form round-trips
/// exactly so configs survive rewrite cycles byte-for-byte equal in meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub repo_url: Url,
    pub blob_url: Url,
    pub root_keys: Vec<KeyConfig>,
    #[serde(default)]
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_sec: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_enable_on_add: bool,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Validates the parts serde cannot: non-empty id safe for use as a
    /// directory name, and at least one root key.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AmberError::invalid_config(
                "source id must not be empty",
            ));
        }
        if self.id.contains(['/', '\\']) || self.id == "." || self.id == ".."
        {
            return Err(AmberError::invalid_config(format!(
                "source id {:?} is not a valid directory name",
                self.id
            )));
        }
        if self.root_keys.is_empty() {
            return Err(AmberError::invalid_config(format!(
                "source {:?} has no root keys",
                self.id
            )));
        }
        for key in &self.root_keys {
            if hex::decode(&key.public).is_err() {
                return Err(AmberError::invalid_config(format!(
                    "source {:?} has a non-hex root key",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Where content blobs (not signed metadata) live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRepo {
    pub address: Url,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
