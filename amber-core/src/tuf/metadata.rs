use std::collections::BTreeMap;

use amber_model::{AmberError, ContentHash, Result};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// The fixed, repository-wide name of the custom attribute carrying a
/// target's content hash.
pub const HASH_FIELD: &str = "merkle";

/// The four role documents of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl Role {
    pub fn file_name(self) -> &'static str {
        match self {
            Role::Root => "root.json",
            Role::Timestamp => "timestamp.json",
            Role::Snapshot => "snapshot.json",
            Role::Targets => "targets.json",
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Role::Root => "root",
            Role::Timestamp => "timestamp",
            Role::Snapshot => "snapshot",
            Role::Targets => "targets",
        }
    }
}

/// A role document as it travels on the wire: opaque signed payload plus a
/// list of signatures over the payload's canonical JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub signatures: Vec<SignatureEntry>,
    pub signed: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub keyid: String,
    pub sig: String,
}

impl Envelope {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            AmberError::signature(format!("malformed metadata envelope: {e}"))
        })
    }

    /// The bytes the signatures cover. `signed` is held as a parsed value
    /// with sorted keys, so re-serializing yields the canonical form.
    pub fn canonical_signed_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.signed).map_err(|e| {
            AmberError::signature(format!("unserializable payload: {e}"))
        })
    }

    /// Checks that at least `role.threshold` distinct keys from
    /// `role.keyids` have validly signed the payload.
    pub fn verify(
        &self,
        keys: &BTreeMap<String, VerifyingKey>,
        role: &RoleKeys,
    ) -> Result<()> {
        let message = self.canonical_signed_bytes()?;
        let mut satisfied: Vec<&str> = Vec::new();
        for entry in &self.signatures {
            if !role.keyids.iter().any(|id| id == &entry.keyid) {
                continue;
            }
            if satisfied.iter().any(|id| *id == entry.keyid) {
                continue;
            }
            let Some(key) = keys.get(&entry.keyid) else {
                continue;
            };
            let Ok(raw) = hex::decode(&entry.sig) else {
                continue;
            };
            let Ok(signature) = Signature::from_slice(&raw) else {
                continue;
            };
            if key.verify(&message, &signature).is_ok() {
                satisfied.push(&entry.keyid);
            }
        }
        if (satisfied.len() as u32) < role.threshold {
            return Err(AmberError::signature(format!(
                "{} of {} required signatures verified",
                satisfied.len(),
                role.threshold
            )));
        }
        Ok(())
    }
}

/// Key material as declared inside the root document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub keytype: String,
    pub public: String,
}

/// Keys and threshold for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootPayload {
    #[serde(rename = "_type")]
    pub type_name: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: BTreeMap<String, KeyEntry>,
    pub roles: BTreeMap<String, RoleKeys>,
}

impl RootPayload {
    pub fn role(&self, role: Role) -> Result<&RoleKeys> {
        self.roles.get(role.type_name()).ok_or_else(|| {
            AmberError::signature(format!(
                "root document declares no {} role",
                role.type_name()
            ))
        })
    }

    /// Verifying keys declared by this root, keyed by keyid.
    pub fn verifying_keys(&self) -> BTreeMap<String, VerifyingKey> {
        let mut out = BTreeMap::new();
        for (keyid, entry) in &self.keys {
            if entry.keytype != "ed25519" {
                continue;
            }
            if let Ok(key) = super::keys::parse_verifying_key(&entry.public) {
                out.insert(keyid.clone(), key);
            }
        }
        out
    }
}

/// Version pointer for a downstream role document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampPayload {
    #[serde(rename = "_type")]
    pub type_name: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(rename = "_type")]
    pub type_name: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsPayload {
    #[serde(rename = "_type")]
    pub type_name: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetEntry {
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl TargetEntry {
    /// The content hash from the `custom` record, if present and valid.
    pub fn content_hash(&self) -> Result<ContentHash> {
        let value = self.custom.get(HASH_FIELD).ok_or_else(|| {
            AmberError::signature("target metadata missing content hash")
        })?;
        let text = value.as_str().ok_or_else(|| {
            AmberError::signature("target content hash is not a string")
        })?;
        text.parse().map_err(|e| {
            AmberError::signature(format!("target content hash invalid: {e}"))
        })
    }
}

/// Shared expiry check. `expires` at or before now means stale.
pub fn check_expiry(expires: DateTime<Utc>, role: Role) -> Result<()> {
    if expires <= Utc::now() {
        return Err(AmberError::network(format!(
            "{} metadata is stale (expired {})",
            role.type_name(),
            expires
        )));
    }
    Ok(())
}

/// Parses and type-checks a role payload out of a verified envelope.
pub fn parse_payload<T: serde::de::DeserializeOwned>(
    envelope: &Envelope,
    role: Role,
) -> Result<T> {
    let type_tag = envelope
        .signed
        .get("_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if type_tag != role.type_name() {
        return Err(AmberError::signature(format!(
            "expected {} document, found {:?}",
            role.type_name(),
            type_tag
        )));
    }
    serde_json::from_value(envelope.signed.clone()).map_err(|e| {
        AmberError::signature(format!(
            "malformed {} payload: {e}",
            role.type_name()
        ))
    })
}
