use std::collections::BTreeMap;

use amber_model::{AmberError, KeyConfig, Result};
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha512};

/// Stable identifier for a public key: the hex digest of its raw bytes.
pub fn key_id(public_hex: &str) -> String {
    let raw = hex::decode(public_hex).unwrap_or_default();
    hex::encode(Sha512::digest(&raw))
}

pub fn parse_verifying_key(public_hex: &str) -> Result<VerifyingKey> {
    let raw = hex::decode(public_hex).map_err(|_| {
        AmberError::signature("root key is not valid hex")
    })?;
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
        AmberError::signature(format!(
            "ed25519 public key must be 32 bytes, got {}",
            raw.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| AmberError::signature(format!("malformed public key: {e}")))
}

/// Expands configured root keys into a keyid -> verifying-key map.
pub fn root_keys_from_config(
    configs: &[KeyConfig],
) -> Result<BTreeMap<String, VerifyingKey>> {
    let mut keys = BTreeMap::new();
    for config in configs {
        let key = parse_verifying_key(&config.public)?;
        keys.insert(key_id(&config.public), key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_model::KeyType;

    #[test]
    fn key_id_is_stable() {
        let public = "ab".repeat(32);
        assert_eq!(key_id(&public), key_id(&public));
        assert_eq!(key_id(&public).len(), 128);
    }

    #[test]
    fn rejects_short_keys() {
        assert!(parse_verifying_key("abcd").is_err());
        assert!(parse_verifying_key("zz").is_err());
    }

    #[test]
    fn expands_config_keys() {
        let signing =
            ed25519_dalek::SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let public = hex::encode(signing.verifying_key().to_bytes());
        let configs = vec![KeyConfig {
            key_type: KeyType::Ed25519,
            public: public.clone(),
        }];
        let keys = root_keys_from_config(&configs).unwrap();
        assert!(keys.contains_key(&key_id(&public)));
    }
}
