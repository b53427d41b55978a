use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Digest width in bytes. Content hashes are 512-bit.
pub const DIGEST_LEN: usize = 64;

/// Length of the lowercase-hex rendering of a digest.
pub const HEX_LEN: usize = 2 * DIGEST_LEN;

/// A content hash: the fixed-width digest that uniquely identifies an
/// artifact's bytes.
///
/// The canonical textual form is exactly [`HEX_LEN`] lowercase hex
/// characters. Parsing rejects anything else, including uppercase hex, so a
/// hash that round-trips through its `Display` form compares equal bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; DIGEST_LEN]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseHashError {
    #[error("content hash must be {HEX_LEN} hex characters, got {0}")]
    WrongLength(usize),
    #[error("content hash contains a non-hex or uppercase character")]
    InvalidCharacter,
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// The hex-ASCII rendering delivered to reply endpoints: 128 bytes, no
    /// terminator.
    pub fn as_hex_bytes(&self) -> Vec<u8> {
        hex::encode(self.0).into_bytes()
    }
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(ParseHashError::WrongLength(s.len()));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ParseHashError::InvalidCharacter);
        }
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut out)
            .map_err(|_| ParseHashError::InvalidCharacter)?;
        Ok(Self(out))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full digests drown log lines; the first eight hex chars identify.
        write!(f, "ContentHash({}..)", &hex::encode(self.0)[..8])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
