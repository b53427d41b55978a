//! Core data model definitions shared across Amber crates.
#![allow(missing_docs)]

pub mod error;
pub mod hash;
pub mod package;
pub mod source;

// Intentionally curated re-exports for downstream consumers.
pub use error::{AmberError, ErrorKind, Result};
pub use hash::{ContentHash, ParseHashError, HEX_LEN};
pub use package::{Package, PackageKey, PackageSet};
pub use source::{BlobRepo, KeyConfig, KeyType, SourceConfig, SourceStatus};
