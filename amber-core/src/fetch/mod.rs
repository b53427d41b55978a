//! Resolution and content fetching.

pub mod fetcher;
pub mod meta;

pub use fetcher::Fetcher;
pub use meta::MetaContents;

use std::sync::Arc;

use amber_model::{ErrorKind, Package};

use crate::source::Source;

/// Outcome of resolving one package against the source set.
///
/// Produced by the fetcher, consumed by the activation monitor. The source
/// reference lets later stages fetch blobs from wherever the resolution
/// came from.
#[derive(Debug, Clone)]
pub struct GetResult {
    pub update: Package,
    pub error: Option<ErrorKind>,
    pub source: Option<Arc<Source>>,
}

impl GetResult {
    pub fn new(update: Package, source: Option<Arc<Source>>) -> Self {
        Self {
            update,
            error: None,
            source,
        }
    }
}
