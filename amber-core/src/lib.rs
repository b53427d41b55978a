//! # Amber Core
//!
//! The update engine behind the Amber package daemon.
//!
//! ## Overview
//!
//! The engine polls cryptographically signed remote repositories for package
//! updates, fetches metadata and content blobs, and coordinates concurrent
//! activation requests so that each distinct artifact is materialized exactly
//! once on the local package filesystem.
//!
//! ## Architecture
//!
//! - [`tuf`]: signed-metadata client (root of trust, refresh, target lookup)
//! - [`source`]: one verified remote repository and the set of them
//! - [`pkgfs`]: the seam to the package filesystem and its activation feed
//! - [`activation`]: the monitor serializing writes and waking waiters
//! - [`fetch`]: tick-driven resolution and blob fetching
//! - [`daemon`]: wiring plus the operations the RPC surface calls into

pub mod activation;
pub mod cache;
pub mod daemon;
pub mod fetch;
pub mod pkgfs;
pub mod source;
pub mod system_update;
pub mod ticker;
pub mod tuf;

pub use activation::{
    ActivationMonitor, CompleteUpdateRequest, MonitorHandle,
    StartUpdateRequest,
};
pub use cache::ResolutionCache;
pub use daemon::{Daemon, DaemonBuilder, FETCH_TIMEOUT, RESOLVE_TIMEOUT};
pub use fetch::{Fetcher, GetResult, MetaContents};
pub use pkgfs::{DirPackageFs, PackageFs};
pub use source::{Source, SourceSet};
pub use system_update::{RebootHook, SystemUpdateMonitor};
pub use ticker::{Tick, TickGen, TickHandle};

pub use amber_model::{AmberError, ContentHash, ErrorKind, Result};
