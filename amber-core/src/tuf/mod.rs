//! Signed-metadata client.
//!
//! A repository publishes four role documents (`root.json`,
//! `timestamp.json`, `snapshot.json`, `targets.json`), each wrapped in a
//! signature envelope. The client anchors trust in a set of configured root
//! keys, refreshes the chain timestamp -> snapshot -> targets, and resolves
//! target names to content hashes carried in each target's `custom` record.

pub mod client;
pub mod keys;
pub mod metadata;
pub mod store;

pub use client::{HttpMetadataRemote, MetadataClient, MetadataRemote};
pub use keys::{key_id, parse_verifying_key, root_keys_from_config};
pub use metadata::{
    Envelope, KeyEntry, MetaEntry, RoleKeys, Role, RootPayload,
    SignatureEntry, SnapshotPayload, TargetEntry, TargetsPayload,
    TimestampPayload, HASH_FIELD,
};
pub use store::{InitState, LocalStore};
