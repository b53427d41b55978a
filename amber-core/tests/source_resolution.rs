//! Source and source-set behavior: verified lookup, signature failure
//! surfacing, persistence, and resolve ordering.

mod support;

use std::sync::Arc;

use amber_core::cache::ResolutionCache;
use amber_core::source::SourceSet;
use amber_model::ErrorKind;

use support::{
    mem_source, mem_source_builder, source_config, MemRemote, TestRepo,
};

#[tokio::test]
async fn lookup_resolves_published_target() {
    let mut repo = TestRepo::new();
    let hash = repo.publish("fortune", b"fortune-meta");
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let config = source_config("devhost", &remote.repo.lock().unwrap());
    let source = mem_source(config, store.path(), remote);

    let package = source.lookup("fortune", None).await.unwrap();
    assert_eq!(package.name(), "fortune");
    assert_eq!(package.content_hash(), hash);
}

#[tokio::test]
async fn lookup_canonicalizes_leading_separator() {
    let mut repo = TestRepo::new();
    let hash = repo.publish("fortune", b"fortune-meta");
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let config = source_config("devhost", &remote.repo.lock().unwrap());
    let source = mem_source(config, store.path(), remote);

    let package = source.lookup("/fortune", None).await.unwrap();
    assert_eq!(package.name(), "fortune");
    assert_eq!(package.content_hash(), hash);
}

#[tokio::test]
async fn versioned_lookup_uses_the_variant_entry() {
    let mut repo = TestRepo::new();
    let hash = repo.publish("fortune/2", b"fortune-v2");
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let config = source_config("devhost", &remote.repo.lock().unwrap());
    let source = mem_source(config, store.path(), remote);

    let package = source.lookup("fortune", Some("2")).await.unwrap();
    assert_eq!(package.version(), "2");
    assert_eq!(package.content_hash(), hash);

    let missing = source.lookup("fortune", Some("9")).await.unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn tampered_repository_surfaces_signature_error() {
    let mut repo = TestRepo::new();
    repo.publish("fortune", b"fortune-meta");
    repo.tampered = true;
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let config = source_config("devhost", &remote.repo.lock().unwrap());
    let source = mem_source(config, store.path(), remote.clone());

    let err = source.lookup("fortune", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Signature);

    // The source stays callable: fixing the repository fixes lookups, with
    // no filesystem create having happened in between.
    remote.repo.lock().unwrap().tampered = false;
    let package = source.lookup("fortune", None).await.unwrap();
    assert_eq!(package.name(), "fortune");
}

#[tokio::test]
async fn fetch_blob_verifies_digest() {
    let mut repo = TestRepo::new();
    let hash = repo.publish("fortune", b"fortune-meta");
    // Corrupt the stored blob after publishing.
    repo.blobs.insert(hash, b"tampered".to_vec());
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let config = source_config("devhost", &remote.repo.lock().unwrap());
    let source = mem_source(config, store.path(), remote);

    let mut sink = Vec::new();
    let err = source.fetch_blob(hash, &mut sink).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Integrity);
}

#[tokio::test]
async fn source_set_persists_and_reloads() {
    let repo = TestRepo::new();
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();

    {
        let set = SourceSet::open(
            store.path(),
            mem_source_builder(remote.clone()),
        )
        .await
        .unwrap();
        let config = source_config("devhost", &remote.repo.lock().unwrap());
        set.add_source(config.clone()).await.unwrap();

        let err = set.add_source(config).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateId);
    }

    // A fresh set over the same store sees the persisted source.
    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    let listed = set.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "devhost");

    set.remove_source("devhost").await.unwrap();
    assert!(set.list().await.is_empty());
    let err = set.remove_source("devhost").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn set_enabled_round_trips_through_disk() {
    let repo = TestRepo::new();
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    set.add_source(source_config("devhost", &remote.repo.lock().unwrap()))
        .await
        .unwrap();

    set.set_enabled("devhost", false).await.unwrap();
    assert!(!set.list().await[0].status.enabled);

    let reloaded =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    assert!(!reloaded.list().await[0].status.enabled);
}

#[tokio::test]
async fn resolve_skips_disabled_sources() {
    let mut repo = TestRepo::new();
    repo.publish("fortune", b"fortune-meta");
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    set.add_source(source_config("devhost", &remote.repo.lock().unwrap()))
        .await
        .unwrap();

    set.set_enabled("devhost", false).await.unwrap();
    let err = set.resolve("fortune", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    set.set_enabled("devhost", true).await.unwrap();
    let result = set.resolve("fortune", None).await.unwrap();
    assert_eq!(result.update.name(), "fortune");
    assert!(result.source.is_some());
}

#[tokio::test]
async fn resolve_reports_signature_failure_over_not_found() {
    let mut repo = TestRepo::new();
    repo.publish("fortune", b"fortune-meta");
    repo.tampered = true;
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    set.add_source(source_config("devhost", &remote.repo.lock().unwrap()))
        .await
        .unwrap();

    let err = set.resolve("fortune", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Signature);
}

#[tokio::test]
async fn first_boot_imports_default_configs_once() {
    let repo = TestRepo::new();
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let defaults = tempfile::tempdir().unwrap();

    let config = source_config("factory", &remote.repo.lock().unwrap());
    std::fs::write(
        defaults.path().join("factory.json"),
        serde_json::to_vec_pretty(&config).unwrap(),
    )
    .unwrap();

    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    set.import_defaults(defaults.path()).await.unwrap();
    assert_eq!(set.list().await.len(), 1);

    // Removing the source and importing again is a no-op: the store is
    // marked initialized.
    set.remove_source("factory").await.unwrap();
    set.import_defaults(defaults.path()).await.unwrap();
    assert!(set.list().await.is_empty());
}

#[tokio::test]
async fn cached_resolution_avoids_a_second_lookup() {
    let mut repo = TestRepo::new();
    let hash = repo.publish("fortune", b"fortune-meta");
    let remote = MemRemote::new(repo);
    let store = tempfile::tempdir().unwrap();
    let set =
        SourceSet::open(store.path(), mem_source_builder(remote.clone()))
            .await
            .unwrap();
    set.add_source(source_config("devhost", &remote.repo.lock().unwrap()))
        .await
        .unwrap();

    let cache = ResolutionCache::new();
    let first = set.resolve_cached("fortune", None, &cache).await.unwrap();
    assert_eq!(first.update.content_hash(), hash);

    // Unpublish the target; the cached resolution still answers.
    remote.repo.lock().unwrap().targets.clear();
    let second = set.resolve_cached("fortune", None, &cache).await.unwrap();
    assert_eq!(second.update.content_hash(), hash);

    // With the cache disabled the truth comes through.
    let disabled = ResolutionCache::disabled();
    let err = set
        .resolve_cached("fortune", None, &disabled)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}
