// Cache version bumps invalidate one pattern only

use kitsune::cache::{CacheKey, CacheStore, EntryInfo, MemoryKvStore, VersionRegistry};
use kitsune::config::{CacheSettings, TtlPolicy};
use kitsune::retry::WriteCoordinator;
use kitsune::transform::TransformOptions;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

async fn key_for(versions: &VersionRegistry, pattern: &str, path: &str) -> CacheKey {
    let version = versions.current(pattern).await.unwrap();
    CacheKey::derive("kitsune", path, &TransformOptions::from_pairs([("width", "320")]), version)
}

#[tokio::test]
async fn test_bump_changes_keys_of_that_pattern_only() {
    let kv = MemoryKvStore::new();
    let versions = VersionRegistry::new(
        Arc::new(kv.clone()),
        WriteCoordinator::default(),
        "kitsune",
        Duration::from_secs(60),
    );

    let videos_before = key_for(&versions, "videos", "/videos/a.mp4").await;
    let images_before = key_for(&versions, "images", "/images/a.png").await;

    assert_eq!(versions.bump("videos").await.unwrap(), 2);

    let videos_after = key_for(&versions, "videos", "/videos/a.mp4").await;
    let images_after = key_for(&versions, "images", "/images/a.png").await;

    assert_ne!(videos_before, videos_after);
    assert!(videos_after.as_str().ends_with(":v2"));
    assert_eq!(images_before, images_after);
}

#[tokio::test]
async fn test_entries_under_old_version_become_unreachable() {
    let kv = MemoryKvStore::new();
    let store = CacheStore::new(Arc::new(kv.clone()), CacheSettings::default());
    let versions = VersionRegistry::new(
        Arc::new(kv.clone()),
        WriteCoordinator::default(),
        "kitsune",
        Duration::from_secs(60),
    );

    let old_key = key_for(&versions, "videos", "/videos/a.mp4").await;
    store
        .put(
            &old_key,
            Bytes::from_static(b"stale"),
            200,
            &TtlPolicy::default(),
            EntryInfo::default(),
        )
        .await
        .unwrap();

    versions.bump("videos").await.unwrap();
    let new_key = key_for(&versions, "videos", "/videos/a.mp4").await;

    assert!(store.get(&new_key, None).await.unwrap().is_none());
    // The old entry is left to expire on its own
    assert!(store.get(&old_key, None).await.unwrap().is_some());
}

#[tokio::test]
async fn test_versions_document_is_json() {
    let kv = MemoryKvStore::new();
    let versions = VersionRegistry::new(
        Arc::new(kv.clone()),
        WriteCoordinator::default(),
        "kitsune",
        Duration::from_secs(60),
    );
    versions.bump("videos").await.unwrap();
    versions.bump("videos").await.unwrap();
    versions.bump("images").await.unwrap();

    let raw = kv.raw("kitsune:__versions").unwrap();
    let document: serde_json::Value = serde_json::from_slice(&raw.value).unwrap();
    assert_eq!(document, serde_json::json!({"images": 2, "videos": 3}));
}
