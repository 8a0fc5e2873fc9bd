// Redis key-value store integration tests
// Require Docker; run with: cargo test --test integration_tests -- --ignored

use bytes::Bytes;
use kitsune::cache::{KvStore, PutOptions, RedisKvStore};
use kitsune::config::RedisConfig;
use kitsune::range::ByteRange;
use std::time::Duration;
use testcontainers::{clients::Cli, RunnableImage};
use testcontainers_modules::redis::Redis;

async fn connect(port: u16) -> RedisKvStore {
    let config = RedisConfig::new(format!("redis://127.0.0.1:{}", port));
    RedisKvStore::new(&config)
        .await
        .expect("Failed to connect to Redis container")
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_redis_round_trip_with_metadata_and_range() {
    let docker = Cli::default();
    let container = docker.run(RunnableImage::from(Redis));
    let store = connect(container.get_host_port_ipv4(6379)).await;

    store
        .put(
            "kitsune:/videos/a.mp4:-:v1",
            Bytes::from_static(b"0123456789"),
            PutOptions {
                ttl_seconds: 60,
                metadata: Some(Bytes::from_static(b"{\"status\":200}")),
            },
        )
        .await
        .unwrap();

    let whole = store.get("kitsune:/videos/a.mp4:-:v1", None).await.unwrap().unwrap();
    assert_eq!(whole.value.as_ref(), b"0123456789");
    assert_eq!(whole.metadata.as_deref(), Some(&b"{\"status\":200}"[..]));

    let slice = store
        .get("kitsune:/videos/a.mp4:-:v1", Some(ByteRange { start: 2, end: 5 }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(slice.value.as_ref(), b"2345");

    assert!(store
        .get("kitsune:/videos/missing:-:v1", Some(ByteRange { start: 0, end: 0 }))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_redis_overwrite_without_metadata_clears_it() {
    let docker = Cli::default();
    let container = docker.run(RunnableImage::from(Redis));
    let store = connect(container.get_host_port_ipv4(6379)).await;

    let key = "kitsune:versions";
    store
        .put(
            key,
            Bytes::from_static(b"{}"),
            PutOptions {
                ttl_seconds: 0,
                metadata: Some(Bytes::from_static(b"old")),
            },
        )
        .await
        .unwrap();
    store
        .put(key, Bytes::from_static(b"{\"videos\":2}"), PutOptions::default())
        .await
        .unwrap();

    let value = store.get(key, None).await.unwrap().unwrap();
    assert_eq!(value.value.as_ref(), b"{\"videos\":2}");
    assert!(value.metadata.is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_redis_ttl_expires_value_and_metadata() {
    let docker = Cli::default();
    let container = docker.run(RunnableImage::from(Redis));
    let store = connect(container.get_host_port_ipv4(6379)).await;

    store
        .put(
            "short-lived",
            Bytes::from_static(b"value"),
            PutOptions {
                ttl_seconds: 1,
                metadata: Some(Bytes::from_static(b"meta")),
            },
        )
        .await
        .unwrap();
    assert!(store.get("short-lived", None).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(store.get("short-lived", None).await.unwrap().is_none());
    assert!(store
        .get(&RedisKvStore::meta_key("short-lived"), None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_redis_unreachable_is_unavailable() {
    let mut config = RedisConfig::new("redis://127.0.0.1:1");
    config.connection_timeout_ms = 200;
    let result = RedisKvStore::new(&config).await;
    assert!(matches!(
        result,
        Err(kitsune::cache::CacheError::Unavailable(_))
    ));
}
