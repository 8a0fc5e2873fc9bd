// Chunked storage round trips and range reads

use bytes::Bytes;
use kitsune::cache::chunking::{assemble, plan_read, split_body};
use kitsune::cache::{CacheKey, CacheStore, ChunkManifest, EntryInfo, MemoryKvStore};
use kitsune::config::{CacheSettings, TtlPolicy};
use kitsune::range::{ByteRange, RangeRequest};
use kitsune::transform::TransformOptions;
use proptest::prelude::*;
use std::sync::Arc;

fn small_chunk_settings() -> CacheSettings {
    CacheSettings {
        chunk_threshold_bytes: 64,
        chunk_size_bytes: 16,
        max_value_bytes: 64,
        ..CacheSettings::default()
    }
}

fn body_and_range() -> impl Strategy<Value = (Vec<u8>, u64, u64)> {
    prop::collection::vec(any::<u8>(), 1..400).prop_flat_map(|body| {
        let len = body.len() as u64;
        (Just(body), 0..len).prop_flat_map(move |(body, start)| {
            (Just(body), Just(start), start..len)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_plan_and_assemble_match_slice(
        (body, start, end) in body_and_range(),
        chunk_size in 1u64..64,
    ) {
        let body = Bytes::from(body);
        let manifest = ChunkManifest::new(body.len() as u64, chunk_size);
        let chunks = split_body(&body, chunk_size);
        prop_assert_eq!(chunks.len() as u32, manifest.chunk_count);

        let range = ByteRange { start, end };
        let plan = plan_read(&manifest, Some(range));
        let parts = plan
            .iter()
            .map(|slice| {
                let chunk = &chunks[slice.index as usize];
                chunk.slice(slice.local.start as usize..=slice.local.end as usize)
            })
            .collect();

        let assembled = assemble(&plan, parts).unwrap();
        prop_assert_eq!(&assembled[..], &body[start as usize..=end as usize]);
    }

    #[test]
    fn prop_chunked_store_round_trip(
        (body, start, end) in body_and_range(),
    ) {
        tokio_test::block_on(async {
            let kv = MemoryKvStore::new();
            let store = CacheStore::new(Arc::new(kv.clone()), small_chunk_settings());
            let key = CacheKey::derive("test", "/videos/a.mp4", &TransformOptions::new(), 1);
            let body = Bytes::from(body);

            store
                .put(&key, body.clone(), 200, &TtlPolicy::default(), EntryInfo::default())
                .await
                .unwrap();

            let full = store.get(&key, None).await.unwrap().unwrap();
            assert_eq!(full.body, body);
            assert_eq!(full.status(), 200);

            let ranged = store
                .get(&key, Some(RangeRequest::Bounded { start, end }))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&ranged.body[..], &body[start as usize..=end as usize]);
            assert_eq!(ranged.status(), 206);
            assert_eq!(
                ranged.content_range(),
                Some(format!("bytes {}-{}/{}", start, end, body.len()))
            );
        });
    }
}

#[tokio::test]
async fn test_large_body_is_stored_in_chunks() {
    let kv = MemoryKvStore::new();
    let store = CacheStore::new(Arc::new(kv.clone()), small_chunk_settings());
    let key = CacheKey::derive("test", "/videos/big.mp4", &TransformOptions::new(), 1);
    let body = Bytes::from(vec![7u8; 100]);

    let metadata = store
        .put(&key, body, 200, &TtlPolicy::default(), EntryInfo::default())
        .await
        .unwrap();

    let manifest = metadata.chunk_manifest.unwrap();
    assert_eq!(manifest.chunk_count, 7);
    for index in 0..7 {
        assert!(kv.contains_key(&key.chunk_key(index)));
    }
    assert!(kv.contains_key(key.as_str()));
    assert_eq!(kv.len(), 8);
}

#[tokio::test]
async fn test_suffix_range_on_chunked_entry() {
    let kv = MemoryKvStore::new();
    let store = CacheStore::new(Arc::new(kv.clone()), small_chunk_settings());
    let key = CacheKey::derive("test", "/videos/big.mp4", &TransformOptions::new(), 1);
    let body: Bytes = (0..100u8).collect::<Vec<u8>>().into();

    store
        .put(&key, body.clone(), 200, &TtlPolicy::default(), EntryInfo::default())
        .await
        .unwrap();

    let entry = store
        .get(&key, Some(RangeRequest::Suffix { length: 10 }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&entry.body[..], &body[90..]);
    assert_eq!(entry.content_range().as_deref(), Some("bytes 90-99/100"));
}
