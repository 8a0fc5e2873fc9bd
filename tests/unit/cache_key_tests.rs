// Cache key derivation properties

use kitsune::cache::key::normalize_path;
use kitsune::cache::CacheKey;
use kitsune::transform::TransformOptions;
use proptest::prelude::*;

fn option_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,6}", 0..6)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_key_ignores_option_order(
        pairs in option_pairs().prop_shuffle(),
        path in "(/[a-zA-Z0-9._-]{1,12}){1,4}",
        version in 1u64..1_000,
    ) {
        let mut reversed = pairs.clone();
        reversed.reverse();

        let a = CacheKey::derive("kitsune", &path, &TransformOptions::from_pairs(pairs), version);
        let b = CacheKey::derive("kitsune", &path, &TransformOptions::from_pairs(reversed), version);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_key_is_stable_across_calls(
        pairs in option_pairs(),
        path in "(/[a-zA-Z0-9 %:._-]{1,40}){1,8}",
    ) {
        let options = TransformOptions::from_pairs(pairs);
        let first = CacheKey::derive("kitsune", &path, &options, 3);
        let second = CacheKey::derive("kitsune", &path, &options, 3);
        prop_assert!(first.as_str().len() <= 250 || first.as_str().contains(":hash:"));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_version_always_changes_the_key(
        pairs in option_pairs(),
        path in "(/[a-z0-9]{1,12}){1,4}",
        version in 1u64..1_000,
    ) {
        let options = TransformOptions::from_pairs(pairs);
        let current = CacheKey::derive("kitsune", &path, &options, version);
        let bumped = CacheKey::derive("kitsune", &path, &options, version + 1);
        prop_assert_ne!(current, bumped);
    }

    #[test]
    fn prop_normalize_path_is_idempotent(path in "[/a-z?#]{0,30}") {
        let once = normalize_path(&path);
        prop_assert_eq!(normalize_path(&once), once.clone());
        prop_assert!(once.starts_with('/'));
    }
}

#[test]
fn test_equivalent_paths_share_a_key() {
    let options = TransformOptions::from_pairs([("width", "320")]);
    let a = CacheKey::derive("kitsune", "/videos//a.mp4?x=1", &options, 1);
    let b = CacheKey::derive("kitsune", "videos/a.mp4", &options, 1);
    assert_eq!(a, b);
}

#[test]
fn test_long_keys_are_hashed() {
    let path = format!("/videos/{}", "a".repeat(400));
    let key = CacheKey::derive("kitsune", &path, &TransformOptions::new(), 7);
    assert!(key.as_str().starts_with("kitsune:hash:"));
    assert!(key.as_str().ends_with(":v7"));
    assert!(key.as_str().len() <= 250);
}

#[test]
fn test_original_variant_is_distinct() {
    let transformed = CacheKey::derive("kitsune", "/a", &TransformOptions::new(), 1);
    let original = CacheKey::original("kitsune", "/a", 1);
    assert_ne!(transformed, original);
    assert!(original.is_original());
    assert!(!transformed.is_original());
}
