// Configuration loading and validation tests

use kitsune::config::*;
use std::io::Write;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
logging:
  level: debug
  format: pretty
transform:
  proxy_base_url: "https://media.example.com/cdn-cgi/media"
  timeout_ms: 15000
  object_storage_base_url: "https://videos.example.com"
cache:
  key_prefix: edge
  chunk_threshold_bytes: 1048576
  chunk_size_bytes: 524288
  max_value_bytes: 2097152
  write_retry:
    max_attempts: 5
    initial_backoff_ms: 100
    max_backoff_ms: 1000
  redis:
    redis_url: "redis://127.0.0.1:6379"
object_stores:
  VIDEOS:
    bucket: videos-prod
    region: us-east-1
    access_key: AKIDEXAMPLE
    secret_key: secret
origins:
  - name: premium
    matcher: "^/videos/premium/(?P<id>[^/]+)$"
    ttl:
      ok: 7200
    sources:
      - type: remote_http
        priority: 1
        url: "https://premium.example.com"
        path: "assets/{id}"
        auth:
          type: bearer
          token: abc
      - type: object_storage
        priority: 0
        bucket: VIDEOS
        path: "premium/{id}"
  - name: standard
    matcher: "^/videos/(.+)$"
    cacheable: false
    sources:
      - type: fallback_http
        priority: 0
        url: "https://fallback.example.com"
        path: "{1}"
"#;

fn parse(yaml: &str) -> Config {
    Config::from_yaml_with_env(yaml).expect("Failed to parse config")
}

#[test]
fn test_full_config_parses_and_validates() {
    let config = parse(FULL_CONFIG);
    assert!(config.validate().is_ok(), "{:?}", config.validate());

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.transform.timeout_ms, 15000);
    assert_eq!(config.cache.key_prefix, "edge");
    assert_eq!(config.cache.write_retry.max_attempts, 5);
    assert_eq!(
        config.cache.redis.as_ref().map(|r| r.redis_url.as_str()),
        Some("redis://127.0.0.1:6379")
    );
    assert_eq!(config.object_stores["VIDEOS"].bucket, "videos-prod");
    assert_eq!(config.origins.len(), 2);
}

#[test]
fn test_sources_are_sorted_by_priority() {
    let config = parse(FULL_CONFIG);
    let premium = &config.origins[0];
    assert_eq!(premium.sources[0].source_type, SourceType::ObjectStorage);
    assert_eq!(premium.sources[1].source_type, SourceType::RemoteHttp);
}

#[test]
fn test_defaults_fill_missing_sections() {
    let config = parse(
        r#"
transform:
  proxy_base_url: "https://media.example.com"
origins:
  - name: a
    matcher: "^/a/(.+)$"
    sources:
      - type: remote_http
        priority: 0
        url: "https://a.example.com"
        path: "{1}"
"#,
    );
    assert!(config.validate().is_ok());
    assert_eq!(config.logging, LoggingConfig::default());
    assert!(config.cache.enabled);
    assert!(config.origins[0].cacheable);
    assert_eq!(config.origins[0].ttl, TtlPolicy::default());
    assert_eq!(config.generation, 0);
}

#[test]
fn test_env_substitution() {
    std::env::set_var("KITSUNE_TEST_PROXY_HOST", "proxy.internal");
    let config = parse(
        r#"
transform:
  proxy_base_url: "https://${KITSUNE_TEST_PROXY_HOST}/media"
origins: []
"#,
    );
    assert_eq!(config.transform.proxy_base_url, "https://proxy.internal/media");
}

#[test]
fn test_unset_env_variable_is_an_error() {
    let err = Config::from_yaml_with_env(
        r#"
transform:
  proxy_base_url: "${KITSUNE_TEST_DEFINITELY_UNSET}"
origins: []
"#,
    )
    .unwrap_err();
    assert!(err.contains("KITSUNE_TEST_DEFINITELY_UNSET"), "{}", err);
}

#[test]
fn test_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();
    file.flush().unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.origins[0].name, "premium");
}

#[test]
fn test_missing_file_is_reported() {
    let err = Config::from_file("/nonexistent/kitsune.yaml").unwrap_err();
    assert!(err.contains("Failed to read config file"), "{}", err);
}

#[test]
fn test_no_origins_rejected() {
    let config = parse(
        r#"
transform:
  proxy_base_url: "https://media.example.com"
origins: []
"#,
    );
    assert_eq!(
        config.validate().unwrap_err(),
        "At least one origin must be configured"
    );
}

#[test]
fn test_duplicate_origin_names_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.origins[1].name = "premium".to_string();
    let err = config.validate().unwrap_err();
    assert!(err.contains("Duplicate origin name"), "{}", err);
}

#[test]
fn test_invalid_regex_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.origins[0].matcher = "^/videos/(".to_string();
    let err = config.validate().unwrap_err();
    assert!(err.contains("invalid matcher"), "{}", err);
}

#[test]
fn test_unresolvable_placeholder_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.origins[1].sources[0].path = "{slug}".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_object_store_binding_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.origins[0].sources[0].bucket = Some("MISSING".to_string());
    let err = config.validate().unwrap_err();
    assert!(err.contains("unknown binding 'MISSING'"), "{}", err);
}

#[test]
fn test_relative_source_url_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.origins[1].sources[0].url = Some("fallback.example.com".to_string());
    let err = config.validate().unwrap_err();
    assert!(err.contains("absolute http(s) URL"), "{}", err);
}

#[test]
fn test_zero_write_attempts_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.cache.write_retry.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_redis_url_rejected() {
    let mut config = parse(FULL_CONFIG);
    config.cache.redis = Some(RedisConfig::new("http://127.0.0.1:6379"));
    let err = config.validate().unwrap_err();
    assert!(err.contains("redis://"), "{}", err);
}
