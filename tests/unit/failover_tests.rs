// Failover scenarios driven through the public pipeline API

use async_trait::async_trait;
use bytes::Bytes;
use kitsune::cache::{CacheKey, MemoryKvStore};
use kitsune::config::{CacheSettings, Config, SourceType};
use kitsune::error::EdgeError;
use kitsune::failover::{FailoverCoordinator, FollowUp};
use kitsune::fetcher::{DefaultSourceFetcher, HttpSourceFetcher, MemoryObjectStore};
use kitsune::orchestrator::FetchOrchestrator;
use kitsune::origin::{shared, OriginRegistry, SourceId};
use kitsune::pipeline::{CacheLayer, FallbackKind, MediaPipeline, MediaRequest, RequestContext};
use kitsune::range::RangeRequest;
use kitsune::transform::{ProxyFailure, TransformOptions, TransformProxy, TransformedAsset};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const CONFIG: &str = r#"
transform:
  proxy_base_url: "https://media.example.com"
  object_storage_base_url: "https://public.example.com"
origins:
  - name: premium
    matcher: "^/videos/(?P<id>[^/]+)$"
    sources:
      - type: object_storage
        priority: 0
        bucket: PRIMARY
        path: "primary/{id}"
      - type: object_storage
        priority: 1
        bucket: SECONDARY
        path: "secondary/{id}"
  - name: standard
    matcher: "^/videos/(.+)$"
    sources:
      - type: object_storage
        priority: 0
        bucket: SECONDARY
        path: "standard/{1}"
"#;

/// Proxy double keyed by source URL; unknown URLs transform successfully
#[derive(Default)]
struct FakeProxy {
    failures: Mutex<HashMap<String, Vec<ProxyFailure>>>,
    calls: Mutex<Vec<(String, TransformOptions)>>,
}

impl FakeProxy {
    fn fail(&self, url: &str, failure: ProxyFailure) {
        self.failures
            .lock()
            .entry(url.to_string())
            .or_default()
            .push(failure);
    }

    fn calls(&self) -> Vec<(String, TransformOptions)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TransformProxy for FakeProxy {
    async fn transform(
        &self,
        source_url: &str,
        options: &TransformOptions,
        _range: Option<RangeRequest>,
    ) -> Result<TransformedAsset, ProxyFailure> {
        self.calls
            .lock()
            .push((source_url.to_string(), options.clone()));
        if let Some(queue) = self.failures.lock().get_mut(source_url) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(TransformedAsset {
            status: 200,
            body: Bytes::from(format!("transformed:{}", source_url)),
            content_type: Some("video/mp4".to_string()),
            content_range: None,
        })
    }
}

struct Setup {
    primary: MemoryObjectStore,
    secondary: MemoryObjectStore,
    proxy: Arc<FakeProxy>,
}

impl Setup {
    fn new() -> Self {
        Self {
            primary: MemoryObjectStore::new(),
            secondary: MemoryObjectStore::new(),
            proxy: Arc::new(FakeProxy::default()),
        }
    }

    fn coordinator(&self) -> FailoverCoordinator {
        let config = Config::from_yaml_with_env(CONFIG).unwrap();
        config.validate().unwrap();
        let fetcher = DefaultSourceFetcher::new(HttpSourceFetcher::new().unwrap())
            .with_object_store("PRIMARY", Arc::new(self.primary.clone()))
            .with_object_store("SECONDARY", Arc::new(self.secondary.clone()));
        let registry = shared(OriginRegistry::from_config(&config).unwrap());
        FailoverCoordinator::new(
            FetchOrchestrator::new(registry, Arc::new(fetcher)),
            Arc::clone(&self.proxy) as Arc<dyn TransformProxy>,
        )
    }
}

fn source(origin: &str, priority: u32) -> SourceId {
    SourceId {
        origin: origin.to_string(),
        kind: SourceType::ObjectStorage,
        priority,
    }
}

#[tokio::test]
async fn test_next_priority_source_after_exclusion() {
    let setup = Setup::new();
    setup.primary.insert("primary/a.mp4", b"p".to_vec(), None);
    setup.secondary.insert("secondary/a.mp4", b"s".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/a.mp4",
        ProxyFailure::NotFound { status: 404 },
    );

    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = setup
        .coordinator()
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    let delivery = outcome.result.unwrap();
    assert_eq!(delivery.provenance.origin, "premium");
    assert_eq!(delivery.provenance.priority, 1);
    assert_eq!(outcome.excluded, vec![source("premium", 0)]);
}

#[tokio::test]
async fn test_premium_to_standard_failover() {
    let setup = Setup::new();
    setup.primary.insert("primary/a.mp4", b"p".to_vec(), None);
    setup.secondary.insert("secondary/a.mp4", b"s".to_vec(), None);
    setup.secondary.insert("standard/a.mp4", b"std".to_vec(), None);
    for url in [
        "https://public.example.com/primary/a.mp4",
        "https://public.example.com/secondary/a.mp4",
    ] {
        setup.proxy.fail(url, ProxyFailure::NotFound { status: 404 });
    }

    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = setup
        .coordinator()
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    let delivery = outcome.result.unwrap();
    assert_eq!(delivery.provenance.origin, "standard");
    assert_eq!(
        delivery.body.as_bytes(),
        Some(&Bytes::from_static(b"transformed:https://public.example.com/standard/a.mp4"))
    );
    assert_eq!(
        outcome.excluded,
        vec![source("premium", 0), source("premium", 1)]
    );
    assert_eq!(ctx.alternatives_tried(), 2);

    let headers = ctx.diagnostics_headers();
    assert_eq!(headers["X-Fallback-Applied"], "alternative-source");
    assert_eq!(headers["X-Served-By-Origin"], "standard");
    assert_eq!(headers["X-Alternatives-Tried"], "2");
    assert_eq!(headers["X-Original-Error-Status"], "404");
}

#[tokio::test]
async fn test_size_limit_fallback_writes_original_variant() {
    let setup = Setup::new();
    let original = Bytes::from(vec![42u8; 1000]);
    setup
        .primary
        .insert("primary/big.mp4", original.clone(), Some("video/mp4"));
    setup.proxy.fail(
        "https://public.example.com/primary/big.mp4",
        ProxyFailure::SizeLimitExceeded {
            status: 413,
            limit_bytes: Some(256 * 1024 * 1024),
        },
    );

    let kv = MemoryKvStore::new();
    let cache = CacheLayer::new(Arc::new(kv.clone()), CacheSettings::default());
    let pipeline = MediaPipeline::new(setup.coordinator(), Some(cache.clone()), 8);

    let request = MediaRequest::new(
        "/videos/big.mp4",
        TransformOptions::from_pairs([("mode", "video"), ("width", "640")]),
    );
    let response = pipeline.handle(&request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Length"), Some("1000"));
    assert_eq!(response.header("X-Fallback-Applied"), Some("size-limit-original"));
    assert_eq!(response.header("X-Original-Error-Type"), Some("size_limit"));
    assert_eq!(response.body.collect().await.unwrap(), original);

    pipeline.drain().await;

    let original_key = CacheKey::original("kitsune", "/videos/big.mp4", 1);
    let entry = cache.store().get(&original_key, None).await.unwrap().unwrap();
    assert!(entry.metadata.fallback_original);
    assert_eq!(entry.body, original);
    assert_eq!(entry.content_type(), Some("video/mp4"));

    let transformed_key = CacheKey::derive("kitsune", "/videos/big.mp4", &request.options, 1);
    assert!(cache.store().get(&transformed_key, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_size_limit_fallback_with_range_caches_full_original() {
    let setup = Setup::new();
    let original: Bytes = (0..=255u8).collect::<Vec<u8>>().into();
    setup.primary.insert("primary/big.mp4", original.clone(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/big.mp4",
        ProxyFailure::SizeLimitExceeded {
            status: 413,
            limit_bytes: None,
        },
    );

    let kv = MemoryKvStore::new();
    let cache = CacheLayer::new(Arc::new(kv.clone()), CacheSettings::default());
    let pipeline = MediaPipeline::new(setup.coordinator(), Some(cache.clone()), 8);

    let request = MediaRequest::new("/videos/big.mp4", TransformOptions::new())
        .with_range(Some(RangeRequest::Bounded { start: 10, end: 19 }));
    let response = pipeline.handle(&request).await;

    assert_eq!(response.status, 206);
    assert_eq!(response.header("Content-Length"), Some("10"));
    assert_eq!(response.header("Content-Range"), Some("bytes 10-19/256"));
    assert_eq!(response.body.collect().await.unwrap(), original.slice(10..20));

    pipeline.drain().await;
    let entry = cache
        .store()
        .get(&CacheKey::original("kitsune", "/videos/big.mp4", 1), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.body, original);
}

#[tokio::test]
async fn test_duration_limit_clamps_to_reported_max() {
    let setup = Setup::new();
    setup.primary.insert("primary/clip.mp4", b"raw".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/clip.mp4",
        ProxyFailure::DurationLimitExceeded {
            status: 400,
            min_secs: Some(0.1),
            max_secs: Some(120.0),
        },
    );

    let mut ctx = RequestContext::new("/videos/clip.mp4");
    let options = TransformOptions::from_pairs([("mode", "video"), ("duration", "5m")]);
    let outcome = setup
        .coordinator()
        .deliver("/videos/clip.mp4", &options, None, &mut ctx)
        .await;

    assert!(outcome.result.is_ok());
    assert!(outcome.excluded.is_empty());
    assert_eq!(ctx.fallback(), Some(FallbackKind::DurationClamped));

    let calls = setup.proxy.calls();
    assert_eq!(calls.len(), 2, "exactly one retry");
    assert_eq!(calls[0].0, calls[1].0, "retry targets the same source");
    assert_eq!(calls[0].1.get("duration"), Some("5m"));
    assert_eq!(calls[1].1.get("duration"), Some("120s"));
    assert_eq!(calls[1].1.duration_secs(), Some(120.0));
}

#[tokio::test]
async fn test_proxy_rate_limit_surfaces_429() {
    let setup = Setup::new();
    setup.primary.insert("primary/a.mp4", b"p".to_vec(), None);
    setup.secondary.insert("secondary/a.mp4", b"s".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/a.mp4",
        ProxyFailure::RateLimited { status: 429 },
    );

    let pipeline = MediaPipeline::new(setup.coordinator(), None, 8);
    let response = pipeline
        .handle(&MediaRequest::new("/videos/a.mp4", TransformOptions::new()))
        .await;

    assert_eq!(response.status, 429);
    assert_eq!(response.header("X-Cache-Status"), Some("BYPASS"));
    assert_eq!(setup.proxy.calls().len(), 1);
}

#[tokio::test]
async fn test_proxy_error_schedules_version_bump() {
    let setup = Setup::new();
    setup.primary.insert("primary/a.mp4", b"p".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/a.mp4",
        ProxyFailure::ProxyError {
            status: 503,
            message: "upstream unavailable".to_string(),
        },
    );

    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = setup
        .coordinator()
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    assert_eq!(outcome.result.unwrap_err().http_status(), 503);
    assert!(matches!(
        outcome.follow_ups.as_slice(),
        [FollowUp::BumpVersion { pattern }] if pattern == "premium"
    ));
}

#[tokio::test]
async fn test_duration_within_reported_limit_is_not_retried() {
    let setup = Setup::new();
    setup.primary.insert("primary/clip.mp4", b"raw".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/clip.mp4",
        ProxyFailure::DurationLimitExceeded {
            status: 400,
            min_secs: Some(0.1),
            max_secs: Some(120.0),
        },
    );

    let mut ctx = RequestContext::new("/videos/clip.mp4");
    let options = TransformOptions::from_pairs([("mode", "video"), ("duration", "60s")]);
    let outcome = setup
        .coordinator()
        .deliver("/videos/clip.mp4", &options, None, &mut ctx)
        .await;

    assert_eq!(
        outcome.result.unwrap_err(),
        EdgeError::DurationLimitExceeded {
            min_secs: Some(0.1),
            max_secs: Some(120.0),
        }
    );
    assert_eq!(setup.proxy.calls().len(), 1);
    assert_eq!(ctx.fallback(), None);
}

#[tokio::test]
async fn test_size_limit_original_with_range_past_end_is_416() {
    let setup = Setup::new();
    setup.primary.insert("primary/small.mp4", b"0123456789".to_vec(), None);
    setup.proxy.fail(
        "https://public.example.com/primary/small.mp4",
        ProxyFailure::SizeLimitExceeded {
            status: 413,
            limit_bytes: None,
        },
    );

    let kv = MemoryKvStore::new();
    let cache = CacheLayer::new(Arc::new(kv.clone()), CacheSettings::default());
    let pipeline = MediaPipeline::new(setup.coordinator(), Some(cache), 8);
    let request = MediaRequest::new("/videos/small.mp4", TransformOptions::new())
        .with_range(Some(RangeRequest::From { start: 100 }));

    let response = pipeline.handle(&request).await;

    assert_eq!(response.status, 416);
    assert_eq!(response.header("Content-Range"), Some("bytes */10"));
    assert_eq!(pipeline.drain().await, 0);
    assert!(kv.is_empty());
}

#[tokio::test]
async fn test_sources_missing_at_origin_are_excluded() {
    let setup = Setup::new();
    setup.secondary.insert("standard/a.mp4", b"std".to_vec(), None);

    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = setup
        .coordinator()
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    let delivery = outcome.result.unwrap();
    assert_eq!(delivery.provenance.origin, "standard");
    assert_eq!(
        outcome.excluded,
        vec![source("premium", 0), source("premium", 1)]
    );
    assert_eq!(setup.proxy.calls().len(), 1);
}
