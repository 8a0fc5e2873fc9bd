// Failover across remote HTTP origins, with the proxy mocked

use kitsune::config::{Config, SourceType};
use kitsune::context::RequestContext;
use kitsune::failover::FailoverCoordinator;
use kitsune::fetcher::{DefaultSourceFetcher, HttpSourceFetcher};
use kitsune::orchestrator::FetchOrchestrator;
use kitsune::origin::{shared, OriginRegistry, SourceId};
use kitsune::transform::{HttpTransformProxy, TransformOptions};
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinator(premium: &MockServer, standard: &MockServer, proxy: &MockServer) -> FailoverCoordinator {
    let yaml = format!(
        r#"
transform:
  proxy_base_url: "{proxy}"
origins:
  - name: premium
    matcher: "^/videos/(?P<id>[^/]+)$"
    sources:
      - type: remote_http
        priority: 0
        url: "{premium}"
        path: "hot/{{id}}"
      - type: remote_http
        priority: 1
        url: "{premium}"
        path: "cold/{{id}}"
  - name: standard
    matcher: "^/videos/(.+)$"
    sources:
      - type: remote_http
        priority: 0
        url: "{standard}"
        path: "standard/{{1}}"
"#,
        proxy = proxy.uri(),
        premium = premium.uri(),
        standard = standard.uri(),
    );
    let config = Config::from_yaml_with_env(&yaml).unwrap();
    config.validate().unwrap();

    let registry = shared(OriginRegistry::from_config(&config).unwrap());
    let fetcher = DefaultSourceFetcher::new(HttpSourceFetcher::new().unwrap());
    let proxy = HttpTransformProxy::new(config.transform.clone()).unwrap();
    FailoverCoordinator::new(
        FetchOrchestrator::new(registry, Arc::new(fetcher)),
        Arc::new(proxy),
    )
}

fn remote(origin: &str, priority: u32) -> SourceId {
    SourceId {
        origin: origin.to_string(),
        kind: SourceType::RemoteHttp,
        priority,
    }
}

#[tokio::test]
async fn test_missing_remote_sources_are_reported_as_excluded() {
    let premium = MockServer::start().await;
    let standard = MockServer::start().await;
    let proxy = MockServer::start().await;
    for prefix in ["/hot/a.mp4", "/cold/a.mp4"] {
        Mock::given(method("HEAD"))
            .and(path(prefix))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&premium)
            .await;
    }
    Mock::given(method("HEAD"))
        .and(path("/standard/a.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&standard)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/standard/a\.mp4$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(b"standard-transformed".to_vec()),
        )
        .expect(1)
        .mount(&proxy)
        .await;

    let failover = coordinator(&premium, &standard, &proxy);
    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = failover
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    let delivery = outcome.result.unwrap();
    assert_eq!(delivery.provenance.origin, "standard");
    assert_eq!(
        delivery.body.as_bytes().unwrap().as_ref(),
        b"standard-transformed"
    );
    assert_eq!(outcome.excluded, vec![remote("premium", 0), remote("premium", 1)]);
    assert_eq!(ctx.attempts().len(), 3);
}

#[tokio::test]
async fn test_failing_remote_source_is_not_excluded() {
    let premium = MockServer::start().await;
    let standard = MockServer::start().await;
    let proxy = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/hot/a.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&premium)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/cold/a.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&premium)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/cold/a\.mp4$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cold-transformed".to_vec()))
        .expect(1)
        .mount(&proxy)
        .await;

    let failover = coordinator(&premium, &standard, &proxy);
    let mut ctx = RequestContext::new("/videos/a.mp4");
    let outcome = failover
        .deliver("/videos/a.mp4", &TransformOptions::new(), None, &mut ctx)
        .await;

    assert_eq!(outcome.result.unwrap().provenance.priority, 1);
    assert!(outcome.excluded.is_empty());
}
