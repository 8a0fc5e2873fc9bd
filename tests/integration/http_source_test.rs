// Remote and fallback HTTP sources through the fetch orchestrator

use kitsune::config::Config;
use kitsune::context::{AttemptOutcome, RequestContext};
use kitsune::fetcher::{DefaultSourceFetcher, FetchRequest, FetchResult, HttpSourceFetcher};
use kitsune::orchestrator::{ExclusionSet, FetchOrchestrator, OrchestratedFetch};
use kitsune::origin::{shared, OriginRegistry};
use kitsune::range::RangeRequest;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn orchestrator(remote: &MockServer, fallback: &MockServer, permissive: bool) -> FetchOrchestrator {
    let yaml = format!(
        r#"
transform:
  proxy_base_url: "https://media.example.com"
origins:
  - name: videos
    matcher: "^/videos/(?P<id>[^/]+)$"
    sources:
      - type: remote_http
        priority: 0
        url: "{remote}"
        path: "media/{{id}}"
        headers:
          x-edge: kitsune
        auth:
          type: bearer
          token: s3cret
          permissive: {permissive}
      - type: fallback_http
        priority: 1
        url: "{fallback}"
        path: "backup/{{id}}"
"#,
        remote = remote.uri(),
        fallback = fallback.uri(),
        permissive = permissive,
    );
    let config = Config::from_yaml_with_env(&yaml).unwrap();
    config.validate().unwrap();
    let registry = shared(OriginRegistry::from_config(&config).unwrap());
    let fetcher = DefaultSourceFetcher::new(HttpSourceFetcher::new().unwrap());
    FetchOrchestrator::new(registry, Arc::new(fetcher))
}

async fn run(orchestrator: &FetchOrchestrator, request: FetchRequest) -> (OrchestratedFetch, RequestContext) {
    let mut ctx = RequestContext::new("/videos/a.mp4");
    let result = orchestrator
        .fetch_with_origins("/videos/a.mp4", &request, &mut ExclusionSet::new(), &mut ctx)
        .await;
    (result, ctx)
}

#[tokio::test]
async fn test_remote_source_sends_auth_and_headers() {
    let remote = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/a.mp4"))
        .and(header("authorization", "Bearer s3cret"))
        .and(header("x-edge", "kitsune"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .insert_header("etag", "\"abc\"")
                .set_body_bytes(b"remote-bytes".to_vec()),
        )
        .expect(1)
        .mount(&remote)
        .await;

    let (result, ctx) = run(&orchestrator(&remote, &fallback, false), FetchRequest::get()).await;

    match result {
        OrchestratedFetch::Found(found) => {
            assert_eq!(found.object.body.as_ref(), b"remote-bytes");
            assert_eq!(found.object.content_type.as_deref(), Some("video/mp4"));
            assert_eq!(found.object.etag.as_deref(), Some("\"abc\""));
            assert_eq!(
                found.provenance.source_url,
                Some(format!("{}/media/a.mp4", remote.uri()))
            );
        }
        other => panic!("expected a source, got {:?}", other),
    }
    assert_eq!(ctx.attempts().len(), 1);
}

#[tokio::test]
async fn test_not_found_moves_to_fallback() {
    let remote = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/media/a.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&remote)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/backup/a.mp4"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "42"))
        .mount(&fallback)
        .await;

    let (result, ctx) = run(&orchestrator(&remote, &fallback, false), FetchRequest::head()).await;

    match result {
        OrchestratedFetch::Found(found) => {
            assert_eq!(found.provenance.priority, 1);
            assert!(found.object.body.is_empty());
        }
        other => panic!("expected the fallback source, got {:?}", other),
    }
    let outcomes: Vec<&AttemptOutcome> = ctx.attempts().iter().map(|a| &a.outcome).collect();
    assert_eq!(outcomes, vec![&AttemptOutcome::NotFound, &AttemptOutcome::Found]);
}

#[tokio::test]
async fn test_rejected_credentials_are_an_error_unless_permissive() {
    for permissive in [false, true] {
        let remote = MockServer::start().await;
        let fallback = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&remote)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fallback"))
            .mount(&fallback)
            .await;

        let (result, ctx) = run(&orchestrator(&remote, &fallback, permissive), FetchRequest::get()).await;

        assert!(matches!(result, OrchestratedFetch::Found(_)));
        let first = &ctx.attempts()[0].outcome;
        if permissive {
            assert_eq!(first, &AttemptOutcome::NotFound);
        } else {
            assert!(matches!(first, AttemptOutcome::Error { status: Some(403), .. }));
        }
    }
}

#[tokio::test]
async fn test_all_sources_failing_is_reported() {
    let remote = MockServer::start().await;
    let fallback = MockServer::start().await;
    for server in [&remote, &fallback] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(server)
            .await;
    }

    let (result, _) = run(&orchestrator(&remote, &fallback, false), FetchRequest::get()).await;

    match result {
        OrchestratedFetch::Exhausted { matched, all_errors } => {
            assert!(matched);
            assert!(all_errors);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_range_request_is_forwarded() {
    let remote = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=2-5"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 2-5/12")
                .set_body_bytes(b"mote".to_vec()),
        )
        .mount(&remote)
        .await;

    let request = FetchRequest::get().with_range(Some(RangeRequest::Bounded { start: 2, end: 5 }));
    let (result, _) = run(&orchestrator(&remote, &fallback, false), request).await;

    match result {
        OrchestratedFetch::Found(found) => {
            assert!(found.object.is_partial());
            assert_eq!(found.object.total_size, Some(12));
            assert_eq!(found.object.content_range().as_deref(), Some("bytes 2-5/12"));
        }
        other => panic!("expected a partial object, got {:?}", other),
    }
}

#[tokio::test]
async fn test_streamed_range_keeps_declared_length() {
    let remote = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/a.mp4"))
        .and(header("range", "bytes=2-5"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 2-5/12")
                .set_body_bytes(b"mote".to_vec()),
        )
        .expect(1)
        .mount(&remote)
        .await;

    let orchestrator = orchestrator(&remote, &fallback, false);
    let source = orchestrator.registry().load().origin("videos").unwrap().sources[0].clone();
    let request = FetchRequest::get().with_range(Some(RangeRequest::Bounded { start: 2, end: 5 }));

    match orchestrator
        .fetch_source_stream(&source, "media/a.mp4", &request)
        .await
    {
        FetchResult::Found(object) => {
            assert_eq!(object.head.status, 206);
            assert_eq!(object.head.content_range().as_deref(), Some("bytes 2-5/12"));
            assert!(object.body.is_stream());
            assert_eq!(object.body.len(), Some(4));
            assert_eq!(object.body.collect().await.unwrap().as_ref(), b"mote");
        }
        other => panic!("expected a streamed object, got {:?}", other),
    }
}
