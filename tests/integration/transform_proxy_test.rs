// HTTP transformation proxy adapter against a mock proxy

use kitsune::config::TransformConfig;
use kitsune::range::RangeRequest;
use kitsune::transform::{HttpTransformProxy, ProxyFailure, TransformOptions, TransformProxy};
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCE_URL: &str = "https://origin.example.com/media/a.mp4";

async fn proxy_with(server: &MockServer) -> HttpTransformProxy {
    let mut config = TransformConfig::new(format!("{}/cdn-cgi/media", server.uri()));
    config.timeout_ms = 2_000;
    HttpTransformProxy::new(config).unwrap()
}

fn options() -> TransformOptions {
    TransformOptions::from_pairs([("width", "320"), ("mode", "video")])
}

#[tokio::test]
async fn test_success_returns_transformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cdn-cgi/media/mode=video,width=320/https:/+origin\.example\.com/media/a\.mp4$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(b"transformed".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy_with(&server).await;
    let asset = proxy.transform(SOURCE_URL, &options(), None).await.unwrap();

    assert_eq!(asset.status, 200);
    assert_eq!(asset.body.as_ref(), b"transformed");
    assert_eq!(asset.content_type.as_deref(), Some("video/mp4"));
}

#[tokio::test]
async fn test_range_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=0-3"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-3/11")
                .set_body_bytes(b"tran".to_vec()),
        )
        .mount(&server)
        .await;

    let proxy = proxy_with(&server).await;
    let asset = proxy
        .transform(
            SOURCE_URL,
            &options(),
            Some(RangeRequest::Bounded { start: 0, end: 3 }),
        )
        .await
        .unwrap();

    assert_eq!(asset.status, 206);
    assert_eq!(asset.content_range.as_deref(), Some("bytes 0-3/11"));
}

#[tokio::test]
async fn test_not_found_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("source not found"))
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(failure, ProxyFailure::NotFound { status: 404 });
}

#[tokio::test]
async fn test_error_code_header_overrides_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(415)
                .insert_header("cf-resized", "9404")
                .set_body_string("could not fetch input"),
        )
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(failure, ProxyFailure::NotFound { status: 415 });
}

#[tokio::test]
async fn test_size_limit_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(413).set_body_string("input file size exceeds limit of 256MB"),
        )
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(
        failure,
        ProxyFailure::SizeLimitExceeded {
            status: 413,
            limit_bytes: Some(256 * 1024 * 1024),
        }
    );
}

#[tokio::test]
async fn test_duration_limit_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("duration must be between 1s and 2m"),
        )
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(
        failure,
        ProxyFailure::DurationLimitExceeded {
            status: 400,
            min_secs: Some(1.0),
            max_secs: Some(120.0),
        }
    );
}

#[tokio::test]
async fn test_rate_limit_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(failure, ProxyFailure::RateLimited { status: 429 });
}

#[tokio::test]
async fn test_server_error_is_proxy_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal failure"))
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(
        failure,
        ProxyFailure::ProxyError {
            status: 500,
            message: "internal failure".to_string(),
        }
    );
}

#[tokio::test]
async fn test_server_error_mentioning_duration_is_proxy_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("internal error while probing duration of input"),
        )
        .mount(&server)
        .await;

    let failure = proxy_with(&server)
        .await
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert!(matches!(failure, ProxyFailure::ProxyError { status: 500, .. }));
}

#[tokio::test]
async fn test_timeout_is_504() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut config = TransformConfig::new(server.uri());
    config.timeout_ms = 100;
    let proxy = HttpTransformProxy::new(config).unwrap();

    let failure = proxy
        .transform(SOURCE_URL, &options(), None)
        .await
        .unwrap_err();
    assert_eq!(failure.status(), 504);
}
