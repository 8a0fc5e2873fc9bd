// Transformation proxy adapter
//
// Forwards a resolved source URL and the transform options to the external
// transformation proxy and classifies its answer.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::config::TransformConfig;
use crate::metrics::EdgeMetrics;
use crate::range::RangeRequest;

pub mod codes;
pub mod options;

pub use codes::{classify, Classification, ProxyFailure};
pub use options::TransformOptions;

/// A successfully transformed asset
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedAsset {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub content_range: Option<String>,
}

impl TransformedAsset {
    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }
}

#[async_trait]
pub trait TransformProxy: Send + Sync {
    async fn transform(
        &self,
        source_url: &str,
        options: &TransformOptions,
        range: Option<RangeRequest>,
    ) -> Result<TransformedAsset, ProxyFailure>;
}

/// `{proxy_base_url}/{option string}/{source url}`
pub fn build_proxy_url(proxy_base_url: &str, options: &TransformOptions, source_url: &str) -> String {
    let base = proxy_base_url.trim_end_matches('/');
    if options.is_empty() {
        format!("{}/{}", base, source_url)
    } else {
        format!("{}/{}/{}", base, options.option_string(), source_url)
    }
}

pub struct HttpTransformProxy {
    client: reqwest::Client,
    config: TransformConfig,
}

impl HttpTransformProxy {
    pub fn new(config: TransformConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }
}

#[async_trait]
impl TransformProxy for HttpTransformProxy {
    async fn transform(
        &self,
        source_url: &str,
        options: &TransformOptions,
        range: Option<RangeRequest>,
    ) -> Result<TransformedAsset, ProxyFailure> {
        let url = build_proxy_url(&self.config.proxy_base_url, options, source_url);

        let mut request = self.client.get(&url);
        if let Some(range) = range {
            request = request.header("range", range.to_header_value());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let status = if e.is_timeout() { 504 } else { 502 };
                EdgeMetrics::global().record_proxy_outcome("proxy_error");
                tracing::warn!(url = %url, status = status, error = %e, "Transformation proxy unreachable");
                return Err(ProxyFailure::ProxyError {
                    status,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        let error_code = header(self.config.error_code_header.as_str()).and_then(|v| v.parse::<u32>().ok());
        let content_type = header("content-type");
        let content_range = header("content-range");

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                EdgeMetrics::global().record_proxy_outcome("proxy_error");
                return Err(ProxyFailure::ProxyError {
                    status: 502,
                    message: format!("Failed to read proxy body: {}", e),
                });
            }
        };

        let message = if (200..300).contains(&status) {
            String::new()
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };

        match classify(status, error_code, &message) {
            Classification::Success => {
                EdgeMetrics::global().record_proxy_outcome("success");
                Ok(TransformedAsset {
                    status,
                    body,
                    content_type,
                    content_range,
                })
            }
            Classification::Failure(failure) => {
                EdgeMetrics::global().record_proxy_outcome(failure.outcome());
                tracing::info!(
                    status = status,
                    error_code = ?error_code,
                    code_description = error_code.and_then(codes::describe_code).unwrap_or(""),
                    outcome = failure.outcome(),
                    "Transformation proxy declined request"
                );
                Err(failure)
            }
        }
    }
}
