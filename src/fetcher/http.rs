// HTTP source fetcher for remote and fallback origins

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeMap;

use super::auth::{auth_headers, is_auth_failure};
use super::{Body, FetchMethod, FetchRequest, FetchResult, FetchedObject, StreamedObject};
use crate::error::EdgeError;
use crate::origin::Source;
use crate::range::parse_content_range;

#[derive(Clone, Debug)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, source: &Source, url: &str, request: &FetchRequest) -> FetchResult {
        let response = match self.send(source, url, request).await {
            Ok(response) => response,
            Err(rejected) => return rejected.into_result(),
        };
        let mut object = object_head(&response);

        if request.method == FetchMethod::Get && object.status != 304 {
            object.body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    return FetchResult::Error {
                        status: Some(object.status),
                        message: format!("Failed to read origin body: {}", e),
                    };
                }
            };
            object.content_length = object.body.len() as u64;
            if object.status == 200 && object.total_size.is_none() {
                object.total_size = Some(object.content_length);
            }
        }

        FetchResult::Found(object)
    }

    /// Like [`fetch`](Self::fetch), but the body is passed on as it arrives
    pub async fn fetch_stream(
        &self,
        source: &Source,
        url: &str,
        request: &FetchRequest,
    ) -> FetchResult<StreamedObject> {
        let response = match self.send(source, url, request).await {
            Ok(response) => response,
            Err(rejected) => return rejected.into_result(),
        };
        let head = object_head(&response);

        if request.method == FetchMethod::Head || head.status == 304 {
            return FetchResult::Found(StreamedObject {
                head,
                body: Body::empty(),
            });
        }

        let status = head.status;
        let declared = (head.content_length > 0).then_some(head.content_length);
        let stream = response
            .bytes_stream()
            .map_err(move |e| {
                EdgeError::Storage(format!("Origin body interrupted (status {}): {}", status, e))
            })
            .boxed();

        FetchResult::Found(StreamedObject {
            head,
            body: Body::from_stream(declared, stream),
        })
    }

    /// Send the request; anything but a usable response is already a result
    async fn send(
        &self,
        source: &Source,
        url: &str,
        request: &FetchRequest,
    ) -> Result<reqwest::Response, Rejected> {
        let http_method = request.method.as_str();

        let mut headers: BTreeMap<String, String> = source
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        if let Some(range) = request.range {
            headers.insert("range".to_string(), range.to_header_value());
        }
        if let Some(etag) = &request.if_none_match {
            headers.insert("if-none-match".to_string(), etag.clone());
        }
        if let Some(since) = &request.if_modified_since {
            headers.insert("if-modified-since".to_string(), since.clone());
        }

        if let Some(auth) = &source.auth {
            headers = match auth_headers(&auth.method, http_method, url, &headers) {
                Ok(headers) => headers,
                Err(e) if auth.permissive => {
                    tracing::warn!(
                        source = %source.id,
                        error = %e,
                        "Request signing failed on permissive source, treating as not found"
                    );
                    return Err(Rejected::NotFound);
                }
                Err(e) => {
                    return Err(Rejected::Error {
                        status: None,
                        message: format!("Request signing failed: {}", e),
                    });
                }
            };
        }

        let mut builder = match request.method {
            FetchMethod::Get => self.client.get(url),
            FetchMethod::Head => self.client.head(url),
        };
        builder = builder.timeout(source.timeout);
        for (name, value) in &headers {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("Timed out after {:?}", source.timeout)
                } else {
                    format!("HTTP fetch failed: {}", e)
                };
                return Err(Rejected::Error {
                    status: None,
                    message,
                });
            }
        };

        let status = response.status().as_u16();

        if status == 404 || status == 410 {
            return Err(Rejected::NotFound);
        }

        if is_auth_failure(status) {
            if source.is_permissive() {
                tracing::debug!(
                    source = %source.id,
                    status = status,
                    "Authentication rejected on permissive source, treating as not found"
                );
                return Err(Rejected::NotFound);
            }
            return Err(Rejected::Error {
                status: Some(status),
                message: "Origin rejected credentials".to_string(),
            });
        }

        let success = response.status().is_success() || status == 304;
        if !success {
            return Err(Rejected::Error {
                status: Some(status),
                message: format!("Origin returned status {}", status),
            });
        }

        Ok(response)
    }
}

enum Rejected {
    NotFound,
    Error { status: Option<u16>, message: String },
}

impl Rejected {
    fn into_result<T>(self) -> FetchResult<T> {
        match self {
            Rejected::NotFound => FetchResult::NotFound,
            Rejected::Error { status, message } => FetchResult::Error { status, message },
        }
    }
}

/// Everything but the body, taken from the response headers
fn object_head(response: &reqwest::Response) -> FetchedObject {
    let status = response.status().as_u16();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let declared_length = header("content-length").and_then(|v| v.parse::<u64>().ok());
    let content_range = header("content-range")
        .as_deref()
        .and_then(parse_content_range);

    let (range, total_size) = match content_range {
        Some((range, total)) => (Some(range), total),
        None => (None, declared_length),
    };
    let content_length = if status == 304 {
        0
    } else {
        declared_length.unwrap_or(0)
    };

    FetchedObject {
        status,
        body: Bytes::new(),
        content_type: header("content-type"),
        content_length,
        total_size,
        range,
        etag: header("etag"),
        last_modified: header("last-modified"),
    }
}
