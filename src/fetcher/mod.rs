//! Source fetcher
//!
//! Fetches an asset (or checks that it exists) from a single source. Every
//! outcome is one of three: the asset was found, it is definitely not there
//! (so the caller may move on to the next candidate), or the source failed.
//! Timeouts are always failures, never "not found".

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, SourceType};
use crate::error::EdgeError;
use crate::metrics::EdgeMetrics;
use crate::origin::Source;
use crate::range::{ByteRange, RangeRequest};

pub mod auth;
pub mod body;
pub mod http;
pub mod object_store;

pub use body::{Body, ByteStream};
pub use http::HttpSourceFetcher;
pub use object_store::{
    MemoryObjectStore, ObjectMeta, ObjectStore, ObjectStoreError, S3ObjectStore, StoredObject,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMethod {
    #[default]
    Get,
    /// Existence probe; the body is not transferred
    Head,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Get => "GET",
            FetchMethod::Head => "HEAD",
        }
    }
}

/// Per-request fetch parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub range: Option<RangeRequest>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn head() -> Self {
        Self {
            method: FetchMethod::Head,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: Option<RangeRequest>) -> Self {
        self.range = range;
        self
    }
}

/// An object returned by a source
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedObject {
    /// 200, 206 for a partial body, 304 when a conditional request matched
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Length of `body`, or the declared length for HEAD
    pub content_length: u64,
    /// Size of the full representation when known
    pub total_size: Option<u64>,
    pub range: Option<ByteRange>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FetchedObject {
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// `Content-Range` value for partial responses
    pub fn content_range(&self) -> Option<String> {
        let range = self.range?;
        Some(match self.total_size {
            Some(total) => range.content_range(total),
            None => format!("bytes {}-{}/*", range.start, range.end),
        })
    }
}

/// A found object whose body is still arriving
///
/// `head.body` is empty; `head.content_length` is the declared length, or 0
/// when the source did not send one.
#[derive(Debug)]
pub struct StreamedObject {
    pub head: FetchedObject,
    pub body: Body,
}

impl StreamedObject {
    /// Wrap an object that was already read into memory
    pub fn buffered(mut object: FetchedObject) -> Self {
        let body = Body::Full(std::mem::take(&mut object.body));
        Self { head: object, body }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult<T = FetchedObject> {
    Found(T),
    NotFound,
    Error { status: Option<u16>, message: String },
}

impl<T> FetchResult<T> {
    pub fn outcome(&self) -> &'static str {
        match self {
            FetchResult::Found(_) => "found",
            FetchResult::NotFound => "not_found",
            FetchResult::Error { .. } => "error",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        match self {
            FetchResult::Found(found) => FetchResult::Found(f(found)),
            FetchResult::NotFound => FetchResult::NotFound,
            FetchResult::Error { status, message } => FetchResult::Error { status, message },
        }
    }
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source, resolved_path: &str, request: &FetchRequest) -> FetchResult;

    /// GET whose body is handed over as it arrives
    ///
    /// The default reads the body into memory first.
    async fn fetch_stream(
        &self,
        source: &Source,
        resolved_path: &str,
        request: &FetchRequest,
    ) -> FetchResult<StreamedObject> {
        self.fetch(source, resolved_path, request)
            .await
            .map(StreamedObject::buffered)
    }
}

/// Fetcher that dispatches on the source kind
#[derive(Clone)]
pub struct DefaultSourceFetcher {
    http: HttpSourceFetcher,
    object_stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl DefaultSourceFetcher {
    pub fn new(http: HttpSourceFetcher) -> Self {
        Self {
            http,
            object_stores: HashMap::new(),
        }
    }

    /// Build a fetcher with an S3 binding for every configured object store
    pub async fn from_config(config: &Config) -> Result<Self, EdgeError> {
        let http = HttpSourceFetcher::new().map_err(EdgeError::Validation)?;
        let mut fetcher = Self::new(http);
        for (binding, store_config) in &config.object_stores {
            let store = S3ObjectStore::from_config(store_config).await;
            fetcher = fetcher.with_object_store(binding.clone(), Arc::new(store));
        }
        Ok(fetcher)
    }

    pub fn with_object_store(mut self, binding: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.object_stores.insert(binding.into(), store);
        self
    }

    async fn fetch_object(&self, source: &Source, key: &str, request: &FetchRequest) -> FetchResult {
        let binding = source.bucket.as_deref().unwrap_or_default();
        let Some(store) = self.object_stores.get(binding) else {
            return FetchResult::Error {
                status: None,
                message: format!("No object store bound to '{}'", binding),
            };
        };
        let key = key.trim_start_matches('/');

        let found = match request.method {
            FetchMethod::Head => store.head(key).await.map(|meta| {
                meta.map(|meta| StoredObject {
                    body: Bytes::new(),
                    meta,
                    range: None,
                })
            }),
            FetchMethod::Get => store.get(key, request.range).await,
        };

        match found {
            Ok(Some(object)) => FetchResult::Found(object_to_fetched(object, request)),
            Ok(None) => FetchResult::NotFound,
            Err(ObjectStoreError::RangeNotSatisfiable { total_size }) => FetchResult::Error {
                status: Some(416),
                message: format!("Range not satisfiable (total size {})", total_size),
            },
            Err(e) => FetchResult::Error {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

fn object_to_fetched(object: StoredObject, request: &FetchRequest) -> FetchedObject {
    let not_modified = match (&request.if_none_match, &object.meta.etag) {
        (Some(wanted), Some(etag)) => wanted == etag || wanted == "*",
        _ => false,
    };

    let status = if not_modified {
        304
    } else if object.range.is_some() {
        206
    } else {
        200
    };
    let content_length = if request.method == FetchMethod::Head {
        object.meta.total_size
    } else if not_modified {
        0
    } else {
        object.body.len() as u64
    };

    FetchedObject {
        status,
        body: if not_modified { Bytes::new() } else { object.body },
        content_type: object.meta.content_type,
        content_length,
        total_size: Some(object.meta.total_size),
        range: if not_modified { None } else { object.range },
        etag: object.meta.etag,
        last_modified: object.meta.last_modified,
    }
}

impl DefaultSourceFetcher {
    fn source_url(source: &Source, resolved_path: &str) -> Result<String, String> {
        source
            .url_for(resolved_path)
            .ok_or_else(|| format!("Source {} has no base URL", source.id))
    }

    /// Bound an attempt by the source timeout and record its outcome
    async fn timed<T>(
        &self,
        source: &Source,
        resolved_path: &str,
        request: &FetchRequest,
        attempt: impl std::future::Future<Output = FetchResult<T>>,
    ) -> FetchResult<T> {
        let result = match tokio::time::timeout(source.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => FetchResult::Error {
                status: None,
                message: format!("Timed out after {:?}", source.timeout),
            },
        };

        EdgeMetrics::global().record_source_attempt(source.kind().as_str(), result.outcome());
        tracing::debug!(
            source = %source.id,
            path = resolved_path,
            method = request.method.as_str(),
            outcome = result.outcome(),
            "Source fetch finished"
        );

        result
    }
}

#[async_trait]
impl SourceFetcher for DefaultSourceFetcher {
    async fn fetch(&self, source: &Source, resolved_path: &str, request: &FetchRequest) -> FetchResult {
        let attempt = async {
            match source.kind() {
                SourceType::ObjectStorage => self.fetch_object(source, resolved_path, request).await,
                SourceType::RemoteHttp | SourceType::FallbackHttp => {
                    match Self::source_url(source, resolved_path) {
                        Ok(url) => self.http.fetch(source, &url, request).await,
                        Err(message) => FetchResult::Error {
                            status: None,
                            message,
                        },
                    }
                }
            }
        };
        self.timed(source, resolved_path, request, attempt).await
    }

    /// Object stores are read into memory; HTTP sources stream
    async fn fetch_stream(
        &self,
        source: &Source,
        resolved_path: &str,
        request: &FetchRequest,
    ) -> FetchResult<StreamedObject> {
        let attempt = async {
            match source.kind() {
                SourceType::ObjectStorage => self
                    .fetch_object(source, resolved_path, request)
                    .await
                    .map(StreamedObject::buffered),
                SourceType::RemoteHttp | SourceType::FallbackHttp => {
                    match Self::source_url(source, resolved_path) {
                        Ok(url) => self.http.fetch_stream(source, &url, request).await,
                        Err(message) => FetchResult::Error {
                            status: None,
                            message,
                        },
                    }
                }
            }
        };
        // The timeout covers the response head; the body is bounded by the
        // HTTP client's own request timeout
        self.timed(source, resolved_path, request, attempt).await
    }
}
