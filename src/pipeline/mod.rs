// Request pipeline module - cache lookup, failover delivery and response assembly
//
// One request flows: cache key (pattern version) -> cache lookup (transformed,
// then original variant) -> on miss, failover delivery -> background work
// (persist result or a not-found marker, cache originals, version bumps,
// refreshes). Every response carries the diagnostics headers of its
// RequestContext.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use crate::context::{
    AttemptOutcome, CacheStatus, FallbackKind, Provenance, RequestContext, SourceAttempt,
};

use crate::background::BackgroundTasks;
use crate::cache::{CacheEntry, CacheKey, CacheStore, EntryInfo, KvStore, VersionRegistry};
use crate::config::CacheSettings;
use crate::error::EdgeError;
use crate::failover::{Delivery, FailoverCoordinator, FollowUp};
use crate::fetcher::Body;
use crate::metrics::EdgeMetrics;
use crate::origin::Origin;
use crate::range::RangeRequest;
use crate::transform::TransformOptions;

/// Cache store plus the version counters that key it
#[derive(Clone)]
pub struct CacheLayer {
    store: CacheStore,
    versions: Arc<VersionRegistry>,
}

impl CacheLayer {
    pub fn new(kv: Arc<dyn KvStore>, settings: CacheSettings) -> Self {
        let store = CacheStore::new(Arc::clone(&kv), settings);
        let versions = VersionRegistry::new(
            kv,
            store.writer().clone(),
            &store.settings().key_prefix,
            Duration::from_secs(store.settings().version_cache_ttl_seconds),
        );
        Self {
            store,
            versions: Arc::new(versions),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn versions(&self) -> &Arc<VersionRegistry> {
        &self.versions
    }

    fn prefix(&self) -> &str {
        &self.store.settings().key_prefix
    }
}

/// A request for a transformed asset
#[derive(Debug, Clone, Default)]
pub struct MediaRequest {
    pub path: String,
    pub options: TransformOptions,
    pub range: Option<RangeRequest>,
}

impl MediaRequest {
    pub fn new(path: impl Into<String>, options: TransformOptions) -> Self {
        Self {
            path: path.into(),
            options,
            range: None,
        }
    }

    pub fn with_range(mut self, range: Option<RangeRequest>) -> Self {
        self.range = range;
        self
    }
}

/// Response handed back to the host
///
/// Untransformed originals arrive as a stream; the host forwards the pieces.
#[derive(Debug)]
pub struct MediaResponse {
    pub status: u16,
    pub body: Body,
    pub headers: BTreeMap<String, String>,
}

impl MediaResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn from_parts(
        status: u16,
        body: Body,
        content_type: Option<&str>,
        content_range: Option<String>,
    ) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(length) = body.len() {
            headers.insert("Content-Length".to_string(), length.to_string());
        }
        headers.insert("Accept-Ranges".to_string(), "bytes".to_string());
        if let Some(content_type) = content_type {
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        if let Some(content_range) = content_range {
            headers.insert("Content-Range".to_string(), content_range);
        }
        Self { status, body, headers }
    }

    fn from_entry(entry: CacheEntry) -> Self {
        let status = entry.status();
        let content_range = entry.content_range();
        let content_type = entry.metadata.content_type.clone();
        Self::from_parts(status, Body::Full(entry.body), content_type.as_deref(), content_range)
    }

    fn from_delivery(delivery: Delivery) -> Self {
        Self::from_parts(
            delivery.status,
            delivery.body,
            delivery.content_type.as_deref(),
            delivery.content_range,
        )
    }

    fn from_error(error: &EdgeError) -> Self {
        let body = Body::Full(Bytes::from(error.to_string()));
        let mut response = Self::from_parts(error.http_status(), body, Some("text/plain"), None);
        response.headers.remove("Accept-Ranges");
        if let EdgeError::RangeNotSatisfiable { total_size } = error {
            response
                .headers
                .insert("Content-Range".to_string(), format!("bytes */{}", total_size));
        }
        response
    }
}

pub struct MediaPipeline {
    failover: Arc<FailoverCoordinator>,
    cache: Option<CacheLayer>,
    background: Arc<BackgroundTasks>,
}

impl MediaPipeline {
    pub fn new(
        failover: FailoverCoordinator,
        cache: Option<CacheLayer>,
        max_background_tasks: usize,
    ) -> Self {
        Self {
            failover: Arc::new(failover),
            cache,
            background: Arc::new(BackgroundTasks::new(max_background_tasks)),
        }
    }

    pub fn cache(&self) -> Option<&CacheLayer> {
        self.cache.as_ref()
    }

    pub fn background(&self) -> &Arc<BackgroundTasks> {
        &self.background
    }

    /// Serve one request, turning every error into a response
    pub async fn handle(&self, request: &MediaRequest) -> MediaResponse {
        let mut ctx = RequestContext::new(request.path.clone());
        let result = self.deliver(request, &mut ctx).await;

        let (mut response, label) = match result {
            Ok(response) => {
                let label = match ctx.cache_status() {
                    Some(CacheStatus::Hit) => "hit",
                    Some(CacheStatus::Miss) => "miss",
                    Some(CacheStatus::Bypass) | None => "bypass",
                };
                (response, label)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = ctx.request_id(),
                    path = %request.path,
                    status = e.http_status(),
                    error_type = e.error_type(),
                    error = %e,
                    "Delivery failed"
                );
                (MediaResponse::from_error(&e), "error")
            }
        };

        response.headers.extend(ctx.diagnostics_headers());
        EdgeMetrics::global().observe_delivery(label, ctx.elapsed_secs());
        tracing::info!(
            request_id = ctx.request_id(),
            path = %request.path,
            status = response.status,
            cache = label,
            bytes = response.body.len(),
            streamed = response.body.is_stream(),
            elapsed_secs = ctx.elapsed_secs(),
            "Request served"
        );
        response
    }

    /// Serve one request from the cache or through failover delivery
    pub async fn deliver(
        &self,
        request: &MediaRequest,
        ctx: &mut RequestContext,
    ) -> Result<MediaResponse, EdgeError> {
        let pattern = self.failover.primary_pattern(&request.path);
        let cache = self.cache_for(&request.path);

        let mut keys = None;
        let resolved = match (cache, pattern.as_deref()) {
            (Some(cache), Some(pattern)) => match cache.versions.current(pattern).await {
                Ok(version) => Some((cache, version)),
                Err(e) => {
                    tracing::warn!(
                        request_id = ctx.request_id(),
                        pattern = pattern,
                        error = %e,
                        "Cache version unknown, bypassing cache"
                    );
                    None
                }
            },
            _ => None,
        };

        if let Some((cache, version)) = resolved {
            let key = CacheKey::derive(cache.prefix(), &request.path, &request.options, version);
            let original_key = CacheKey::original(cache.prefix(), &request.path, version);

            for lookup in [&key, &original_key] {
                if let Some(entry) = cache.store.get(lookup, request.range).await? {
                    ctx.set_cache_status(CacheStatus::Hit);
                    if entry.metadata.is_negative() {
                        return Err(negative_hit(&request.path, entry.metadata.status));
                    }
                    if entry.metadata.fallback_original {
                        ctx.set_fallback(FallbackKind::SizeLimitOriginal);
                    }
                    self.schedule_refresh(cache, lookup, &entry, ctx);
                    return Ok(MediaResponse::from_entry(entry));
                }
            }

            ctx.set_cache_status(CacheStatus::Miss);
            keys = Some((key, version));
        } else {
            ctx.set_cache_status(CacheStatus::Bypass);
        }

        let outcome = self
            .failover
            .deliver(&request.path, &request.options, request.range, ctx)
            .await;

        let version = keys.as_ref().map(|(_, v)| *v);
        for follow_up in outcome.follow_ups {
            self.schedule_follow_up(follow_up, &request.path, version);
        }

        let delivery = match outcome.result {
            Ok(delivery) => delivery,
            Err(e) => {
                let negative_status = match &e {
                    EdgeError::NotFound(_) => Some(404),
                    EdgeError::Storage(_) => Some(502),
                    _ => None,
                };
                if let (Some(status), Some(cache), Some((key, version))) = (negative_status, cache, keys) {
                    self.schedule_negative(cache, key, version, status, &request.path);
                }
                return Err(e);
            }
        };
        if let (Some(cache), Some((key, version))) = (cache, keys) {
            self.schedule_persist(cache, key, version, &delivery);
        }
        Ok(MediaResponse::from_delivery(delivery))
    }

    /// Wait for all background work started by earlier requests
    pub async fn drain(&self) -> usize {
        self.background.drain().await
    }

    fn cache_for(&self, path: &str) -> Option<&CacheLayer> {
        let cache = self.cache.as_ref()?;
        if !cache.store.settings().enabled {
            return None;
        }
        let cacheable = self.primary_origin(path).map_or(true, |origin| origin.cacheable);
        cacheable.then_some(cache)
    }

    fn primary_origin(&self, path: &str) -> Option<Arc<Origin>> {
        let registry = self.failover.orchestrator().registry().load();
        registry.matches(path).into_iter().next().map(|m| m.origin)
    }

    fn schedule_refresh(
        &self,
        cache: &CacheLayer,
        key: &CacheKey,
        entry: &CacheEntry,
        ctx: &mut RequestContext,
    ) {
        if !cache.store.needs_refresh(entry) {
            return;
        }
        let store = cache.store.clone();
        let key = key.clone();
        let spawned = self.background.spawn("cache_refresh", async move {
            store.refresh(&key).await;
            Ok(())
        });
        ctx.set_cache_refresh(spawned);
    }

    fn schedule_persist(&self, cache: &CacheLayer, key: CacheKey, version: u64, delivery: &Delivery) {
        // Partial bodies and untransformed fallbacks are never stored under
        // the transformed key
        if delivery.fallback_original || delivery.is_partial() || !delivery.origin.cacheable {
            return;
        }

        let Some(body) = delivery.body.as_bytes().cloned() else {
            return;
        };
        let store = cache.store.clone();
        let status = delivery.status;
        let ttl = delivery.origin.ttl;
        let info = EntryInfo {
            content_type: delivery.content_type.clone(),
            fallback_original: false,
            source: Some(delivery.provenance.source_id().to_string()),
            cache_version: version,
        };
        self.background.spawn("cache_persist", async move {
            store.put(&key, body, status, &ttl, info).await.map(|_| ())
        });
    }

    /// Remember a failed delivery for the origin's error ttl of `status`
    fn schedule_negative(
        &self,
        cache: &CacheLayer,
        key: CacheKey,
        version: u64,
        status: u16,
        path: &str,
    ) {
        let Some(origin) = self.primary_origin(path) else {
            return;
        };
        let store = cache.store.clone();
        let info = EntryInfo {
            cache_version: version,
            ..EntryInfo::default()
        };
        self.background.spawn("cache_negative", async move {
            store
                .put(&key, Bytes::new(), status, &origin.ttl, info)
                .await
                .map(|_| ())
        });
    }

    /// `version` is `None` when the cache was bypassed; originals are then not stored
    fn schedule_follow_up(&self, follow_up: FollowUp, path: &str, version: Option<u64>) {
        match follow_up {
            FollowUp::CacheOriginal {
                origin,
                source,
                resolved_path,
            } => {
                let (Some(cache), Some(version)) = (self.cache_for(path).cloned(), version) else {
                    return;
                };
                if !origin.cacheable {
                    return;
                }
                let key = CacheKey::original(cache.prefix(), path, version);
                let failover = Arc::clone(&self.failover);
                self.background.spawn("cache_original", async move {
                    let object = failover.fetch_original(&source, &resolved_path).await?;
                    let info = EntryInfo {
                        content_type: object.head.content_type,
                        fallback_original: true,
                        source: Some(source.id.to_string()),
                        cache_version: version,
                    };
                    cache
                        .store
                        .put_stream(&key, object.body.into_stream(), 200, &origin.ttl, info)
                        .await
                        .map(|_| ())
                });
            }
            FollowUp::BumpVersion { pattern } => {
                let Some(cache) = self.cache.clone() else {
                    return;
                };
                self.background.spawn("version_bump", async move {
                    cache.versions.bump(&pattern).await?;
                    Ok(())
                });
            }
        }
    }
}

/// Error replayed from a cached failure
fn negative_hit(path: &str, status: u16) -> EdgeError {
    match status {
        404 => EdgeError::NotFound(path.to_string()),
        _ => EdgeError::Storage(format!("Every source for {} failed recently", path)),
    }
}
