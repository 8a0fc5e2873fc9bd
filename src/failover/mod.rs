//! Transformation failover
//!
//! Drives one request from path to transformed asset:
//!
//! 1. Find the first source holding the asset (HEAD probes through the fetch
//!    orchestrator).
//! 2. Hand its URL to the transformation proxy.
//! 3. Recover from what the proxy reports:
//!    - **not found**: exclude that source and search again, across the
//!      remaining sources and origins, until one transforms or all are spent
//!    - **size limit**: fetch the original bytes from the same source and serve
//!      them untransformed; ask for them to be cached under the original key
//!    - **duration limit**: clamp the `duration` option to the reported maximum
//!      and retry the same source once
//!    - **rate limited**: surface a 429 immediately
//!    - **any other proxy error**: surface it and ask for the pattern's cache
//!      version to be bumped
//!
//! Follow-up work (caching originals, version bumps) is returned to the caller
//! rather than performed here, so this module never writes to the cache.

use std::sync::Arc;

use crate::context::{FallbackKind, Provenance, RequestContext};
use crate::error::{EdgeError, RateLimitSource};
use crate::fetcher::{Body, FetchRequest, FetchResult, StreamedObject};
use crate::orchestrator::{ExclusionSet, FetchOrchestrator, FoundSource, OrchestratedFetch};
use crate::origin::{Origin, Source, SourceId};
use crate::range::RangeRequest;
use crate::transform::{ProxyFailure, TransformOptions, TransformProxy, TransformedAsset};

/// An asset ready to be returned to the client
#[derive(Debug)]
pub struct Delivery {
    pub status: u16,
    /// Buffered for transformed assets, streamed for untransformed originals
    pub body: Body,
    pub content_type: Option<String>,
    pub content_range: Option<String>,
    pub provenance: Provenance,
    pub origin: Arc<Origin>,
    /// Options actually sent to the proxy (after any duration clamp)
    pub applied_options: TransformOptions,
    /// Untransformed bytes served after a size-limit refusal
    pub fallback_original: bool,
}

impl Delivery {
    /// `None` for a streamed body without a declared length
    pub fn content_length(&self) -> Option<u64> {
        self.body.len()
    }

    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

/// Work the caller should run in the background
#[derive(Debug, Clone)]
pub enum FollowUp {
    /// Store untransformed content under the original key variant
    ///
    /// The served body is never buffered for this; the full original is
    /// fetched again and spooled into the cache.
    CacheOriginal {
        origin: Arc<Origin>,
        source: Source,
        resolved_path: String,
    },
    /// Invalidate every cached entry of a pattern
    BumpVersion { pattern: String },
}

#[derive(Debug)]
pub struct FailoverOutcome {
    pub result: Result<Delivery, EdgeError>,
    pub follow_ups: Vec<FollowUp>,
    /// Sources ruled out for this request: missing at the source, or
    /// unreadable by the proxy
    pub excluded: Vec<SourceId>,
}

pub struct FailoverCoordinator {
    orchestrator: FetchOrchestrator,
    proxy: Arc<dyn TransformProxy>,
}

impl FailoverCoordinator {
    pub fn new(orchestrator: FetchOrchestrator, proxy: Arc<dyn TransformProxy>) -> Self {
        Self { orchestrator, proxy }
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// Find, transform and, when the proxy cannot read a source, fail over
    pub async fn deliver(
        &self,
        path: &str,
        options: &TransformOptions,
        range: Option<RangeRequest>,
        ctx: &mut RequestContext,
    ) -> FailoverOutcome {
        let mut exclusions = ExclusionSet::new();
        let mut follow_ups = Vec::new();

        let result = match self
            .orchestrator
            .fetch_with_origins(path, &FetchRequest::head(), &mut exclusions, ctx)
            .await
        {
            OrchestratedFetch::Found(found) => {
                self.retry_with_alternative_origins(
                    path,
                    *found,
                    options.clone(),
                    range,
                    &mut exclusions,
                    &mut follow_ups,
                    ctx,
                )
                .await
            }
            OrchestratedFetch::Exhausted { matched, all_errors } => {
                Err(exhausted_error(path, matched, all_errors))
            }
        };

        FailoverOutcome {
            result,
            follow_ups,
            excluded: exclusions.to_sorted_vec(),
        }
    }

    /// Transform from `found`, moving on to alternative sources while the
    /// proxy reports the source as unreadable
    ///
    /// Bounded by the number of configured sources: every iteration either
    /// returns or excludes one more source.
    #[allow(clippy::too_many_arguments)]
    pub async fn retry_with_alternative_origins(
        &self,
        path: &str,
        mut found: FoundSource,
        mut options: TransformOptions,
        range: Option<RangeRequest>,
        exclusions: &mut ExclusionSet,
        follow_ups: &mut Vec<FollowUp>,
        ctx: &mut RequestContext,
    ) -> Result<Delivery, EdgeError> {
        let max_sources = self.orchestrator.registry().load().source_count();
        let mut duration_clamped = false;

        loop {
            let source_id = found.provenance.source_id();
            let Some(source_url) = found.provenance.source_url.clone() else {
                // Validation guarantees a URL; treat a missing one as unreadable
                tracing::warn!(source = %source_id, "Source has no URL for the proxy");
                found = self
                    .next_alternative(path, &source_id, max_sources, exclusions, ctx)
                    .await?;
                continue;
            };

            let failure = match self.proxy.transform(&source_url, &options, range).await {
                Ok(asset) => {
                    ctx.set_served_by(found.provenance.clone());
                    return Ok(delivery_from_asset(asset, found, options));
                }
                Err(failure) => failure,
            };

            ctx.set_original_error(failure.status(), failure.outcome());
            match failure {
                ProxyFailure::NotFound { status } => {
                    tracing::info!(
                        request_id = ctx.request_id(),
                        source = %source_id,
                        status = status,
                        "Proxy could not read source, trying alternatives"
                    );
                    found = self
                        .next_alternative(path, &source_id, max_sources, exclusions, ctx)
                        .await?;
                    ctx.set_fallback(FallbackKind::AlternativeSource);
                }
                ProxyFailure::SizeLimitExceeded { limit_bytes, .. } => {
                    tracing::info!(
                        request_id = ctx.request_id(),
                        source = %source_id,
                        limit_bytes = ?limit_bytes,
                        "Asset exceeds proxy size limit, serving original"
                    );
                    return self.serve_original(found, options, range, follow_ups, ctx).await;
                }
                ProxyFailure::DurationLimitExceeded {
                    min_secs, max_secs, ..
                } => {
                    let Some(max_secs) = max_secs.filter(|_| !duration_clamped) else {
                        return Err(EdgeError::DurationLimitExceeded { min_secs, max_secs });
                    };
                    // Already within the reported limit: a retry would repeat the same call
                    if !options.clamp_duration(max_secs) {
                        return Err(EdgeError::DurationLimitExceeded {
                            min_secs,
                            max_secs: Some(max_secs),
                        });
                    }
                    duration_clamped = true;
                    ctx.set_fallback(FallbackKind::DurationClamped);
                    tracing::info!(
                        request_id = ctx.request_id(),
                        source = %source_id,
                        max_secs = max_secs,
                        "Duration over proxy limit, retrying with clamped duration"
                    );
                }
                ProxyFailure::RateLimited { .. } => {
                    return Err(EdgeError::RateLimited {
                        from: RateLimitSource::Proxy,
                    });
                }
                ProxyFailure::ProxyError { status, message } => {
                    if let Some(pattern) = self.primary_pattern(path) {
                        follow_ups.push(FollowUp::BumpVersion { pattern });
                    }
                    return Err(EdgeError::Proxy { status, message });
                }
            }
        }
    }

    async fn next_alternative(
        &self,
        path: &str,
        failed: &SourceId,
        max_sources: usize,
        exclusions: &mut ExclusionSet,
        ctx: &mut RequestContext,
    ) -> Result<FoundSource, EdgeError> {
        exclusions.insert(failed.clone());
        if exclusions.len() >= max_sources {
            return Err(EdgeError::NotFound(path.to_string()));
        }

        ctx.increment_alternatives_tried();
        match self
            .orchestrator
            .fetch_with_origins(path, &FetchRequest::head(), exclusions, ctx)
            .await
        {
            OrchestratedFetch::Found(next) => Ok(*next),
            OrchestratedFetch::Exhausted { all_errors, .. } => {
                tracing::info!(
                    request_id = ctx.request_id(),
                    excluded = exclusions.len(),
                    "All alternative sources exhausted"
                );
                Err(exhausted_error(path, true, all_errors))
            }
        }
    }

    async fn serve_original(
        &self,
        found: FoundSource,
        options: TransformOptions,
        range: Option<RangeRequest>,
        follow_ups: &mut Vec<FollowUp>,
        ctx: &mut RequestContext,
    ) -> Result<Delivery, EdgeError> {
        let request = FetchRequest::get().with_range(range);
        let object = match self
            .orchestrator
            .fetch_source_stream(&found.source, &found.provenance.resolved_path, &request)
            .await
        {
            FetchResult::Found(object) => object,
            FetchResult::NotFound => {
                return Err(EdgeError::NotFound(ctx.path().to_string()));
            }
            FetchResult::Error {
                status: Some(416), ..
            } => {
                let total_size = found.object.total_size.unwrap_or(found.object.content_length);
                return Err(EdgeError::RangeNotSatisfiable { total_size });
            }
            FetchResult::Error { message, .. } => return Err(EdgeError::Storage(message)),
        };

        ctx.set_fallback(FallbackKind::SizeLimitOriginal);
        ctx.set_served_by(found.provenance.clone());

        follow_ups.push(FollowUp::CacheOriginal {
            origin: Arc::clone(&found.origin),
            source: found.source.clone(),
            resolved_path: found.provenance.resolved_path.clone(),
        });

        Ok(delivery_from_original(object, found, options))
    }

    /// Stream the full original body of a source, for background caching
    pub async fn fetch_original(
        &self,
        source: &Source,
        resolved_path: &str,
    ) -> Result<StreamedObject, EdgeError> {
        match self
            .orchestrator
            .fetch_source_stream(source, resolved_path, &FetchRequest::get())
            .await
        {
            FetchResult::Found(object) => Ok(object),
            FetchResult::NotFound => Err(EdgeError::NotFound(resolved_path.to_string())),
            FetchResult::Error { message, .. } => Err(EdgeError::Storage(message)),
        }
    }

    /// Name of the first pattern matching `path`; its version keys the cache
    pub fn primary_pattern(&self, path: &str) -> Option<String> {
        self.orchestrator
            .registry()
            .load()
            .matcher()
            .find_first_match(path)
            .map(|m| m.name().to_string())
    }
}

fn exhausted_error(path: &str, matched: bool, all_errors: bool) -> EdgeError {
    if matched && all_errors {
        EdgeError::Storage(format!("Every source for {} failed", path))
    } else {
        EdgeError::NotFound(path.to_string())
    }
}

fn delivery_from_asset(asset: TransformedAsset, found: FoundSource, options: TransformOptions) -> Delivery {
    Delivery {
        status: asset.status,
        body: Body::Full(asset.body),
        content_type: asset.content_type,
        content_range: asset.content_range,
        provenance: found.provenance,
        origin: found.origin,
        applied_options: options,
        fallback_original: false,
    }
}

fn delivery_from_original(object: StreamedObject, found: FoundSource, options: TransformOptions) -> Delivery {
    let StreamedObject { head, body } = object;
    let content_range = head.content_range();
    Delivery {
        status: head.status,
        body,
        content_type: head.content_type,
        content_range,
        provenance: found.provenance,
        origin: found.origin,
        applied_options: options,
        fallback_original: true,
    }
}
