// Request context threaded through resolution, failover and caching
//
// Records what happened while serving one request (which sources were tried,
// which one served the asset, which recovery path applied) and renders it as
// diagnostics response headers.

use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

use crate::config::SourceType;
use crate::origin::SourceId;

/// Outcome of a single source attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Found,
    NotFound,
    Error { status: Option<u16>, message: String },
    /// Template could not be filled from the match
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Found => "found",
            AttemptOutcome::NotFound => "not_found",
            AttemptOutcome::Error { .. } => "error",
            AttemptOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: SourceId,
    pub outcome: AttemptOutcome,
}

/// Where an asset was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub origin: String,
    pub kind: SourceType,
    pub priority: u32,
    /// URL handed to the transformation proxy
    pub source_url: Option<String>,
    pub resolved_path: String,
}

impl Provenance {
    pub fn source_id(&self) -> SourceId {
        SourceId {
            origin: self.origin.clone(),
            kind: self.kind,
            priority: self.priority,
        }
    }
}

/// Recovery path that changed what was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// The asset was served from an alternative source after the proxy could not read it
    AlternativeSource,
    /// Untransformed original served because the proxy refused the size
    SizeLimitOriginal,
    /// Duration option clamped to the proxy's limit
    DurationClamped,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::AlternativeSource => "alternative-source",
            FallbackKind::SizeLimitOriginal => "size-limit-original",
            FallbackKind::DurationClamped => "duration-clamped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    path: String,
    started_at: Instant,
    attempts: Vec<SourceAttempt>,
    served_by: Option<Provenance>,
    fallback: Option<FallbackKind>,
    original_error: Option<(u16, &'static str)>,
    alternatives_tried: u32,
    cache_status: Option<CacheStatus>,
    cache_refresh: bool,
}

impl RequestContext {
    /// Create a context with a fresh request ID (UUID v4)
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            path: path.into(),
            started_at: Instant::now(),
            attempts: Vec::new(),
            served_by: None,
            fallback: None,
            original_error: None,
            alternatives_tried: 0,
            cache_status: None,
            cache_refresh: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn record_attempt(&mut self, source: SourceId, outcome: AttemptOutcome) {
        self.attempts.push(SourceAttempt { source, outcome });
    }

    pub fn attempts(&self) -> &[SourceAttempt] {
        &self.attempts
    }

    pub fn set_served_by(&mut self, provenance: Provenance) {
        self.served_by = Some(provenance);
    }

    pub fn served_by(&self) -> Option<&Provenance> {
        self.served_by.as_ref()
    }

    pub fn set_fallback(&mut self, fallback: FallbackKind) {
        self.fallback = Some(fallback);
    }

    pub fn fallback(&self) -> Option<FallbackKind> {
        self.fallback
    }

    /// Remember the first error that triggered a recovery path
    pub fn set_original_error(&mut self, status: u16, error_type: &'static str) {
        if self.original_error.is_none() {
            self.original_error = Some((status, error_type));
        }
    }

    pub fn original_error(&self) -> Option<(u16, &'static str)> {
        self.original_error
    }

    pub fn increment_alternatives_tried(&mut self) {
        self.alternatives_tried += 1;
    }

    pub fn alternatives_tried(&self) -> u32 {
        self.alternatives_tried
    }

    pub fn set_cache_status(&mut self, status: CacheStatus) {
        self.cache_status = Some(status);
    }

    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.cache_status
    }

    pub fn set_cache_refresh(&mut self, refresh: bool) {
        self.cache_refresh = refresh;
    }

    /// Diagnostics response headers describing how the request was served
    pub fn diagnostics_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("X-Request-Id".to_string(), self.request_id.clone());

        if let Some(fallback) = self.fallback {
            headers.insert("X-Fallback-Applied".to_string(), fallback.as_str().to_string());
        }

        if let Some(provenance) = &self.served_by {
            headers.insert("X-Served-By-Origin".to_string(), provenance.origin.clone());
            headers.insert(
                "X-Served-By-Source".to_string(),
                format!("{}:{}", provenance.kind, provenance.priority),
            );
        }

        if self.alternatives_tried > 0 {
            headers.insert(
                "X-Alternatives-Tried".to_string(),
                self.alternatives_tried.to_string(),
            );
        }

        if let Some((status, error_type)) = self.original_error {
            headers.insert("X-Original-Error-Status".to_string(), status.to_string());
            headers.insert("X-Original-Error-Type".to_string(), error_type.to_string());
        }

        if !self.attempts.is_empty() {
            let attempted = self
                .attempts
                .iter()
                .map(|a| format!("{}={}", a.source, a.outcome.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert("X-Attempted-Sources".to_string(), attempted);
        }

        if let Some(status) = self.cache_status {
            headers.insert("X-Cache-Status".to_string(), status.as_str().to_string());
        }

        if self.cache_refresh {
            headers.insert("X-Cache-Refresh".to_string(), "true".to_string());
        }

        headers
    }
}
