// Fetch orchestrator
//
// Walks every origin whose pattern matches a path, in match order, and inside
// each origin every non-excluded source in priority order, until one source
// has the asset. Attempts are strictly sequential.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::{AttemptOutcome, Provenance, RequestContext};
use crate::fetcher::{FetchRequest, FetchResult, FetchedObject, SourceFetcher, StreamedObject};
use crate::origin::{Origin, SharedRegistry, Source, SourceId};
use crate::router::Captures;

/// Sources that must not be tried again for this request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    excluded: HashSet<SourceId>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the source was already excluded
    pub fn insert(&mut self, source: SourceId) -> bool {
        self.excluded.insert(source)
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.excluded.contains(source)
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Excluded sources in a stable order
    pub fn to_sorted_vec(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.excluded.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// A source that has the asset
#[derive(Debug, Clone)]
pub struct FoundSource {
    pub object: FetchedObject,
    pub provenance: Provenance,
    pub origin: Arc<Origin>,
    pub source: Source,
    pub captures: Captures,
}

#[derive(Debug, Clone)]
pub enum OrchestratedFetch {
    Found(Box<FoundSource>),
    Exhausted {
        /// False when no origin pattern matched the path at all
        matched: bool,
        /// True when every attempted source failed rather than reporting not found
        all_errors: bool,
    },
}

pub struct FetchOrchestrator {
    registry: SharedRegistry,
    fetcher: Arc<dyn SourceFetcher>,
}

impl FetchOrchestrator {
    pub fn new(registry: SharedRegistry, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self { registry, fetcher }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &Arc<dyn SourceFetcher> {
        &self.fetcher
    }

    /// Find the first non-excluded source holding the asset for `path`
    ///
    /// Sources that report the asset missing are added to `exclusions`, so a
    /// later search for the same request does not probe them again.
    pub async fn fetch_with_origins(
        &self,
        path: &str,
        request: &FetchRequest,
        exclusions: &mut ExclusionSet,
        ctx: &mut RequestContext,
    ) -> OrchestratedFetch {
        let registry = self.registry.load_full();
        let matches = registry.matches(path);

        if matches.is_empty() {
            tracing::debug!(path = path, "No origin pattern matched");
            return OrchestratedFetch::Exhausted {
                matched: false,
                all_errors: false,
            };
        }

        let mut attempted = 0usize;
        let mut errors = 0usize;

        for matched in matches {
            let origin = matched.origin;
            for source in origin.sources.iter() {
                if exclusions.contains(&source.id) {
                    continue;
                }
                let Some(resolved_path) = source.resolve_path(&matched.captures) else {
                    tracing::debug!(
                        source = %source.id,
                        "Path template references a group that did not match, skipping source"
                    );
                    ctx.record_attempt(source.id.clone(), AttemptOutcome::Skipped);
                    continue;
                };

                attempted += 1;
                match self.fetcher.fetch(source, &resolved_path, request).await {
                    FetchResult::Found(object) => {
                        ctx.record_attempt(source.id.clone(), AttemptOutcome::Found);
                        let provenance = Provenance {
                            origin: origin.name.clone(),
                            kind: source.kind(),
                            priority: source.priority(),
                            source_url: source.url_for(&resolved_path),
                            resolved_path,
                        };
                        tracing::debug!(
                            request_id = ctx.request_id(),
                            source = %source.id,
                            "Source found"
                        );
                        return OrchestratedFetch::Found(Box::new(FoundSource {
                            object,
                            provenance,
                            origin: Arc::clone(&origin),
                            source: source.clone(),
                            captures: matched.captures.clone(),
                        }));
                    }
                    FetchResult::NotFound => {
                        ctx.record_attempt(source.id.clone(), AttemptOutcome::NotFound);
                        exclusions.insert(source.id.clone());
                    }
                    FetchResult::Error { status, message } => {
                        errors += 1;
                        tracing::warn!(
                            request_id = ctx.request_id(),
                            source = %source.id,
                            status = ?status,
                            error = %message,
                            "Source fetch failed, trying next source"
                        );
                        ctx.record_attempt(
                            source.id.clone(),
                            AttemptOutcome::Error { status, message },
                        );
                    }
                }
            }
        }

        OrchestratedFetch::Exhausted {
            matched: true,
            all_errors: attempted > 0 && errors == attempted,
        }
    }

    /// Fetch directly from a known source, bypassing the search
    pub async fn fetch_source(
        &self,
        source: &Source,
        resolved_path: &str,
        request: &FetchRequest,
    ) -> FetchResult {
        self.fetcher.fetch(source, resolved_path, request).await
    }

    /// Like [`fetch_source`](Self::fetch_source), with the body streamed
    pub async fn fetch_source_stream(
        &self,
        source: &Source,
        resolved_path: &str,
        request: &FetchRequest,
    ) -> FetchResult<StreamedObject> {
        self.fetcher.fetch_stream(source, resolved_path, request).await
    }
}
