// Origin module
//
// Runtime model built from the validated configuration: origins keyed by
// name, each with its candidate sources in ascending priority order, plus the
// pattern matcher that maps request paths onto origins.

use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SourceAuthConfig, SourceConfig, SourceType, TtlPolicy};
use crate::constants::DEFAULT_SOURCE_TIMEOUT_MS;
use crate::error::EdgeError;
use crate::router::{Captures, PatternDef, PatternMatcher};

pub mod template;

use template::PathTemplate;

/// Stable identity of a source inside the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId {
    pub origin: String,
    pub kind: SourceType,
    pub priority: u32,
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.origin, self.kind, self.priority)
    }
}

/// A candidate location for an asset
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub template: PathTemplate,
    /// Base URL the source is reachable at over HTTP
    pub base_url: Option<String>,
    /// Object storage binding name
    pub bucket: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub auth: Option<SourceAuthConfig>,
}

impl Source {
    fn from_config(
        origin: &str,
        config: &SourceConfig,
        object_storage_base_url: Option<&str>,
    ) -> Result<Self, EdgeError> {
        let template = PathTemplate::parse(&config.path)
            .map_err(|e| EdgeError::Validation(format!("Origin '{}': {}", origin, e)))?;

        let base_url = match config.source_type {
            SourceType::ObjectStorage => config
                .url
                .clone()
                .or_else(|| object_storage_base_url.map(String::from)),
            SourceType::RemoteHttp | SourceType::FallbackHttp => config.url.clone(),
        };

        Ok(Self {
            id: SourceId {
                origin: origin.to_string(),
                kind: config.source_type,
                priority: config.priority,
            },
            template,
            base_url,
            bucket: config.bucket.clone(),
            headers: config.headers.clone(),
            timeout: Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_SOURCE_TIMEOUT_MS)),
            auth: config.auth.clone(),
        })
    }

    pub fn kind(&self) -> SourceType {
        self.id.kind
    }

    pub fn priority(&self) -> u32 {
        self.id.priority
    }

    pub fn is_permissive(&self) -> bool {
        self.auth.as_ref().map(|a| a.permissive).unwrap_or(false)
    }

    /// Fill the path template from a pattern match
    pub fn resolve_path(&self, captures: &Captures) -> Option<String> {
        self.template.render(captures)
    }

    /// Absolute URL for a resolved path
    ///
    /// This is the URL handed to the transformation proxy. Object storage
    /// sources without a public base URL have none.
    pub fn url_for(&self, resolved_path: &str) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| join_url(base, resolved_path))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// An origin: one path pattern and its candidate sources
#[derive(Debug, Clone)]
pub struct Origin {
    pub name: String,
    pub sources: Vec<Source>,
    pub ttl: TtlPolicy,
    pub cacheable: bool,
}

impl Origin {
    pub fn source(&self, kind: SourceType, priority: u32) -> Option<&Source> {
        self.sources
            .iter()
            .find(|s| s.id.kind == kind && s.id.priority == priority)
    }
}

/// An origin whose pattern matched a request path
#[derive(Debug, Clone)]
pub struct OriginMatch {
    pub origin: Arc<Origin>,
    pub captures: Captures,
}

/// Immutable registry of origins and their pattern matcher
#[derive(Debug)]
pub struct OriginRegistry {
    matcher: PatternMatcher,
    origins: HashMap<String, Arc<Origin>>,
}

impl OriginRegistry {
    /// Build the registry from a configuration
    ///
    /// Validates the configuration first, so an invalid one never produces a
    /// registry.
    pub fn from_config(config: &Config) -> Result<Self, EdgeError> {
        config.validate().map_err(EdgeError::Validation)?;

        for (origin, kind, priority) in config.permissive_sources() {
            tracing::warn!(
                origin = origin,
                source_type = %kind,
                priority = priority,
                "Permissive auth enabled: authentication failures on this source are treated as not found"
            );
        }

        let defs: Vec<PatternDef> = config
            .origins
            .iter()
            .map(|o| PatternDef {
                name: o.name.clone(),
                regex: o.matcher.clone(),
                priority: o.priority,
            })
            .collect();
        let matcher = PatternMatcher::new(&defs)?;

        let object_storage_base_url = config.transform.object_storage_base_url.as_deref();
        let mut origins = HashMap::with_capacity(config.origins.len());

        for origin_config in &config.origins {
            let mut sources = origin_config
                .sources
                .iter()
                .map(|s| Source::from_config(&origin_config.name, s, object_storage_base_url))
                .collect::<Result<Vec<_>, _>>()?;
            sources.sort_by_key(|s| s.id.priority);

            origins.insert(
                origin_config.name.clone(),
                Arc::new(Origin {
                    name: origin_config.name.clone(),
                    sources,
                    ttl: origin_config.ttl,
                    cacheable: origin_config.cacheable,
                }),
            );
        }

        tracing::info!(
            origins = origins.len(),
            generation = config.generation,
            "Origin registry built"
        );

        Ok(Self { matcher, origins })
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    pub fn origin(&self, name: &str) -> Option<&Arc<Origin>> {
        self.origins.get(name)
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    /// Total number of sources across all origins
    pub fn source_count(&self) -> usize {
        self.origins.values().map(|o| o.sources.len()).sum()
    }

    /// Origins whose pattern matches `path`, in match order
    pub fn matches(&self, path: &str) -> Vec<OriginMatch> {
        self.matcher
            .find_all_matches(path)
            .into_iter()
            .filter_map(|m| {
                self.origins.get(m.name()).map(|origin| OriginMatch {
                    origin: Arc::clone(origin),
                    captures: m.captures,
                })
            })
            .collect()
    }
}

/// Registry handle that can be swapped atomically on reload
pub type SharedRegistry = Arc<ArcSwap<OriginRegistry>>;

pub fn shared(registry: OriginRegistry) -> SharedRegistry {
    Arc::new(ArcSwap::from_pointee(registry))
}
