//! Cache version registry
//!
//! Every pattern carries a version number that is part of its cache keys.
//! Bumping the version makes every existing entry of that pattern unreachable
//! without deleting anything; old entries age out through their TTL.
//!
//! All counters live in one JSON document under `{prefix}:__versions`. Reads
//! are served from a short-lived local moka cache so a hot path does not read
//! the document on every request.

use bytes::Bytes;
use moka::future::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::kv::{KvStore, PutOptions};
use crate::cache::CacheError;
use crate::metrics::EdgeMetrics;
use crate::retry::{WriteCoordinator, WriteSeverity};

/// Version of a pattern that was never bumped
pub const DEFAULT_VERSION: u64 = 1;

const VERSIONS_KEY_SUFFIX: &str = "__versions";

pub struct VersionRegistry {
    kv: Arc<dyn KvStore>,
    writer: WriteCoordinator,
    document_key: String,
    local: Cache<String, u64>,
}

impl VersionRegistry {
    pub fn new(
        kv: Arc<dyn KvStore>,
        writer: WriteCoordinator,
        key_prefix: &str,
        local_ttl: Duration,
    ) -> Self {
        let local = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(local_ttl)
            .build();

        Self {
            kv,
            writer,
            document_key: format!("{}:{}", key_prefix, VERSIONS_KEY_SUFFIX),
            local,
        }
    }

    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    /// Current version of `pattern`
    ///
    /// A store failure is returned to the caller and nothing is cached
    /// locally, so the next request reads the store again. Callers must not
    /// guess a version: a guess can resurrect invalidated entries.
    pub async fn current(&self, pattern: &str) -> Result<u64, CacheError> {
        if let Some(version) = self.local.get(pattern).await {
            return Ok(version);
        }

        let versions = match self.load().await {
            Ok((versions, _)) => versions,
            Err(e) => {
                tracing::warn!(pattern = pattern, error = %e, "Failed to read cache versions");
                return Err(e);
            }
        };
        let version = versions.get(pattern).copied().unwrap_or(DEFAULT_VERSION);
        self.local.insert(pattern.to_string(), version).await;
        Ok(version)
    }

    /// Every stored counter
    pub async fn snapshot(&self) -> Result<BTreeMap<String, u64>, CacheError> {
        self.load().await.map(|(versions, _)| versions)
    }

    /// Increment the version of `pattern`
    ///
    /// Returns the new version, or the current one if the bump could not be
    /// written. Counters only ever grow: the document is replaced only if no
    /// other writer changed it since it was read.
    pub async fn bump(&self, pattern: &str) -> Result<u64, CacheError> {
        let written = self
            .writer
            .write_with_retry(WriteSeverity::NonCritical, "version_bump", || {
                self.try_bump(pattern)
            })
            .await;

        match written {
            Ok(Some(version)) => {
                self.local.insert(pattern.to_string(), version).await;
                EdgeMetrics::global().record_cache_operation("version_bump", "ok");
                tracing::info!(pattern = pattern, version = version, "Cache version bumped");
                Ok(version)
            }
            _ => {
                EdgeMetrics::global().record_cache_operation("version_bump", "error");
                self.local.invalidate(pattern).await;
                self.current(pattern).await
            }
        }
    }

    async fn try_bump(&self, pattern: &str) -> Result<u64, CacheError> {
        let (mut versions, raw) = self.load().await?;
        let next = versions
            .get(pattern)
            .copied()
            .unwrap_or(DEFAULT_VERSION)
            .saturating_add(1);
        versions.insert(pattern.to_string(), next);

        let document = serde_json::to_vec(&versions)?;
        self.kv
            .compare_and_put(
                &self.document_key,
                raw.as_ref(),
                Bytes::from(document),
                PutOptions::default(),
            )
            .await?;
        Ok(next)
    }

    /// Parsed counters plus the raw document they came from
    async fn load(&self) -> Result<(BTreeMap<String, u64>, Option<Bytes>), CacheError> {
        match self.kv.get(&self.document_key, None).await? {
            Some(value) if value.value.is_empty() => Ok((BTreeMap::new(), Some(value.value))),
            Some(value) => {
                let versions = serde_json::from_slice(&value.value)?;
                Ok((versions, Some(value.value)))
            }
            None => Ok((BTreeMap::new(), None)),
        }
    }
}
