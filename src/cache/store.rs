//! Cache store
//!
//! Reads and writes cache entries in the backing key-value store:
//! - small bodies are one value with the serialized metadata next to it
//! - bodies above the chunk threshold are split into chunks written first,
//!   then a manifest entry (empty value plus metadata) under the entry key
//! - range reads touch only the chunks overlapping the range
//! - streamed bodies are spooled chunk by chunk as they arrive
//!
//! Reads never fail the request: a store error or an inconsistent entry is
//! logged and reported as a miss. Writes go through the write coordinator
//! with critical severity, except refreshes which are best effort.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;

use crate::cache::chunking::{assemble, plan_read, split_body};
use crate::cache::entry::{CacheEntry, ChunkManifest, EntryInfo, EntryMetadata, StatusClass};
use crate::cache::key::CacheKey;
use crate::cache::kv::{KvStore, KvValue, PutOptions};
use crate::cache::serialization::{deserialize_metadata, serialize_metadata};
use crate::cache::CacheError;
use crate::config::{CacheSettings, TtlPolicy};
use crate::error::EdgeError;
use crate::fetcher::ByteStream;
use crate::metrics::EdgeMetrics;
use crate::range::{ByteRange, RangeRequest};
use crate::retry::{WriteCoordinator, WriteSeverity};

/// Extra lifetime given to chunks so a manifest never outlives its chunks
const CHUNK_TTL_GRACE_SECS: u64 = 60;

#[derive(Clone)]
pub struct CacheStore {
    kv: Arc<dyn KvStore>,
    writer: WriteCoordinator,
    settings: CacheSettings,
}

impl CacheStore {
    pub fn new(kv: Arc<dyn KvStore>, settings: CacheSettings) -> Self {
        let writer = WriteCoordinator::new(settings.write_retry.to_retry_policy());
        Self { kv, writer, settings }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn writer(&self) -> &WriteCoordinator {
        &self.writer
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Look up an entry, optionally only a byte range of it
    ///
    /// # Errors
    /// Only `EdgeError::RangeNotSatisfiable`; every storage problem is a miss.
    pub async fn get(
        &self,
        key: &CacheKey,
        range: Option<RangeRequest>,
    ) -> Result<Option<CacheEntry>, EdgeError> {
        match self.read_entry(key, range).await {
            Ok(Some(entry)) => {
                EdgeMetrics::global().record_cache_operation("get", "hit");
                Ok(Some(entry))
            }
            Ok(None) => {
                EdgeMetrics::global().record_cache_operation("get", "miss");
                Ok(None)
            }
            Err(ReadError::Range(err)) => {
                EdgeMetrics::global().record_cache_operation("get", "range_not_satisfiable");
                Err(err)
            }
            Err(ReadError::Store(err)) => {
                EdgeMetrics::global().record_cache_operation("get", "error");
                tracing::warn!(key = %key, error = %err, "Cache read failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn read_entry(
        &self,
        key: &CacheKey,
        range: Option<RangeRequest>,
    ) -> Result<Option<CacheEntry>, ReadError> {
        // A range read first needs the total size, so probe one byte with the metadata
        let probe_range = range.map(|_| ByteRange { start: 0, end: 0 });
        let Some(head) = self.kv.get(key.as_str(), probe_range).await? else {
            return Ok(None);
        };
        let metadata = read_metadata(key, &head)?;

        let now = Utc::now();
        if metadata.is_expired(now) {
            return Ok(None);
        }

        // A recorded failure has no body to slice
        let resolved = match range {
            Some(_) if metadata.is_negative() => None,
            Some(range) => Some(range.resolve(metadata.content_length).map_err(ReadError::Range)?),
            None => None,
        };

        let body = match (&metadata.chunk_manifest, resolved) {
            (Some(manifest), _) => self.read_chunks(key, manifest, resolved).await?,
            (None, None) => head.value,
            (None, Some(resolved)) => match self.kv.get(key.as_str(), Some(resolved)).await? {
                Some(value) => value.value,
                None => return Ok(None),
            },
        };

        let expected = resolved.map_or(metadata.content_length, |r| r.len());
        if body.len() as u64 != expected {
            return Err(CacheError::Corrupt(format!(
                "Entry {} has {} bytes, expected {}",
                key,
                body.len(),
                expected
            ))
            .into());
        }

        Ok(Some(CacheEntry {
            key: key.as_str().to_string(),
            metadata,
            body,
            range: resolved,
        }))
    }

    async fn read_chunks(
        &self,
        key: &CacheKey,
        manifest: &ChunkManifest,
        range: Option<ByteRange>,
    ) -> Result<Bytes, CacheError> {
        let plan = plan_read(manifest, range);
        let mut parts = Vec::with_capacity(plan.len());
        for slice in &plan {
            let chunk_key = key.chunk_key(slice.index);
            let whole_chunk = manifest.chunk_len(slice.index) == Some(slice.local.len());
            let local = (!whole_chunk).then_some(slice.local);
            match self.kv.get(&chunk_key, local).await? {
                Some(KvValue { value, .. }) => parts.push(value),
                None => {
                    return Err(CacheError::Corrupt(format!(
                        "Chunk {} of {} is missing",
                        slice.index, key
                    )))
                }
            }
        }
        assemble(&plan, parts)
    }

    fn entry_metadata(
        &self,
        content_length: u64,
        status: u16,
        ttl_policy: &TtlPolicy,
        info: EntryInfo,
    ) -> EntryMetadata {
        let status_class = StatusClass::from_status(status);
        let ttl_seconds = status_class.ttl_seconds(ttl_policy);
        let now = Utc::now();
        let chunk_manifest = (content_length > self.settings.chunk_threshold_bytes)
            .then(|| ChunkManifest::new(content_length, self.settings.chunk_size_bytes));

        EntryMetadata {
            content_type: info.content_type,
            content_length,
            status,
            status_class,
            ttl_seconds,
            stored_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
            chunk_manifest,
            fallback_original: info.fallback_original,
            source: info.source,
            cache_version: info.cache_version,
        }
    }

    /// Store a response body
    ///
    /// The ttl is chosen from `ttl_policy` by the status class and recorded
    /// in the entry; later refreshes reuse it.
    pub async fn put(
        &self,
        key: &CacheKey,
        body: Bytes,
        status: u16,
        ttl_policy: &TtlPolicy,
        info: EntryInfo,
    ) -> Result<EntryMetadata, EdgeError> {
        let metadata = self.entry_metadata(body.len() as u64, status, ttl_policy, info);
        let result = self.write_entry(key, body, &metadata, WriteSeverity::Critical).await;
        record_put(key, &metadata, &result);
        result.map_err(EdgeError::from)?;
        Ok(metadata)
    }

    /// Store a body that is still arriving, holding at most about one chunk
    ///
    /// Chunks are written as they fill and the manifest goes last, once the
    /// total length is known. A body that ends within the chunk threshold is
    /// stored as a single value. If the stream fails the manifest is never
    /// written, and the orphaned chunks expire on their own.
    pub async fn put_stream(
        &self,
        key: &CacheKey,
        mut body: ByteStream,
        status: u16,
        ttl_policy: &TtlPolicy,
        info: EntryInfo,
    ) -> Result<EntryMetadata, EdgeError> {
        let threshold = self.settings.chunk_threshold_bytes;
        let chunk_size = self.settings.chunk_size_bytes.max(1);
        let ttl_seconds = StatusClass::from_status(status).ttl_seconds(ttl_policy);
        let chunk_options = PutOptions {
            ttl_seconds: ttl_seconds.saturating_add(CHUNK_TTL_GRACE_SECS),
            metadata: None,
        };

        let mut pending = BytesMut::new();
        let mut total: u64 = 0;
        let mut chunks_written: u32 = 0;

        while let Some(piece) = body.try_next().await? {
            total += piece.len() as u64;
            pending.extend_from_slice(&piece);
            if total <= threshold {
                continue;
            }
            while pending.len() as u64 >= chunk_size {
                let chunk = pending.split_to(chunk_size as usize).freeze();
                self.put_chunk(key, chunks_written, chunk, &chunk_options).await?;
                chunks_written += 1;
            }
        }

        if total <= threshold {
            return self.put(key, pending.freeze(), status, ttl_policy, info).await;
        }
        if !pending.is_empty() {
            self.put_chunk(key, chunks_written, pending.freeze(), &chunk_options)
                .await?;
        }

        let metadata = self.entry_metadata(total, status, ttl_policy, info);
        let result = self.write_manifest(key, Bytes::new(), &metadata, WriteSeverity::Critical).await;
        record_put(key, &metadata, &result);
        result.map_err(EdgeError::from)?;
        Ok(metadata)
    }

    async fn put_chunk(
        &self,
        key: &CacheKey,
        index: u32,
        chunk: Bytes,
        options: &PutOptions,
    ) -> Result<(), EdgeError> {
        let chunk_key = key.chunk_key(index);
        let written = self
            .put_value(&chunk_key, chunk, options.clone(), WriteSeverity::Critical, "cache_chunk")
            .await
            .map_err(|e| {
                EdgeMetrics::global().record_cache_operation("put", "error");
                EdgeError::from(e)
            })?;
        if written {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("Chunk write for {} did not complete", key)).into())
        }
    }

    /// Whether a hit should trigger a background refresh
    pub fn needs_refresh(&self, entry: &CacheEntry) -> bool {
        entry
            .metadata
            .needs_refresh(Utc::now(), self.settings.refresh_threshold_seconds)
    }

    /// Re-write an entry with its original ttl, pushing out its expiry
    ///
    /// Best effort: failures are logged and the entry simply expires.
    pub async fn refresh(&self, key: &CacheKey) -> bool {
        let entry = match self.read_entry(key, None).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(key = %key, error = ?e, "Cache refresh read failed");
                return false;
            }
        };

        let metadata = entry.metadata.refreshed(Utc::now());
        let refreshed = self
            .write_entry(key, entry.body, &metadata, WriteSeverity::NonCritical)
            .await
            .is_ok();
        EdgeMetrics::global()
            .record_cache_operation("refresh", if refreshed { "ok" } else { "error" });
        refreshed
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        body: Bytes,
        metadata: &EntryMetadata,
        severity: WriteSeverity,
    ) -> Result<(), CacheError> {
        let manifest_value = match &metadata.chunk_manifest {
            Some(manifest) => {
                let chunk_options = PutOptions {
                    ttl_seconds: metadata.ttl_seconds.saturating_add(CHUNK_TTL_GRACE_SECS),
                    metadata: None,
                };
                let writes = split_body(&body, manifest.chunk_size)
                    .into_iter()
                    .enumerate()
                    .map(|(index, chunk)| {
                        let chunk_key = key.chunk_key(index as u32);
                        let options = chunk_options.clone();
                        async move {
                            self.put_value(&chunk_key, chunk, options, severity, "cache_chunk")
                                .await
                        }
                    });
                let written = futures::future::try_join_all(writes).await?;
                if written.iter().any(|ok| !ok) {
                    // A non-critical chunk write gave up; skip the manifest so
                    // the entry is never half visible
                    return Err(CacheError::Unavailable(format!(
                        "Chunk write for {} did not complete",
                        key
                    )));
                }
                Bytes::new()
            }
            None => {
                if body.len() as u64 > self.settings.max_value_bytes {
                    return Err(CacheError::ValueTooLarge {
                        size: body.len() as u64,
                        limit: self.settings.max_value_bytes,
                    });
                }
                body
            }
        };

        self.write_manifest(key, manifest_value, metadata, severity).await
    }

    /// Write the entry value itself, with the metadata next to it
    async fn write_manifest(
        &self,
        key: &CacheKey,
        value: Bytes,
        metadata: &EntryMetadata,
        severity: WriteSeverity,
    ) -> Result<(), CacheError> {
        let options = PutOptions {
            ttl_seconds: metadata.ttl_seconds,
            metadata: Some(Bytes::from(serialize_metadata(metadata)?)),
        };
        if self
            .put_value(key.as_str(), value, options, severity, "cache_entry")
            .await?
        {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("Write for {} did not complete", key)))
        }
    }

    /// Returns false when a non-critical write gave up
    async fn put_value(
        &self,
        key: &str,
        value: Bytes,
        options: PutOptions,
        severity: WriteSeverity,
        label: &str,
    ) -> Result<bool, CacheError> {
        let written = self
            .writer
            .write_with_retry(severity, label, || {
                self.kv.put(key, value.clone(), options.clone())
            })
            .await?;
        Ok(written.is_some())
    }
}

fn record_put(key: &CacheKey, metadata: &EntryMetadata, result: &Result<(), CacheError>) {
    match result {
        Ok(()) => {
            EdgeMetrics::global().record_cache_operation("put", "ok");
            tracing::debug!(
                key = %key,
                bytes = metadata.content_length,
                chunks = metadata.chunk_manifest.map_or(0, |m| m.chunk_count),
                ttl_seconds = metadata.ttl_seconds,
                status_class = metadata.status_class.as_str(),
                "Cache entry stored"
            );
        }
        Err(_) => EdgeMetrics::global().record_cache_operation("put", "error"),
    }
}

fn read_metadata(key: &CacheKey, value: &KvValue) -> Result<EntryMetadata, CacheError> {
    let raw = value
        .metadata
        .as_ref()
        .ok_or_else(|| CacheError::Corrupt(format!("Entry {} has no metadata", key)))?;
    deserialize_metadata(raw)
}

#[derive(Debug)]
enum ReadError {
    Range(EdgeError),
    Store(CacheError),
}

impl From<CacheError> for ReadError {
    fn from(err: CacheError) -> Self {
        ReadError::Store(err)
    }
}
