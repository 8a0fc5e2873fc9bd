//! Backing key-value store
//!
//! The cache persists into a store with three properties the rest of the cache
//! layer is built around:
//! - each key accepts roughly one write per second; faster writes are rejected
//!   with a rate-limit error that is worth retrying
//! - values have a maximum size, so large bodies are chunked by the caller
//! - reads may ask for a byte range of a value
//!
//! `RedisKvStore` is the production implementation. `MemoryKvStore` keeps
//! everything in-process and can inject failures for tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::CacheError;
use crate::config::RedisConfig;
use crate::range::ByteRange;

/// Options for a single write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Expiry in seconds; 0 keeps the value until overwritten
    pub ttl_seconds: u64,
    /// Opaque metadata stored next to the value
    pub metadata: Option<Bytes>,
}

/// A value read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvValue {
    /// Whole value, or the requested slice of it
    pub value: Bytes,
    pub metadata: Option<Bytes>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; `range` is inclusive and clamped to the value length
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<KvValue>, CacheError>;

    async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> Result<(), CacheError>;

    /// Write `value` only if `key` still holds `expected` (`None` means absent)
    ///
    /// Returns CacheError::Conflict when another writer changed the key
    /// after it was read.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&Bytes>,
        value: Bytes,
        options: PutOptions,
    ) -> Result<(), CacheError>;
}

fn slice_range(value: &Bytes, range: Option<ByteRange>) -> Bytes {
    match range {
        None => value.clone(),
        Some(range) => {
            let len = value.len() as u64;
            if range.start >= len {
                return Bytes::new();
            }
            let end = range.end.min(len - 1);
            value.slice(range.start as usize..=end as usize)
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    metadata: Option<Bytes>,
    expires_at: Option<Instant>,
    written_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, StoredValue>,
    write_interval: Option<Duration>,
    max_value_bytes: Option<u64>,
    simulate_read_failure: bool,
    failing_read_key: Option<String>,
    simulate_write_failure: bool,
    rate_limit_next_writes: u32,
    reads: u64,
    writes: u64,
    rejected_writes: u64,
}

/// In-process store with optional per-key write rate limit
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a second write to the same key within `interval`
    pub fn with_write_interval(self, interval: Duration) -> Self {
        self.state.write().write_interval = Some(interval);
        self
    }

    /// Reject values larger than `limit` bytes
    pub fn with_max_value_bytes(self, limit: u64) -> Self {
        self.state.write().max_value_bytes = Some(limit);
        self
    }

    pub fn set_simulate_read_failure(&self, fail: bool) {
        self.state.write().simulate_read_failure = fail;
    }

    /// Fail reads of one key only; `None` clears it
    pub fn set_failing_read_key(&self, key: Option<&str>) {
        self.state.write().failing_read_key = key.map(str::to_string);
    }

    pub fn set_simulate_write_failure(&self, fail: bool) {
        self.state.write().simulate_write_failure = fail;
    }

    /// Reject the next `count` writes with a rate-limit error
    pub fn rate_limit_next_writes(&self, count: u32) {
        self.state.write().rate_limit_next_writes = count;
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.read().values.contains_key(key)
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.read().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().values.is_empty()
    }

    pub fn read_count(&self) -> u64 {
        self.state.read().reads
    }

    /// Successful writes
    pub fn write_count(&self) -> u64 {
        self.state.read().writes
    }

    pub fn rejected_write_count(&self) -> u64 {
        self.state.read().rejected_writes
    }

    /// Raw stored value and metadata, ignoring expiry
    pub fn raw(&self, key: &str) -> Option<KvValue> {
        self.state.read().values.get(key).map(|v| KvValue {
            value: v.value.clone(),
            metadata: v.metadata.clone(),
        })
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<KvValue>, CacheError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.simulate_read_failure || state.failing_read_key.as_deref() == Some(key) {
            return Err(CacheError::Unavailable("Simulated read failure".to_string()));
        }
        state.reads += 1;

        let now = Instant::now();
        let expired = match state.values.get(key) {
            None => return Ok(None),
            Some(stored) => stored.expires_at.is_some_and(|at| now >= at),
        };
        if expired {
            state.values.remove(key);
            return Ok(None);
        }

        Ok(state.values.get(key).map(|stored| KvValue {
            value: slice_range(&stored.value, range),
            metadata: stored.metadata.clone(),
        }))
    }

    async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> Result<(), CacheError> {
        self.state.write().store(key, value, options)
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&Bytes>,
        value: Bytes,
        options: PutOptions,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write();
        let now = Instant::now();
        let current = state
            .values
            .get(key)
            .filter(|stored| !stored.expires_at.is_some_and(|at| now >= at))
            .map(|stored| &stored.value);
        if current != expected {
            return Err(CacheError::Conflict(key.to_string()));
        }
        state.store(key, value, options)
    }
}

impl MemoryState {
    fn store(&mut self, key: &str, value: Bytes, options: PutOptions) -> Result<(), CacheError> {
        if self.simulate_write_failure {
            return Err(CacheError::Unavailable("Simulated write failure".to_string()));
        }
        if self.rate_limit_next_writes > 0 {
            self.rate_limit_next_writes -= 1;
            self.rejected_writes += 1;
            return Err(CacheError::RateLimited(key.to_string()));
        }
        if let Some(limit) = self.max_value_bytes {
            if value.len() as u64 > limit {
                return Err(CacheError::ValueTooLarge {
                    size: value.len() as u64,
                    limit,
                });
            }
        }

        let now = Instant::now();
        if let (Some(interval), Some(existing)) = (self.write_interval, self.values.get(key)) {
            if now.duration_since(existing.written_at) < interval {
                self.rejected_writes += 1;
                return Err(CacheError::RateLimited(key.to_string()));
            }
        }

        let expires_at = (options.ttl_seconds > 0).then(|| now + Duration::from_secs(options.ttl_seconds));
        self.values.insert(
            key.to_string(),
            StoredValue {
                value,
                metadata: options.metadata,
                expires_at,
                written_at: now,
            },
        );
        self.writes += 1;
        Ok(())
    }
}

// =============================================================================
// Redis store
// =============================================================================

/// Redis-backed store
///
/// Values live under their key; metadata under `{key}#meta` with the same
/// expiry. Both are written in one MULTI/EXEC transaction.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: ConnectionManager,
    operation_timeout: Duration,
}

impl RedisKvStore {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns CacheError::Unavailable if the URL is invalid or the server
    /// cannot be reached within the connection timeout.
    pub async fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| CacheError::Unavailable(format!("Invalid Redis URL: {}", e)))?;

        let connect_timeout = Duration::from_millis(config.connection_timeout_ms);
        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Unavailable(format!(
                    "Timed out connecting to Redis after {}ms",
                    config.connection_timeout_ms
                ))
            })?
            .map_err(|e| CacheError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(
            operation_timeout_ms = config.operation_timeout_ms,
            "Connected to Redis cache store"
        );

        Ok(Self {
            connection,
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
        })
    }

    pub fn meta_key(key: &str) -> String {
        format!("{}#meta", key)
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        key: &str,
        pipeline: redis::Pipeline,
    ) -> Result<T, CacheError> {
        let mut connection = self.connection.clone();
        match tokio::time::timeout(self.operation_timeout, pipeline.query_async::<T>(&mut connection)).await
        {
            Ok(result) => result.map_err(|e| map_redis_error(key, e)),
            Err(_) => Err(CacheError::Unavailable(format!(
                "Redis operation on '{}' timed out after {}ms",
                key,
                self.operation_timeout.as_millis()
            ))),
        }
    }
}

/// BUSY, TRYAGAIN and LOADING mean "later"; everything else is a failure
fn map_redis_error(key: &str, err: RedisError) -> CacheError {
    match err.code() {
        Some("BUSY") | Some("TRYAGAIN") | Some("LOADING") => {
            CacheError::RateLimited(format!("{}: {}", key, err))
        }
        Some("EXECABORT") => CacheError::Conflict(format!("{}: {}", key, err)),
        _ => CacheError::Unavailable(err.to_string()),
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<KvValue>, CacheError> {
        let meta_key = Self::meta_key(key);
        let (value, metadata) = match range {
            None => {
                let mut pipe = redis::pipe();
                pipe.cmd("GET").arg(key).cmd("GET").arg(&meta_key);
                let (value, metadata): (Option<Vec<u8>>, Option<Vec<u8>>) = self.query(key, pipe).await?;
                match value {
                    Some(value) => (value, metadata),
                    None => return Ok(None),
                }
            }
            Some(range) => {
                // GETRANGE answers "" for a missing key, so check existence first
                let mut pipe = redis::pipe();
                pipe.cmd("EXISTS")
                    .arg(key)
                    .cmd("GETRANGE")
                    .arg(key)
                    .arg(range.start)
                    .arg(range.end)
                    .cmd("GET")
                    .arg(&meta_key);
                let (exists, value, metadata): (bool, Vec<u8>, Option<Vec<u8>>) =
                    self.query(key, pipe).await?;
                if !exists {
                    return Ok(None);
                }
                (value, metadata)
            }
        };

        Ok(Some(KvValue {
            value: Bytes::from(value),
            metadata: metadata.map(Bytes::from),
        }))
    }

    async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> Result<(), CacheError> {
        let meta_key = Self::meta_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic();

        let set = pipe.cmd("SET").arg(key).arg(value.as_ref());
        if options.ttl_seconds > 0 {
            set.arg("EX").arg(options.ttl_seconds);
        }
        set.ignore();

        match &options.metadata {
            Some(metadata) => {
                let set_meta = pipe.cmd("SET").arg(&meta_key).arg(metadata.as_ref());
                if options.ttl_seconds > 0 {
                    set_meta.arg("EX").arg(options.ttl_seconds);
                }
                set_meta.ignore();
            }
            None => {
                pipe.cmd("DEL").arg(&meta_key).ignore();
            }
        }

        self.query::<()>(key, pipe).await
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&Bytes>,
        value: Bytes,
        options: PutOptions,
    ) -> Result<(), CacheError> {
        let mut pipe = redis::pipe();
        pipe.cmd("EVAL")
            .arg(COMPARE_AND_PUT_SCRIPT)
            .arg(2)
            .arg(key)
            .arg(Self::meta_key(key))
            .arg(i64::from(expected.is_some()))
            .arg(expected.map(|v| v.as_ref()).unwrap_or_default())
            .arg(value.as_ref())
            .arg(options.ttl_seconds)
            .arg(i64::from(options.metadata.is_some()))
            .arg(options.metadata.as_deref().unwrap_or_default());

        let (written,): (i64,) = self.query(key, pipe).await?;
        if written == 1 {
            Ok(())
        } else {
            Err(CacheError::Conflict(format!("{} changed since it was read", key)))
        }
    }
}

/// KEYS: value, metadata. ARGV: has-expected, expected, value, ttl, has-meta, meta
const COMPARE_AND_PUT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
local ttl = tonumber(ARGV[4])
if ttl > 0 then
  redis.call('SET', KEYS[1], ARGV[3], 'EX', ttl)
else
  redis.call('SET', KEYS[1], ARGV[3])
end
if ARGV[5] == '1' then
  if ttl > 0 then
    redis.call('SET', KEYS[2], ARGV[6], 'EX', ttl)
  else
    redis.call('SET', KEYS[2], ARGV[6])
  end
else
  redis.call('DEL', KEYS[2])
end
return 1
"#;
