//! Cache configuration types
//!
//! Covers the chunking thresholds of the backing key-value store, the
//! background refresh window, the version counter cache, write retry and the
//! Redis connection.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_CHUNK_THRESHOLD_BYTES, DEFAULT_KEY_PREFIX,
    DEFAULT_MAX_BACKGROUND_TASKS, DEFAULT_MAX_VALUE_BYTES, DEFAULT_REDIS_CONNECTION_TIMEOUT_MS,
    DEFAULT_REDIS_OPERATION_TIMEOUT_MS, DEFAULT_REFRESH_THRESHOLD_SECS,
    DEFAULT_VERSION_CACHE_TTL_SECS,
};

use super::retry::WriteRetryConfigYaml;

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_chunk_threshold_bytes() -> u64 {
    DEFAULT_CHUNK_THRESHOLD_BYTES
}

fn default_chunk_size_bytes() -> u64 {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_max_value_bytes() -> u64 {
    DEFAULT_MAX_VALUE_BYTES
}

fn default_refresh_threshold_seconds() -> u64 {
    DEFAULT_REFRESH_THRESHOLD_SECS
}

fn default_version_cache_ttl_seconds() -> u64 {
    DEFAULT_VERSION_CACHE_TTL_SECS
}

fn default_max_background_tasks() -> usize {
    DEFAULT_MAX_BACKGROUND_TASKS
}

fn default_connection_timeout_ms() -> u64 {
    DEFAULT_REDIS_CONNECTION_TIMEOUT_MS
}

fn default_operation_timeout_ms() -> u64 {
    DEFAULT_REDIS_OPERATION_TIMEOUT_MS
}

/// Main cache configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_chunk_threshold_bytes")]
    pub chunk_threshold_bytes: u64,
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: u64,
    #[serde(default = "default_refresh_threshold_seconds")]
    pub refresh_threshold_seconds: u64,
    #[serde(default = "default_version_cache_ttl_seconds")]
    pub version_cache_ttl_seconds: u64,
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
    #[serde(default)]
    pub write_retry: WriteRetryConfigYaml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
            chunk_threshold_bytes: default_chunk_threshold_bytes(),
            chunk_size_bytes: default_chunk_size_bytes(),
            max_value_bytes: default_max_value_bytes(),
            refresh_threshold_seconds: default_refresh_threshold_seconds(),
            version_cache_ttl_seconds: default_version_cache_ttl_seconds(),
            max_background_tasks: default_max_background_tasks(),
            write_retry: WriteRetryConfigYaml::default(),
            redis: None,
        }
    }
}

impl CacheSettings {
    /// Validate cache configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.key_prefix.trim().is_empty() {
            return Err("cache.key_prefix cannot be empty".to_string());
        }
        if self.key_prefix.contains(':') {
            return Err(format!(
                "cache.key_prefix '{}' cannot contain ':'",
                self.key_prefix
            ));
        }
        if self.chunk_size_bytes == 0 {
            return Err("cache.chunk_size_bytes must be greater than 0".to_string());
        }
        if self.chunk_size_bytes > self.max_value_bytes {
            return Err(format!(
                "cache.chunk_size_bytes ({}) cannot exceed max_value_bytes ({})",
                self.chunk_size_bytes, self.max_value_bytes
            ));
        }
        if self.chunk_threshold_bytes < self.chunk_size_bytes {
            return Err(format!(
                "cache.chunk_threshold_bytes ({}) must be at least chunk_size_bytes ({})",
                self.chunk_threshold_bytes, self.chunk_size_bytes
            ));
        }
        if self.chunk_threshold_bytes > self.max_value_bytes {
            return Err(format!(
                "cache.chunk_threshold_bytes ({}) cannot exceed max_value_bytes ({})",
                self.chunk_threshold_bytes, self.max_value_bytes
            ));
        }
        if self.max_background_tasks == 0 {
            return Err("cache.max_background_tasks must be greater than 0".to_string());
        }
        self.write_retry.validate()?;
        if let Some(redis) = &self.redis {
            redis.validate()?;
        }
        Ok(())
    }
}

/// Redis connection for the backing key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl RedisConfig {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            connection_timeout_ms: default_connection_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }

    /// Validate redis configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err("redis_url must start with redis:// or rediss:// (for TLS)".to_string());
        }
        if self.operation_timeout_ms == 0 {
            return Err("cache.redis.operation_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
