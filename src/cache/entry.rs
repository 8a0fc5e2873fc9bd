//! Cache entry types
//!
//! This module defines the stored shape of a cached response:
//! - `EntryMetadata`: everything but the body, stored alongside the value
//! - `ChunkManifest`: layout of an entry split across several keys
//! - `CacheEntry`: metadata plus the body (or the requested slice of it)

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TtlPolicy;
use crate::range::ByteRange;

/// HTTP status class, used to pick the TTL at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Success,
        }
    }

    pub fn ttl_seconds(&self, policy: &TtlPolicy) -> u64 {
        match self {
            StatusClass::Success => policy.ok,
            StatusClass::Redirect => policy.redirects,
            StatusClass::ClientError => policy.client_error,
            StatusClass::ServerError => policy.server_error,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StatusClass::ClientError | StatusClass::ServerError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success => "success",
            StatusClass::Redirect => "redirect",
            StatusClass::ClientError => "client_error",
            StatusClass::ServerError => "server_error",
        }
    }
}

/// Layout of a chunked entry
///
/// Chunk `i` covers bytes `[i * chunk_size, min((i + 1) * chunk_size, total_size) - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub total_size: u64,
}

impl ChunkManifest {
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunk_count = ((total_size + chunk_size - 1) / chunk_size) as u32;
        Self {
            chunk_size,
            chunk_count,
            total_size,
        }
    }

    /// Byte range covered by chunk `index`
    pub fn chunk_bounds(&self, index: u32) -> Option<ByteRange> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size) - 1;
        Some(ByteRange { start, end })
    }

    /// Expected length of chunk `index`
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        self.chunk_bounds(index).map(|r| r.len())
    }

    /// Indexes of the chunks overlapping `range`
    pub fn covering(&self, range: ByteRange) -> std::ops::RangeInclusive<u32> {
        let first = (range.start / self.chunk_size) as u32;
        let last = (range.end.min(self.total_size.saturating_sub(1)) / self.chunk_size) as u32;
        first..=last
    }
}

/// Everything stored about an entry except its body
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMetadata {
    pub content_type: Option<String>,
    /// Full length of the body in bytes
    pub content_length: u64,
    pub status: u16,
    pub status_class: StatusClass,
    /// Chosen from the status class at first write; refresh keeps it
    pub ttl_seconds: u64,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub chunk_manifest: Option<ChunkManifest>,
    /// Untransformed bytes served after the proxy refused the asset's size
    pub fallback_original: bool,
    /// `origin/kind/priority` of the source the content came from
    pub source: Option<String>,
    pub cache_version: u64,
}

impl EntryMetadata {
    pub fn is_chunked(&self) -> bool {
        self.chunk_manifest.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds until expiry, zero once expired
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }

    /// A recorded failure rather than content
    pub fn is_negative(&self) -> bool {
        self.status_class.is_error()
    }

    /// Negative entries are left to expire so a fixed source is seen again
    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold_seconds: u64) -> bool {
        !self.is_negative() && !self.is_expired(now) && self.remaining_ttl(now) < threshold_seconds
    }

    /// Copy with `expires_at` pushed out by the original ttl from `now`
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        let mut refreshed = self.clone();
        refreshed.stored_at = now;
        refreshed.expires_at = now + chrono::Duration::seconds(self.ttl_seconds as i64);
        refreshed
    }
}

/// Descriptive fields supplied by the caller on write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryInfo {
    pub content_type: Option<String>,
    pub fallback_original: bool,
    pub source: Option<String>,
    pub cache_version: u64,
}

/// A cached response as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub metadata: EntryMetadata,
    /// The full body, or only the requested range
    pub body: Bytes,
    pub range: Option<ByteRange>,
}

impl CacheEntry {
    pub fn status(&self) -> u16 {
        if self.range.is_some() {
            206
        } else {
            self.metadata.status
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.content_type.as_deref()
    }

    /// Length of the returned body
    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn total_size(&self) -> u64 {
        self.metadata.content_length
    }

    pub fn content_range(&self) -> Option<String> {
        self.range.map(|r| r.content_range(self.metadata.content_length))
    }
}
