//! Cache error types
//!
//! The backing store signals rate limits and write conflicts separately from
//! every other failure, because only those two are worth retrying.

use thiserror::Error;

use crate::error::{EdgeError, RateLimitSource};
use crate::retry::RetryableError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The store rejected a write to a key written too recently
    #[error("Write rate limited: {0}")]
    RateLimited(String),

    /// A concurrent writer touched the same key
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Connection failure, timeout or any other store-side error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data does not add up (missing chunk, length mismatch)
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("Value too large: {size} bytes exceeds {limit}")]
    ValueTooLarge { size: u64, limit: u64 },
}

impl RetryableError for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(self, CacheError::RateLimited(_) | CacheError::Conflict(_))
    }
}

impl From<CacheError> for EdgeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::RateLimited(_) => EdgeError::RateLimited {
                from: RateLimitSource::Store,
            },
            other => EdgeError::Storage(other.to_string()),
        }
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CacheError::Serialization(format!("MessagePack encoding failed: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CacheError::Serialization(format!("MessagePack decoding failed: {}", err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
