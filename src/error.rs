// Error types module

use thiserror::Error;

/// Where a rate limit was reported from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// The external transformation proxy answered 429
    Proxy,
    /// The backing key-value store rejected a write
    Store,
}

impl RateLimitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitSource::Proxy => "proxy",
            RateLimitSource::Store => "store",
        }
    }
}

/// Centralized error type for the edge pipeline
///
/// Every handling site matches exhaustively, so adding a variant forces each
/// layer to decide how it recovers from it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EdgeError {
    /// No pattern matched, or every source of every matching origin was exhausted
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed configuration (raised at load time only)
    #[error("Configuration error: {0}")]
    Validation(String),

    /// Transformation proxy failure not otherwise classified
    #[error("Transformation proxy error (status {status}): {message}")]
    Proxy { status: u16, message: String },

    /// The proxy refused the asset because of its size
    #[error("Size limit exceeded{}", .limit_bytes.map(|b| format!(" ({} bytes)", b)).unwrap_or_default())]
    SizeLimitExceeded { limit_bytes: Option<u64> },

    /// The requested clip duration is outside what the proxy allows
    #[error("Duration limit exceeded (min {min_secs:?}s, max {max_secs:?}s)")]
    DurationLimitExceeded {
        min_secs: Option<f64>,
        max_secs: Option<f64>,
    },

    /// Rate limited by the proxy or the backing store
    #[error("Rate limited by {}", .from.as_str())]
    RateLimited { from: RateLimitSource },

    /// Backing store or object storage unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested byte range cannot be served for this entry
    #[error("Range not satisfiable (total size {total_size})")]
    RangeNotSatisfiable { total_size: u64 },
}

pub type Result<T> = std::result::Result<T, EdgeError>;

impl EdgeError {
    /// HTTP status code surfaced to the client for this error
    pub fn http_status(&self) -> u16 {
        match self {
            EdgeError::NotFound(_) => 404,
            EdgeError::Validation(_) => 500,
            EdgeError::Proxy { status, .. } => {
                if *status >= 500 {
                    *status
                } else {
                    502
                }
            }
            EdgeError::SizeLimitExceeded { .. } => 413,
            EdgeError::DurationLimitExceeded { .. } => 400,
            EdgeError::RateLimited { .. } => 429,
            EdgeError::Storage(_) => 502,
            EdgeError::RangeNotSatisfiable { .. } => 416,
        }
    }

    /// Short machine-readable error type used in diagnostics headers
    pub fn error_type(&self) -> &'static str {
        match self {
            EdgeError::NotFound(_) => "not_found",
            EdgeError::Validation(_) => "validation",
            EdgeError::Proxy { .. } => "proxy_error",
            EdgeError::SizeLimitExceeded { .. } => "size_limit",
            EdgeError::DurationLimitExceeded { .. } => "duration_limit",
            EdgeError::RateLimited { .. } => "rate_limited",
            EdgeError::Storage(_) => "storage_error",
            EdgeError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
        }
    }
}
