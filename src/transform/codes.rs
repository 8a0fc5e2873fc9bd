//! Transformation proxy error classification
//!
//! The proxy reports failures through the HTTP status, a numeric code in a
//! dedicated response header, and free-form message text. [`classify`] turns
//! the three into one outcome. It is pure so it can be tested without a proxy.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{EdgeError, RateLimitSource};

/// Known proxy error codes
pub const CODE_INVALID_OPTIONS: u32 = 9401;
pub const CODE_INPUT_TOO_LARGE: u32 = 9402;
pub const CODE_NOT_FOUND: u32 = 9404;
pub const CODE_ORIGIN_ERROR: u32 = 9408;
pub const CODE_PAYLOAD_TOO_LARGE: u32 = 9413;
pub const CODE_RATE_LIMITED: u32 = 9429;

pub fn describe_code(code: u32) -> Option<&'static str> {
    match code {
        CODE_INVALID_OPTIONS => Some("invalid transform options"),
        CODE_INPUT_TOO_LARGE => Some("input exceeds size limit"),
        CODE_NOT_FOUND => Some("source not found"),
        CODE_ORIGIN_ERROR => Some("source returned an error"),
        CODE_PAYLOAD_TOO_LARGE => Some("payload too large"),
        CODE_RATE_LIMITED => Some("rate limited"),
        _ => None,
    }
}

/// Why the proxy could not produce a transformed asset
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyFailure {
    /// The proxy could not read the source
    NotFound { status: u16 },
    SizeLimitExceeded { status: u16, limit_bytes: Option<u64> },
    DurationLimitExceeded {
        status: u16,
        min_secs: Option<f64>,
        max_secs: Option<f64>,
    },
    RateLimited { status: u16 },
    ProxyError { status: u16, message: String },
}

impl ProxyFailure {
    pub fn status(&self) -> u16 {
        match self {
            ProxyFailure::NotFound { status }
            | ProxyFailure::SizeLimitExceeded { status, .. }
            | ProxyFailure::DurationLimitExceeded { status, .. }
            | ProxyFailure::RateLimited { status }
            | ProxyFailure::ProxyError { status, .. } => *status,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyFailure::NotFound { .. } => "not_found",
            ProxyFailure::SizeLimitExceeded { .. } => "size_limit",
            ProxyFailure::DurationLimitExceeded { .. } => "duration_limit",
            ProxyFailure::RateLimited { .. } => "rate_limited",
            ProxyFailure::ProxyError { .. } => "proxy_error",
        }
    }

    pub fn into_edge_error(self, path: &str) -> EdgeError {
        match self {
            ProxyFailure::NotFound { .. } => EdgeError::NotFound(path.to_string()),
            ProxyFailure::SizeLimitExceeded { limit_bytes, .. } => {
                EdgeError::SizeLimitExceeded { limit_bytes }
            }
            ProxyFailure::DurationLimitExceeded {
                min_secs, max_secs, ..
            } => EdgeError::DurationLimitExceeded { min_secs, max_secs },
            ProxyFailure::RateLimited { .. } => EdgeError::RateLimited {
                from: RateLimitSource::Proxy,
            },
            ProxyFailure::ProxyError { status, message } => EdgeError::Proxy { status, message },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success,
    Failure(ProxyFailure),
}

/// Classify a proxy response from its status, error code header and body text
pub fn classify(status: u16, error_code: Option<u32>, message: &str) -> Classification {
    if (200..300).contains(&status) {
        return Classification::Success;
    }

    let failure = match (status, error_code) {
        (429, _) | (_, Some(CODE_RATE_LIMITED)) => ProxyFailure::RateLimited { status },
        (404, _) | (_, Some(CODE_NOT_FOUND)) | (_, Some(CODE_ORIGIN_ERROR)) => {
            ProxyFailure::NotFound { status }
        }
        (413, _) | (_, Some(CODE_INPUT_TOO_LARGE)) | (_, Some(CODE_PAYLOAD_TOO_LARGE)) => {
            ProxyFailure::SizeLimitExceeded {
                status,
                limit_bytes: parse_size_limit(message),
            }
        }
        // Limit markers only count when the proxy rejected the request itself
        (400..=499, _) => {
            if let Some((min_secs, max_secs)) = parse_duration_limit(message) {
                ProxyFailure::DurationLimitExceeded {
                    status,
                    min_secs,
                    max_secs,
                }
            } else if has_size_marker(message) {
                ProxyFailure::SizeLimitExceeded {
                    status,
                    limit_bytes: parse_size_limit(message),
                }
            } else {
                ProxyFailure::ProxyError {
                    status,
                    message: message.trim().to_string(),
                }
            }
        }
        _ => ProxyFailure::ProxyError {
            status,
            message: message.trim().to_string(),
        },
    };

    Classification::Failure(failure)
}

fn size_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(bytes|byte|gib|mib|kib|gb|mb|kb|b)\b").ok())
        .as_ref()
}

fn range_duration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)between\s+(\d+(?:\.\d+)?)\s*(ms|s|m)?\s+and\s+(\d+(?:\.\d+)?)\s*(ms|s|m)?")
            .ok()
    })
    .as_ref()
}

fn max_duration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:max|maximum|at most|up to)\s*(?:of|is|:)?\s*(\d+(?:\.\d+)?)\s*(ms|s|m)?")
            .ok()
    })
    .as_ref()
}

fn has_size_marker(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("too large")
        || lower.contains("size limit")
        || (lower.contains("file size") && lower.contains("exceed"))
}

/// Parse a size such as "256MB" or "268435456 bytes" (binary multiples)
pub fn parse_size_limit(message: &str) -> Option<u64> {
    let caps = size_regex()?.captures(message)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier: f64 = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "kb" | "kib" => 1024.0,
        _ => 1.0,
    };
    Some((value * multiplier) as u64)
}

fn unit_secs(value: &str, unit: Option<&str>) -> Option<f64> {
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit.map(|u| u.to_ascii_lowercase()) {
        Some(u) if u == "ms" => 0.001,
        Some(u) if u == "m" => 60.0,
        _ => 1.0,
    };
    Some(value * multiplier)
}

/// Parse a duration limit from a message mentioning "duration"
///
/// Recognizes "between Xs and Ys" and "max Ys" forms. Returns the bounds
/// found, either of which may be missing.
pub fn parse_duration_limit(message: &str) -> Option<(Option<f64>, Option<f64>)> {
    if !message.to_ascii_lowercase().contains("duration") {
        return None;
    }

    if let Some(caps) = range_duration_regex().and_then(|re| re.captures(message)) {
        let min = caps
            .get(1)
            .and_then(|m| unit_secs(m.as_str(), caps.get(2).map(|u| u.as_str())));
        let max = caps
            .get(3)
            .and_then(|m| unit_secs(m.as_str(), caps.get(4).map(|u| u.as_str())));
        return Some((min, max));
    }

    if let Some(caps) = max_duration_regex().and_then(|re| re.captures(message)) {
        let max = caps
            .get(1)
            .and_then(|m| unit_secs(m.as_str(), caps.get(2).map(|u| u.as_str())));
        return Some((None, max));
    }

    Some((None, None))
}
