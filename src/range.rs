//! Byte range handling shared by the source fetcher and the cache store.
//!
//! Ranges arrive from clients as `Range` headers (`bytes=0-1023`, `bytes=500-`,
//! `bytes=-500`). They are kept in their requested form as [`RangeRequest`]
//! until the total size of the representation is known, then resolved into an
//! inclusive [`ByteRange`] that is always inside `[0, total_size)`.

use crate::error::EdgeError;

/// A range as requested by a client, before the total size is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=start-end` (inclusive)
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-length`
    Suffix { length: u64 },
}

/// An inclusive, resolved byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create an inclusive range; `end` must not precede `start`
    pub fn new(start: u64, end: u64) -> Result<Self, EdgeError> {
        if end < start {
            return Err(EdgeError::Validation(format!(
                "Invalid byte range: end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of bytes covered by this range
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for an outgoing `Range` header
    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Value for a `Content-Range` response header
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

impl RangeRequest {
    /// Resolve against a known total size, clamping the end to the last byte
    ///
    /// # Errors
    /// Returns `EdgeError::RangeNotSatisfiable` when the range starts beyond
    /// the end of the representation or the representation is empty.
    pub fn resolve(&self, total_size: u64) -> Result<ByteRange, EdgeError> {
        if total_size == 0 {
            return Err(EdgeError::RangeNotSatisfiable { total_size });
        }
        let last = total_size - 1;

        let (start, end) = match *self {
            RangeRequest::Bounded { start, end } => (start, end.min(last)),
            RangeRequest::From { start } => (start, last),
            RangeRequest::Suffix { length } => {
                if length == 0 {
                    return Err(EdgeError::RangeNotSatisfiable { total_size });
                }
                (total_size.saturating_sub(length), last)
            }
        };

        if start > last || end < start {
            return Err(EdgeError::RangeNotSatisfiable { total_size });
        }

        Ok(ByteRange { start, end })
    }

    /// Value for an outgoing `Range` header in its unresolved form
    pub fn to_header_value(&self) -> String {
        match *self {
            RangeRequest::Bounded { start, end } => format!("bytes={}-{}", start, end),
            RangeRequest::From { start } => format!("bytes={}-", start),
            RangeRequest::Suffix { length } => format!("bytes=-{}", length),
        }
    }
}

impl From<ByteRange> for RangeRequest {
    fn from(range: ByteRange) -> Self {
        RangeRequest::Bounded {
            start: range.start,
            end: range.end,
        }
    }
}

/// Parse a single-range `Range` header value
///
/// Multi-range requests are not served from the cache; they parse as `None`
/// so callers fall back to a full response.
pub fn parse_range_header(header_value: &str) -> Option<RangeRequest> {
    let header_value = header_value.trim();

    let (unit, ranges) = header_value.split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }

    let ranges = ranges.trim();
    if ranges.contains(',') {
        return None;
    }

    let (start_str, end_str) = ranges.split_once('-')?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    match (start_str.is_empty(), end_str.is_empty()) {
        (true, true) => None,
        (true, false) => end_str
            .parse::<u64>()
            .ok()
            .map(|length| RangeRequest::Suffix { length }),
        (false, true) => start_str
            .parse::<u64>()
            .ok()
            .map(|start| RangeRequest::From { start }),
        (false, false) => {
            let start = start_str.parse::<u64>().ok()?;
            let end = end_str.parse::<u64>().ok()?;
            if end < start {
                return None;
            }
            Some(RangeRequest::Bounded { start, end })
        }
    }
}

/// Parse a `Content-Range` header (`bytes 0-99/1000`) into the range and total size
pub fn parse_content_range(header_value: &str) -> Option<(ByteRange, Option<u64>)> {
    let rest = header_value.trim().strip_prefix("bytes")?.trim();
    let (range_part, total_part) = rest.split_once('/')?;
    let (start, end) = range_part.trim().split_once('-')?;
    let range = ByteRange::new(start.trim().parse().ok()?, end.trim().parse().ok()?).ok()?;
    let total = match total_part.trim() {
        "*" => None,
        value => Some(value.parse().ok()?),
    };
    Some((range, total))
}
