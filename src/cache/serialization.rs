// Entry metadata serialization using MessagePack

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::entry::{ChunkManifest, EntryMetadata, StatusClass};
use crate::cache::CacheError;

/// Serialization format version for schema evolution
const SERIALIZATION_VERSION: u8 = 1;

/// Serializable wrapper for EntryMetadata with version marker
#[derive(Debug, Serialize, Deserialize)]
struct SerializableMetadata {
    /// Schema version for forward/backward compatibility
    version: u8,
    content_type: Option<String>,
    content_length: u64,
    status: u16,
    status_class: StatusClass,
    ttl_seconds: u64,
    /// Seconds since UNIX_EPOCH
    stored_at_secs: i64,
    /// Seconds since UNIX_EPOCH
    expires_at_secs: i64,
    chunk_manifest: Option<ChunkManifest>,
    fallback_original: bool,
    source: Option<String>,
    cache_version: u64,
}

/// Serializes entry metadata to MessagePack bytes with a version marker
pub fn serialize_metadata(metadata: &EntryMetadata) -> Result<Vec<u8>, CacheError> {
    let serializable = SerializableMetadata {
        version: SERIALIZATION_VERSION,
        content_type: metadata.content_type.clone(),
        content_length: metadata.content_length,
        status: metadata.status,
        status_class: metadata.status_class,
        ttl_seconds: metadata.ttl_seconds,
        stored_at_secs: metadata.stored_at.timestamp(),
        expires_at_secs: metadata.expires_at.timestamp(),
        chunk_manifest: metadata.chunk_manifest,
        fallback_original: metadata.fallback_original,
        source: metadata.source.clone(),
        cache_version: metadata.cache_version,
    };

    Ok(rmp_serde::to_vec(&serializable)?)
}

/// Deserializes MessagePack bytes back into entry metadata
///
/// # Errors
/// Returns CacheError::Serialization if:
/// - Data is corrupt or truncated
/// - Version is unsupported
/// - A chunk manifest disagrees with the content length
pub fn deserialize_metadata(bytes: &[u8]) -> Result<EntryMetadata, CacheError> {
    let serializable: SerializableMetadata = rmp_serde::from_slice(bytes)?;

    if serializable.version != SERIALIZATION_VERSION {
        return Err(CacheError::Serialization(format!(
            "Unsupported schema version: {} (expected: {})",
            serializable.version, SERIALIZATION_VERSION
        )));
    }

    if let Some(manifest) = serializable.chunk_manifest {
        if manifest.total_size != serializable.content_length || manifest.chunk_size == 0 {
            return Err(CacheError::Serialization(format!(
                "Invalid chunk manifest: {} bytes in chunks of {} for a {} byte entry",
                manifest.total_size, manifest.chunk_size, serializable.content_length
            )));
        }
    }

    Ok(EntryMetadata {
        content_type: serializable.content_type,
        content_length: serializable.content_length,
        status: serializable.status,
        status_class: serializable.status_class,
        ttl_seconds: serializable.ttl_seconds,
        stored_at: timestamp(serializable.stored_at_secs)?,
        expires_at: timestamp(serializable.expires_at_secs)?,
        chunk_manifest: serializable.chunk_manifest,
        fallback_original: serializable.fallback_original,
        source: serializable.source,
        cache_version: serializable.cache_version,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CacheError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CacheError::Serialization(format!("Invalid timestamp: {}", secs)))
}
