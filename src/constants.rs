// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Config deserialization wires these in through `#[serde(default = "...")]`
// helper functions so the YAML can stay minimal.

// =============================================================================
// Source fetch defaults
// =============================================================================

/// Default timeout for a single source fetch in milliseconds
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 10_000;

/// Default AWS service name used when signing remote origin requests
pub const DEFAULT_SIGV4_SERVICE: &str = "s3";

// =============================================================================
// Transformation proxy defaults
// =============================================================================

/// Default timeout for a transformation proxy request in milliseconds
pub const DEFAULT_TRANSFORM_TIMEOUT_MS: u64 = 30_000;

/// Response header carrying the proxy-specific numeric error code
pub const DEFAULT_ERROR_CODE_HEADER: &str = "cf-resized";

/// Option name that carries the requested clip duration
pub const DURATION_OPTION: &str = "duration";

// =============================================================================
// Cache defaults
// =============================================================================

/// Default key prefix for every entry written to the backing store
pub const DEFAULT_KEY_PREFIX: &str = "kitsune";

/// Payloads larger than this are stored as chunks (20 MiB)
pub const DEFAULT_CHUNK_THRESHOLD_BYTES: u64 = 20 * 1024 * 1024;

/// Size of each stored chunk (5 MiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Largest single value the backing store accepts (25 MiB)
pub const DEFAULT_MAX_VALUE_BYTES: u64 = 25 * 1024 * 1024;

/// Entries whose remaining TTL drops below this are refreshed in the background
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;

/// How long a version counter read is trusted before going back to the store
pub const DEFAULT_VERSION_CACHE_TTL_SECS: u64 = 60;

/// Maximum number of in-flight background tasks per pipeline
pub const DEFAULT_MAX_BACKGROUND_TASKS: usize = 64;

/// Maximum key length before the key body is replaced by its SHA256 hash
pub const MAX_KEY_LENGTH: usize = 250;

// =============================================================================
// TTL-by-status defaults (seconds)
// =============================================================================

pub const DEFAULT_TTL_OK_SECS: u64 = 86_400;
pub const DEFAULT_TTL_REDIRECT_SECS: u64 = 3_600;
pub const DEFAULT_TTL_CLIENT_ERROR_SECS: u64 = 60;
pub const DEFAULT_TTL_SERVER_ERROR_SECS: u64 = 10;

// =============================================================================
// Write retry defaults
// =============================================================================

/// Default maximum write attempts (including the initial attempt)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff in milliseconds
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

/// Default maximum backoff in milliseconds
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

// =============================================================================
// Redis defaults
// =============================================================================

/// Default Redis connection timeout in milliseconds
pub const DEFAULT_REDIS_CONNECTION_TIMEOUT_MS: u64 = 5_000;

/// Default Redis operation timeout in milliseconds
pub const DEFAULT_REDIS_OPERATION_TIMEOUT_MS: u64 = 2_000;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log level filter
pub const DEFAULT_LOG_LEVEL: &str = "info";
