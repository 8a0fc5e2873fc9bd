//! Origin and source configuration types.
//!
//! An origin is a named path pattern with an ordered list of candidate
//! sources. Each source says where the asset may live (an object storage
//! binding, an authenticated remote HTTP origin, or an unauthenticated
//! fallback HTTP origin) and how to build its path from the pattern's
//! capture groups.
//!
//! ```yaml
//! origins:
//!   - name: premium
//!     matcher: "^/videos/(?P<id>[^/]+)\\.mp4$"
//!     ttl: { ok: 86400, client_error: 60 }
//!     sources:
//!       - type: object_storage
//!         priority: 0
//!         bucket: VIDEOS
//!         path: "videos/{id}.mp4"
//!       - type: remote_http
//!         priority: 1
//!         url: "https://origin.example.com"
//!         path: "/media/{id}.mp4"
//!         auth: { type: bearer, token: "${ORIGIN_TOKEN}" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{
    DEFAULT_SIGV4_SERVICE, DEFAULT_TTL_CLIENT_ERROR_SECS, DEFAULT_TTL_OK_SECS,
    DEFAULT_TTL_REDIRECT_SECS, DEFAULT_TTL_SERVER_ERROR_SECS,
};

fn default_true() -> bool {
    true
}

fn default_ttl_ok() -> u64 {
    DEFAULT_TTL_OK_SECS
}

fn default_ttl_redirects() -> u64 {
    DEFAULT_TTL_REDIRECT_SECS
}

fn default_ttl_client_error() -> u64 {
    DEFAULT_TTL_CLIENT_ERROR_SECS
}

fn default_ttl_server_error() -> u64 {
    DEFAULT_TTL_SERVER_ERROR_SECS
}

fn default_sigv4_service() -> String {
    DEFAULT_SIGV4_SERVICE.to_string()
}

/// Origin configuration (one path pattern with candidate sources)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    pub name: String,
    /// Regex matched against the request path
    pub matcher: String,
    /// Lower is tried first; origins without a priority keep declaration order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Capture group names the source templates may reference.
    /// When omitted, the regex's named groups are used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture_groups: Vec<String>,
    #[serde(default = "default_true")]
    pub cacheable: bool,
    #[serde(default)]
    pub ttl: TtlPolicy,
    pub sources: Vec<SourceConfig>,
}

/// Source type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Object storage bucket binding
    ObjectStorage,
    /// Remote HTTP origin, usually authenticated
    RemoteHttp,
    /// Unauthenticated fallback HTTP origin
    FallbackHttp,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ObjectStorage => "object_storage",
            SourceType::RemoteHttp => "remote_http",
            SourceType::FallbackHttp => "fallback_http",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, SourceType::RemoteHttp | SourceType::FallbackHttp)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate source inside an origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub priority: u32,
    /// Path template, e.g. `videos/{id}.mp4` or `/media/{1}`
    pub path: String,
    /// Base URL. Required for HTTP sources; for object storage it is the
    /// public URL the transformation proxy reads the object through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Object storage binding name (key into `object_stores`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra request headers sent to HTTP sources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SourceAuthConfig>,
}

/// Authentication for a source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAuthConfig {
    #[serde(flatten)]
    pub method: AuthMethod,
    /// Treat authentication failures as "not found" so failover continues.
    /// Off unless explicitly enabled per source.
    #[serde(default)]
    pub permissive: bool,
}

/// Authentication method for a source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Header {
        name: String,
        value: String,
    },
    AwsSigv4 {
        access_key: String,
        secret_key: String,
        region: String,
        #[serde(default = "default_sigv4_service")]
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Bearer { .. } => "bearer",
            AuthMethod::Basic { .. } => "basic",
            AuthMethod::Header { .. } => "header",
            AuthMethod::AwsSigv4 { .. } => "aws_sigv4",
        }
    }
}

/// TTL-by-status policy (seconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlPolicy {
    #[serde(default = "default_ttl_ok")]
    pub ok: u64,
    #[serde(default = "default_ttl_redirects")]
    pub redirects: u64,
    #[serde(default = "default_ttl_client_error")]
    pub client_error: u64,
    #[serde(default = "default_ttl_server_error")]
    pub server_error: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            ok: default_ttl_ok(),
            redirects: default_ttl_redirects(),
            client_error: default_ttl_client_error(),
            server_error: default_ttl_server_error(),
        }
    }
}
