// Transformation proxy configuration

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ERROR_CODE_HEADER, DEFAULT_TRANSFORM_TIMEOUT_MS};

fn default_timeout_ms() -> u64 {
    DEFAULT_TRANSFORM_TIMEOUT_MS
}

fn default_error_code_header() -> String {
    DEFAULT_ERROR_CODE_HEADER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Base URL of the external transformation proxy
    pub proxy_base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Response header carrying the proxy's numeric error code
    #[serde(default = "default_error_code_header")]
    pub error_code_header: String,
    /// Public base URL for object storage sources that have no `url` of their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage_base_url: Option<String>,
}

impl TransformConfig {
    pub fn new(proxy_base_url: impl Into<String>) -> Self {
        Self {
            proxy_base_url: proxy_base_url.into(),
            timeout_ms: default_timeout_ms(),
            error_code_header: default_error_code_header(),
            object_storage_base_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_http_url(&self.proxy_base_url) {
            return Err(format!(
                "transform.proxy_base_url '{}' must be an absolute http(s) URL",
                self.proxy_base_url
            ));
        }
        if self.timeout_ms == 0 {
            return Err("transform.timeout_ms must be greater than 0".to_string());
        }
        if self.error_code_header.trim().is_empty() {
            return Err("transform.error_code_header cannot be empty".to_string());
        }
        if let Some(url) = &self.object_storage_base_url {
            if !is_http_url(url) {
                return Err(format!(
                    "transform.object_storage_base_url '{}' must be an absolute http(s) URL",
                    url
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.starts_with('/'))
}
