// Cache key derivation
//
// Format:
// - Short keys: "{prefix}:{path}:{options}:v{version}"
// - Long keys:  "{prefix}:hash:{sha256}:v{version}"
//
// The path is URL-encoded (slashes kept) so ':' in a path can never be
// confused with the separator. Options are the sorted option string, so two
// requests with the same options in a different order share one key.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::MAX_KEY_LENGTH;
use crate::transform::TransformOptions;

/// Placeholder used in the options segment when no options were given
const NO_OPTIONS: &str = "-";

const ORIGINAL_SUFFIX: &str = ":original";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a transformed asset
    pub fn derive(prefix: &str, path: &str, options: &TransformOptions, version: u64) -> Self {
        let path = normalize_path(path);
        let option_string = options.option_string();
        let options_segment = if option_string.is_empty() {
            NO_OPTIONS
        } else {
            option_string.as_str()
        };

        let full_key = format!(
            "{}:{}:{}:v{}",
            prefix,
            encode_path(&path),
            options_segment,
            version
        );

        if full_key.len() > MAX_KEY_LENGTH {
            Self(hash_long_key(prefix, &path, options_segment, version))
        } else {
            Self(full_key)
        }
    }

    /// Key for untransformed content served after a size-limit fallback
    pub fn original(prefix: &str, path: &str, version: u64) -> Self {
        let base = Self::derive(prefix, path, &TransformOptions::new(), version);
        Self(format!("{}{}", base.0, ORIGINAL_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_original(&self) -> bool {
        self.0.ends_with(ORIGINAL_SUFFIX)
    }

    /// Key of chunk `index` of a chunked entry
    pub fn chunk_key(&self, index: u32) -> String {
        format!("{}:chunk:{}", self.0, index)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leading slash, no duplicate or trailing slashes, no query string
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn encode_path(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

fn hash_long_key(prefix: &str, path: &str, options: &str, version: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(options.as_bytes());

    format!("{}:hash:{}:v{}", prefix, hex::encode(hasher.finalize()), version)
}
