// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub mod cache;
pub mod logging;
pub mod object_store;
pub mod origin;
pub mod retry;
pub mod transform;

pub use cache::{CacheSettings, RedisConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use object_store::ObjectStoreConfig;
pub use origin::{AuthMethod, OriginConfig, SourceAuthConfig, SourceConfig, SourceType, TtlPolicy};
pub use retry::WriteRetryConfigYaml;
pub use transform::TransformConfig;

use crate::origin::template::PathTemplate;
use transform::is_http_url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub transform: TransformConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Object storage bindings by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub object_stores: BTreeMap<String, ObjectStoreConfig>,
    pub origins: Vec<OriginConfig>,
    #[serde(skip)]
    pub generation: u64, // Config version, increments on reload
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // Fail on the first referenced variable that is not set
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        let mut config: Config = serde_yaml::from_str(&substituted).map_err(|e| e.to_string())?;
        config.generation = 0;

        // Sources are tried in ascending priority order
        for origin in &mut config.origins {
            origin.sources.sort_by_key(|s| s.priority);
        }

        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.origins.is_empty() {
            return Err("At least one origin must be configured".to_string());
        }

        self.transform.validate()?;
        self.cache.validate()?;

        for (binding, store) in &self.object_stores {
            store.validate(binding)?;
        }

        let mut seen_names = HashSet::new();

        for origin in &self.origins {
            if origin.name.trim().is_empty() {
                return Err("Origin name cannot be empty".to_string());
            }

            if !seen_names.insert(origin.name.as_str()) {
                return Err(format!("Duplicate origin name '{}'", origin.name));
            }

            let regex = Regex::new(&origin.matcher).map_err(|e| {
                format!(
                    "Origin '{}' has invalid matcher '{}': {}",
                    origin.name, origin.matcher, e
                )
            })?;
            let regex_names: Vec<String> =
                regex.capture_names().flatten().map(String::from).collect();

            for group in &origin.capture_groups {
                if !regex_names.contains(group) {
                    return Err(format!(
                        "Origin '{}': capture group '{}' is not defined by matcher '{}'",
                        origin.name, group, origin.matcher
                    ));
                }
            }

            let template_names = if origin.capture_groups.is_empty() {
                &regex_names
            } else {
                &origin.capture_groups
            };

            if origin.sources.is_empty() {
                return Err(format!(
                    "Origin '{}': At least one source is required",
                    origin.name
                ));
            }

            let mut seen_sources = HashSet::new();
            for source in &origin.sources {
                if !seen_sources.insert((source.source_type, source.priority)) {
                    return Err(format!(
                        "Origin '{}': Duplicate {} source with priority {}. Each source must have a unique (type, priority).",
                        origin.name, source.source_type, source.priority
                    ));
                }

                self.validate_source(&origin.name, source)?;

                let template = PathTemplate::parse(&source.path)
                    .map_err(|e| format!("Origin '{}': {}", origin.name, e))?;
                template
                    .check_resolvable(template_names, regex.captures_len())
                    .map_err(|e| format!("Origin '{}': {}", origin.name, e))?;
            }
        }

        Ok(())
    }

    fn validate_source(&self, origin: &str, source: &SourceConfig) -> Result<(), String> {
        if let Some(url) = &source.url {
            if !is_http_url(url) {
                return Err(format!(
                    "Origin '{}': {} source url '{}' must be an absolute http(s) URL",
                    origin, source.source_type, url
                ));
            }
        }

        if source.timeout_ms == Some(0) {
            return Err(format!(
                "Origin '{}': {} source priority {} has timeout_ms 0",
                origin, source.source_type, source.priority
            ));
        }

        match source.source_type {
            SourceType::RemoteHttp | SourceType::FallbackHttp => {
                if source.url.is_none() {
                    return Err(format!(
                        "Origin '{}': {} source priority {} requires a url",
                        origin, source.source_type, source.priority
                    ));
                }
            }
            SourceType::ObjectStorage => {
                let binding = source.bucket.as_deref().unwrap_or("").trim();
                if binding.is_empty() {
                    return Err(format!(
                        "Origin '{}': object_storage source priority {} requires a bucket binding",
                        origin, source.priority
                    ));
                }
                if !self.object_stores.is_empty() && !self.object_stores.contains_key(binding) {
                    return Err(format!(
                        "Origin '{}': object_storage source references unknown binding '{}'",
                        origin, binding
                    ));
                }
                if source.url.is_none() && self.transform.object_storage_base_url.is_none() {
                    return Err(format!(
                        "Origin '{}': object_storage source priority {} needs a url or transform.object_storage_base_url",
                        origin, source.priority
                    ));
                }
                if source.auth.is_some() {
                    return Err(format!(
                        "Origin '{}': object_storage sources use binding credentials, auth is not allowed",
                        origin
                    ));
                }
            }
        }

        if let Some(auth) = &source.auth {
            validate_auth(origin, &auth.method)?;
        }

        Ok(())
    }

    /// Sources configured with permissive authentication, as `(origin, source_type, priority)`
    pub fn permissive_sources(&self) -> Vec<(&str, SourceType, u32)> {
        self.origins
            .iter()
            .flat_map(|origin| {
                origin
                    .sources
                    .iter()
                    .filter(|s| s.auth.as_ref().map(|a| a.permissive).unwrap_or(false))
                    .map(move |s| (origin.name.as_str(), s.source_type, s.priority))
            })
            .collect()
    }
}

fn validate_auth(origin: &str, method: &AuthMethod) -> Result<(), String> {
    let missing = match method {
        AuthMethod::Bearer { token } => token.is_empty().then_some("token"),
        AuthMethod::Basic { username, .. } => username.is_empty().then_some("username"),
        AuthMethod::Header { name, value } => {
            if name.trim().is_empty() {
                Some("name")
            } else if value.is_empty() {
                Some("value")
            } else {
                None
            }
        }
        AuthMethod::AwsSigv4 {
            access_key,
            secret_key,
            region,
            ..
        } => {
            if access_key.is_empty() {
                Some("access_key")
            } else if secret_key.is_empty() {
                Some("secret_key")
            } else if region.is_empty() {
                Some("region")
            } else {
                None
            }
        }
    };

    match missing {
        Some(field) => Err(format!(
            "Origin '{}': {} auth requires a non-empty '{}'",
            origin,
            method.as_str(),
            field
        )),
        None => Ok(()),
    }
}
