// Object storage binding configuration

use serde::{Deserialize, Serialize};

/// One object storage binding, referenced from sources by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl ObjectStoreConfig {
    pub fn validate(&self, binding: &str) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err(format!(
                "Object store '{}' has empty bucket name",
                binding
            ));
        }
        if self.region.trim().is_empty() {
            return Err(format!("Object store '{}' has empty region", binding));
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(format!(
                "Object store '{}' requires access_key and secret_key",
                binding
            ));
        }
        Ok(())
    }
}
