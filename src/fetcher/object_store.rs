//! Object storage bindings
//!
//! Sources of type `object_storage` read through an [`ObjectStore`]. The
//! production binding is [`S3ObjectStore`] (any S3-compatible endpoint);
//! [`MemoryObjectStore`] backs tests and local development.

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::DateTimeFormat;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ObjectStoreConfig;
use crate::range::{parse_content_range, ByteRange, RangeRequest};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectStoreError {
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
    #[error("Range not satisfiable (total size {total_size})")]
    RangeNotSatisfiable { total_size: u64 },
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    pub total_size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Object body (or a range of it) with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Bytes,
    pub meta: ObjectMeta,
    /// Set when only part of the object was returned
    pub range: Option<ByteRange>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object, or the requested range of it. `Ok(None)` when absent.
    async fn get(
        &self,
        key: &str,
        range: Option<RangeRequest>,
    ) -> Result<Option<StoredObject>, ObjectStoreError>;

    /// Read object metadata only. `Ok(None)` when absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError>;
}

/// In-memory object store
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, (Bytes, Option<String>)>>>,
    /// Simulate an unavailable store if true
    simulate_unavailable: Arc<RwLock<bool>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>, content_type: Option<&str>) {
        self.objects
            .write()
            .insert(key.into(), (body.into(), content_type.map(String::from)));
    }

    pub fn remove(&self, key: &str) {
        self.objects.write().remove(key);
    }

    pub fn set_unavailable(&self, enabled: bool) {
        *self.simulate_unavailable.write() = enabled;
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn check_available(&self) -> Result<(), ObjectStoreError> {
        if *self.simulate_unavailable.read() {
            return Err(ObjectStoreError::Unavailable(
                "Simulated object store outage".to_string(),
            ));
        }
        Ok(())
    }

    fn meta_for(body: &Bytes, content_type: &Option<String>) -> ObjectMeta {
        ObjectMeta {
            content_type: content_type.clone(),
            total_size: body.len() as u64,
            etag: Some(format!("\"{}\"", crate::s3::sha256_hex(body))),
            last_modified: None,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(
        &self,
        key: &str,
        range: Option<RangeRequest>,
    ) -> Result<Option<StoredObject>, ObjectStoreError> {
        self.check_available()?;

        let Some((body, content_type)) = self.objects.read().get(key).cloned() else {
            return Ok(None);
        };
        let meta = Self::meta_for(&body, &content_type);

        match range {
            None => Ok(Some(StoredObject {
                body,
                meta,
                range: None,
            })),
            Some(requested) => {
                let total_size = meta.total_size;
                let resolved = requested
                    .resolve(total_size)
                    .map_err(|_| ObjectStoreError::RangeNotSatisfiable { total_size })?;
                Ok(Some(StoredObject {
                    body: body.slice(resolved.start as usize..=resolved.end as usize),
                    meta,
                    range: Some(resolved),
                }))
            }
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .get(key)
            .map(|(body, content_type)| Self::meta_for(body, content_type)))
    }
}

/// S3-compatible object store binding
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn from_config(config: &ObjectStoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(aws_credential_types::Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "kitsune",
            ));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    pub fn with_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn format_last_modified(value: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<String> {
    value.and_then(|d| d.fmt(DateTimeFormat::HttpDate).ok())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(
        &self,
        key: &str,
        range: Option<RangeRequest>,
    ) -> Result<Option<StoredObject>, ObjectStoreError> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(range) = range {
            request = request.range(range.to_header_value());
        }

        let output = match request.send().await {
            Ok(output) => output,
            Err(err) => {
                let service_error = err.as_service_error();
                if service_error.map(|e| e.is_no_such_key()).unwrap_or(false) {
                    return Ok(None);
                }
                if service_error.and_then(|e| e.code()) == Some("InvalidRange") {
                    let total_size = match self.head(key).await? {
                        Some(meta) => meta.total_size,
                        None => 0,
                    };
                    return Err(ObjectStoreError::RangeNotSatisfiable { total_size });
                }
                return Err(ObjectStoreError::Unavailable(format!(
                    "S3 get_object failed: {}",
                    err
                )));
            }
        };

        let content_range = output.content_range().and_then(parse_content_range);
        let content_length = output.content_length().unwrap_or(0).max(0) as u64;
        let (range, total_size) = match content_range {
            Some((range, total)) => (Some(range), total.unwrap_or(content_length)),
            None => (None, content_length),
        };

        let meta = ObjectMeta {
            content_type: output.content_type().map(String::from),
            total_size,
            etag: output.e_tag().map(String::from),
            last_modified: format_last_modified(output.last_modified()),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Unavailable(format!("Failed to read S3 body: {}", e)))?
            .into_bytes();

        Ok(Some(StoredObject { body, meta, range }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                content_type: output.content_type().map(String::from),
                total_size: output.content_length().unwrap_or(0).max(0) as u64,
                etag: output.e_tag().map(String::from),
                last_modified: format_last_modified(output.last_modified()),
            })),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(ObjectStoreError::Unavailable(format!(
                        "S3 head_object failed: {}",
                        err
                    )))
                }
            }
        }
    }
}
