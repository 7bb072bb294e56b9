//! Artifact storage on top of the object_store crate
//!
//! Every artifact lands under `{prefix}/{operation_id}/{name}.{ext}`, so the
//! key alone identifies the operation that produced it and a redelivered job
//! overwrites its own earlier upload instead of creating a second object.
//! Each bucket maps to its own object_store backend; backends are built
//! lazily the first time a bucket is touched.

use chrono::Utc;
use object_store::{
    Attribute, Attributes, ObjectStore, PutOptions, aws::AmazonS3Builder, local::LocalFileSystem,
    memory::InMemory, path::Path as StoragePath,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Failed to open bucket {bucket}: {message}")]
    Backend { bucket: String, message: String },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Location and type of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
}

impl FileDescriptor {
    /// Operation id encoded in the key's second segment
    pub fn operation_id(&self) -> Option<&str> {
        let mut segments = self.key.split('/');
        segments.next()?;
        segments.next().filter(|id| !id.is_empty())
    }
}

/// Bucket/key pair naming a stored object, as carried in job params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl From<&FileDescriptor> for ObjectRef {
    fn from(file: &FileDescriptor) -> Self {
        Self {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Memory,
    Local(PathBuf),
    S3 {
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
    },
}

/// Uploads and downloads artifact bytes
#[derive(Clone)]
pub struct StorageGateway {
    default_bucket: String,
    backend: Backend,
    stores: Arc<RwLock<HashMap<String, Arc<dyn ObjectStore>>>>,
}

impl StorageGateway {
    pub fn from_config(config: &StorageConfig) -> Self {
        let backend = match config.provider {
            StorageProvider::Memory => Backend::Memory,
            StorageProvider::Local => Backend::Local(config.root.clone()),
            StorageProvider::S3 => Backend::S3 {
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            },
        };

        Self {
            default_bucket: config.bucket.clone(),
            backend,
            stores: Arc::default(),
        }
    }

    /// In-memory storage for testing/development
    pub fn in_memory(default_bucket: impl Into<String>) -> Self {
        Self {
            default_bucket: default_bucket.into(),
            backend: Backend::Memory,
            stores: Arc::default(),
        }
    }

    /// Register an explicit backend for a bucket
    pub fn with_bucket(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        if let Ok(mut stores) = self.stores.write() {
            stores.insert(bucket.into(), store);
        }
        self
    }

    /// Bucket that `save` writes into
    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self
            .stores
            .read()
            .ok()
            .and_then(|stores| stores.get(bucket).cloned())
        {
            return Ok(store);
        }

        let store = self.open_bucket(bucket)?;
        let mut stores = self.stores.write().map_err(|_| StorageError::Backend {
            bucket: bucket.to_string(),
            message: "bucket registry poisoned".to_string(),
        })?;
        Ok(stores.entry(bucket.to_string()).or_insert(store).clone())
    }

    fn open_bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let backend_error = |message: String| StorageError::Backend {
            bucket: bucket.to_string(),
            message,
        };

        match &self.backend {
            Backend::Memory => Ok(Arc::new(InMemory::new())),
            Backend::Local(root) => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir).map_err(|e| backend_error(e.to_string()))?;
                let store = LocalFileSystem::new_with_prefix(&dir)?;
                Ok(Arc::new(store))
            }
            Backend::S3 {
                region,
                endpoint,
                access_key,
                secret_key,
            } => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let (Some(key), Some(secret)) = (access_key, secret_key) {
                    builder = builder
                        .with_access_key_id(key)
                        .with_secret_access_key(secret);
                }
                let store = builder.build().map_err(|e| backend_error(e.to_string()))?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Store an artifact under the deterministic key for its operation
    ///
    /// Saving the same inputs twice writes the same key; the second upload
    /// replaces the first.
    pub async fn save(
        &self,
        data: Vec<u8>,
        operation_id: &str,
        title: Option<&str>,
        prefix: &str,
        ext: &str,
    ) -> Result<FileDescriptor> {
        let key = build_key(prefix, operation_id, title, ext)?;
        let content_type = content_type_for(ext);
        let size = data.len();

        let store = self.store(&self.default_bucket)?;
        let path = StoragePath::from(key.as_str());

        if matches!(self.backend, Backend::Local(_)) {
            store.put(&path, data.into()).await?;
        } else {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.clone().into());
            let options = PutOptions {
                attributes,
                ..Default::default()
            };
            store.put_opts(&path, data.into(), options).await?;
        }

        tracing::info!(bucket = %self.default_bucket, key, size, "Uploaded artifact");

        Ok(FileDescriptor {
            bucket: self.default_bucket.clone(),
            key,
            content_type,
        })
    }

    /// Write bytes under an explicit key, bypassing the key scheme
    pub async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let store = self.store(bucket)?;
        store.put(&StoragePath::from(key), data.into()).await?;
        tracing::debug!(bucket, key, "Stored object");
        Ok(())
    }

    /// Fetch an object's bytes
    pub async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let store = self.store(bucket)?;
        let path = StoragePath::from(key);

        let result = match store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;

        tracing::info!(bucket, key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes.to_vec())
    }

    /// Check if key exists
    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let store = self.store(bucket)?;
        let path = StoragePath::from(key);

        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build `{prefix}/{operation_id}/{name}.{ext}`
///
/// The title is reduced to `[A-Za-z0-9._-]`; when nothing usable remains
/// the name falls back to the current UTC time as `YYYYMMDDTHHMMSS`.
pub fn build_key(prefix: &str, operation_id: &str, title: Option<&str>, ext: &str) -> Result<String> {
    if operation_id.is_empty() || operation_id.contains('/') {
        return Err(StorageError::InvalidKey(format!(
            "operation id {:?} cannot be a key segment",
            operation_id
        )));
    }

    let ext = ext.trim_start_matches('.');
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StorageError::InvalidKey(format!("extension {:?}", ext)));
    }

    let name = title
        .map(sanitize_title)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| Utc::now().format("%Y%m%dT%H%M%S").to_string());

    Ok(format!("{}/{}/{}.{}", prefix, operation_id, name, ext))
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_` and strip edge junk
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    replaced.trim_matches(|c| c == '_' || c == '.').to_string()
}

/// Content type for a file extension; unknown extensions are octet streams
pub fn content_type_for(ext: &str) -> String {
    let essence = match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => return mime::APPLICATION_OCTET_STREAM.to_string(),
    };

    essence
        .parse::<mime::Mime>()
        .map(|m| m.to_string())
        .unwrap_or_else(|_| mime::APPLICATION_OCTET_STREAM.to_string())
}
