//! Store client: the shared connection handle plus bucket and object references.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::backend::{ObjectBackend, ObjectWriter, S3Backend, S3Settings, WriteOptions};
use crate::config::ConnectionConfig;
use crate::error::Result;

/// Owns the authenticated connection and the bucket-ensure logic.
///
/// The backend is built on first use from [`ConnectionConfig`] and cached for
/// the lifetime of the client.
pub struct StoreClient {
    config: Arc<ConnectionConfig>,
    backend: OnceCell<Arc<dyn ObjectBackend>>,
}

impl StoreClient {
    /// Client that connects to S3 on first use
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self {
            config,
            backend: OnceCell::new(),
        }
    }

    /// Client over an already-built backend
    pub fn with_backend(config: Arc<ConnectionConfig>, backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            config,
            backend: OnceCell::new_with(Some(backend)),
        }
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    /// The cached backend, building it on first call
    pub async fn connect(&self) -> Result<Arc<dyn ObjectBackend>> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                let settings = S3Settings::from_config(&self.config)?;
                let backend: Arc<dyn ObjectBackend> = Arc::new(S3Backend::new(&settings));
                Ok::<_, crate::error::StorageError>(backend)
            })
            .await?;
        Ok(backend.clone())
    }

    /// The configured bucket, without checking that it exists
    pub async fn bucket(&self) -> Result<Bucket> {
        let backend = self.connect().await?;
        Ok(Bucket {
            backend,
            name: self.config.bucket()?,
        })
    }

    /// The configured bucket, created remotely if absent. Idempotent.
    pub async fn ensure_bucket(&self) -> Result<Bucket> {
        let bucket = self.bucket().await?;
        bucket.ensure().await?;
        Ok(bucket)
    }

    /// Reference to an object in the configured bucket. Does not touch the network.
    pub async fn object_ref(&self, key: &str) -> Result<ObjectRef> {
        Ok(self.bucket().await?.object(key))
    }
}

/// A bucket on the connected backend
#[derive(Clone)]
pub struct Bucket {
    backend: Arc<dyn ObjectBackend>,
    name: String,
}

impl Bucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.bucket_exists(&self.name).await
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        if !self.exists().await? {
            tracing::info!(bucket = %self.name, "Creating bucket");
            self.backend.create_bucket(&self.name).await?;
        }
        Ok(())
    }

    /// Handle to a possibly nonexistent object
    pub fn object(&self, key: &str) -> ObjectRef {
        ObjectRef {
            backend: self.backend.clone(),
            bucket: self.name.clone(),
            key: key.to_string(),
        }
    }
}

/// A possibly nonexistent object
#[derive(Clone)]
pub struct ObjectRef {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
    key: String,
}

impl ObjectRef {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn open_write(&self, options: WriteOptions) -> Result<Box<dyn ObjectWriter>> {
        self.backend.open_write(&self.bucket, &self.key, options).await
    }

    /// Entity tag with surrounding quotes removed
    pub async fn etag(&self) -> Result<String> {
        let raw = self.backend.entity_tag(&self.bucket, &self.key).await?;
        Ok(strip_quotes(&raw).to_string())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.object_exists(&self.bucket, &self.key).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.backend.delete_object(&self.bucket, &self.key).await
    }

    pub async fn presigned_url(&self, expires: Duration, secure: bool) -> Result<String> {
        self.backend
            .presigned_get_url(&self.bucket, &self.key, expires, secure)
            .await
    }

    pub fn public_url(&self, secure: bool) -> String {
        self.backend.public_url(&self.bucket, &self.key, secure)
    }
}

fn strip_quotes(etag: &str) -> &str {
    let etag = etag.strip_prefix('"').unwrap_or(etag);
    etag.strip_suffix('"').unwrap_or(etag)
}
