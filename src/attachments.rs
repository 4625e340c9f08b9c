//! Attachment store: uploads, URLs and deletes over one shared connection.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::backend::ObjectBackend;
use crate::client::StoreClient;
use crate::config::ConnectionConfig;
use crate::delete::DeleteOp;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::upload::{StoredObject, UploadPipeline, UploadSource};
use crate::url::UrlSigner;

/// Entry point for applications storing user files remotely
pub struct AttachmentStore {
    client: Arc<StoreClient>,
    uploads: UploadPipeline,
    urls: UrlSigner,
    deletes: DeleteOp,
}

impl AttachmentStore {
    /// Store backed by S3, connected on first use
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self::from_client(Arc::new(StoreClient::new(config)))
    }

    /// Store over a specific backend
    pub fn with_backend(config: Arc<ConnectionConfig>, backend: Arc<dyn ObjectBackend>) -> Self {
        Self::from_client(Arc::new(StoreClient::with_backend(config, backend)))
    }

    fn from_client(client: Arc<StoreClient>) -> Self {
        Self {
            uploads: UploadPipeline::new(client.clone()),
            urls: UrlSigner::new(client.clone()),
            deletes: DeleteOp::new(client.clone()),
            client,
        }
    }

    /// Replace the retry policy used for whole-upload attempts
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.uploads = self.uploads.with_retry_policy(policy);
        self
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    /// Upload and verify; returns the hex MD5 of the stored bytes
    pub async fn put(&self, object: &StoredObject, source: UploadSource<'_>) -> Result<String> {
        self.uploads.put(object, source).await
    }

    pub async fn url_for(&self, key: &str) -> Result<String> {
        self.urls.url_for(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.client.object_ref(key).await?.exists().await
    }
}

/// Storage key for a newly uploaded file:
/// `{yyMMddHHmmss}_{8 hex chars}_{sanitized name}`.
pub fn disk_filename(display_name: &str) -> String {
    let timestamp = Utc::now().format("%y%m%d%H%M%S");
    let unique = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", timestamp, &unique[..8], sanitize_filename(display_name))
}

/// Keep `[A-Za-z0-9._-]` from the final path component; everything else becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
