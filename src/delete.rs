//! Object removal

use std::sync::Arc;

use crate::client::StoreClient;
use crate::error::Result;

/// Deletes objects if they exist
pub struct DeleteOp {
    client: Arc<StoreClient>,
}

impl DeleteOp {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    /// Remove `key`. Returns whether an object was deleted; a missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let object = self.client.object_ref(key).await?;
        if !object.exists().await? {
            tracing::debug!(key = %key, "Nothing to delete");
            return Ok(false);
        }

        object.delete().await?;
        tracing::info!(key = %key, "Deleted object");
        Ok(true)
    }
}
