//! Health check endpoint
//!
//! Reports the service version and whether the configured bucket answers.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub storage: StorageHealth,
}

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub bucket: Option<String>,
    pub reachable: bool,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageHealth {
    fn failed(bucket: Option<String>, error: impl ToString) -> Self {
        Self {
            bucket,
            reachable: false,
            exists: false,
            error: Some(error.to_string()),
        }
    }
}

/// Probe the bucket without creating it
async fn storage_health(state: &AppState) -> StorageHealth {
    let bucket = match state.attachments().client().bucket().await {
        Ok(bucket) => bucket,
        Err(e) => return StorageHealth::failed(None, e),
    };
    match bucket.exists().await {
        Ok(exists) => StorageHealth {
            bucket: Some(bucket.name().to_string()),
            reachable: true,
            exists,
            error: None,
        },
        Err(e) => StorageHealth::failed(Some(bucket.name().to_string()), e),
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = storage_health(&state).await;
    let status = if storage.reachable && storage.exists {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "s3-attachments",
        storage,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum_test::TestServer;

    use crate::attachments::AttachmentStore;
    use crate::backend::MemoryBackend;
    use crate::config::{ConnectionConfig, StorageSettings};

    fn state(bucket: Option<&str>) -> AppState {
        let config = Arc::new(ConnectionConfig::from_settings(StorageSettings {
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: bucket.map(str::to_string),
            ..Default::default()
        }));
        AppState::new(AttachmentStore::with_backend(
            config,
            Arc::new(MemoryBackend::new()),
        ))
    }

    #[tokio::test]
    async fn test_health_reports_bucket() {
        let state = state(Some("files"));
        let server = TestServer::new(router(state.clone())).unwrap();

        let body = server.get("/").await.json::<serde_json::Value>();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["service"], "s3-attachments");
        assert_eq!(body["storage"]["bucket"], "files");
        assert_eq!(body["storage"]["reachable"], true);
        assert_eq!(body["storage"]["exists"], false);

        state.attachments().client().ensure_bucket().await.unwrap();

        let response = server.get("/").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"]["exists"], true);
        assert!(body["storage"].get("error").is_none());
    }

    #[tokio::test]
    async fn test_health_without_bucket_setting() {
        let server = TestServer::new(router(state(None))).unwrap();

        let body = server.get("/").await.json::<serde_json::Value>();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["storage"]["reachable"], false);
        assert!(body["storage"]["bucket"].is_null());
        assert!(body["storage"]["error"].as_str().unwrap().contains("bucket"));
    }
}
