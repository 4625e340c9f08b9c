//! Attachment Routes
//!
//! Endpoints:
//! - POST /attachments - Upload a file (multipart `file` field, optional `digest`)
//! - GET /attachments/:key - Redirect to the object's fetch URL
//! - DELETE /attachments/:key - Remove an object

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::attachments::disk_filename;
use crate::error::AppError;
use crate::state::AppState;
use crate::upload::StoredObject;

/// Maximum upload size: 100MB
pub const MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub digest: String,
    pub url: String,
}

/// Create the attachments router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(upload))
        .route("/:key", get(download).delete(remove))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .with_state(state)
}

struct UploadedFile {
    filename: String,
    content_type: String,
    data: Bytes,
}

/// POST /attachments
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut file: Option<UploadedFile> = None;
    let mut expected_digest: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let data = field.bytes().await?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
            Some("digest") => {
                let digest = field.text().await?;
                let digest = digest.trim();
                if !digest.is_empty() {
                    expected_digest = Some(digest.to_ascii_lowercase());
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("missing 'file' field".to_string()))?;
    let key = disk_filename(&file.filename);

    let mut object = StoredObject::new(&key, &file.filename, &file.content_type)
        .with_content_length(file.data.len() as u64);
    if let Some(digest) = expected_digest {
        object = object.with_expected_digest(digest);
    }

    let size = file.data.len();
    let digest = state.attachments().put(&object, file.data.into()).await?;
    let url = state.attachments().url_for(&key).await?;

    tracing::info!(
        key = %key,
        filename = %file.filename,
        size,
        "Attachment stored"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key,
            filename: file.filename,
            content_type: file.content_type,
            size,
            digest,
            url,
        }),
    ))
}

/// GET /attachments/:key
async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Redirect, AppError> {
    let url = state.attachments().url_for(&key).await?;
    Ok(Redirect::temporary(&url))
}

/// DELETE /attachments/:key
async fn remove(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.attachments().delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
