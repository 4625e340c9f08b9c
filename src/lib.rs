//! S3 Attachments Library
//!
//! Client-side engine for storing user-uploaded files in an S3-compatible
//! object store: verified streaming uploads with retry, public or signed
//! fetch URLs, and idempotent deletes.
//!
//! # Modules
//!
//! - `config`: lazily loaded storage settings (YAML file, environment, or fixed)
//! - `backend`: the remote store protocol with S3 and in-memory implementations
//! - `client`: shared connection handle, bucket and object references
//! - `upload`: digest-verified upload pipeline
//! - `url`: public and signed URL generation
//! - `retry`: bounded retry with exponential backoff

pub mod attachments;
pub mod backend;
pub mod client;
pub mod config;
pub mod delete;
pub mod error;
pub mod retry;
pub mod routes;
pub mod state;
pub mod upload;
pub mod url;

pub use attachments::{disk_filename, AttachmentStore};
pub use client::{Bucket, ObjectRef, StoreClient};
pub use config::{ConfigSource, ConnectionConfig, EnvSource, FileSource, StaticSource, StorageSettings};
pub use delete::DeleteOp;
pub use error::{ConfigError, Result, StorageError};
pub use retry::RetryPolicy;
pub use upload::{StoredObject, UploadPipeline, UploadSource};
pub use url::{UrlSigner, Visibility};
