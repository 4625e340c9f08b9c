//! Object storage backends
//!
//! [`ObjectBackend`] is the remote store protocol the rest of the crate talks
//! to: bucket create-if-absent, single-request streaming writes, entity tags,
//! existence checks, deletes and URL generation.

mod memory;
mod s3;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use memory::{MemoryBackend, StoredEntry};
pub use s3::{S3Backend, S3Settings};

// ============================================================================
// Write Options
// ============================================================================

/// Canned access control applied to a written object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    /// Bucket default (no ACL header sent)
    Private,
    PublicRead,
}

/// Per-object headers for a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_disposition: String,
    pub content_type: String,
    pub content_length: u64,
    pub acl: Acl,
}

// ============================================================================
// Backend Traits
// ============================================================================

/// An open single-request object write.
///
/// Bytes passed to [`ObjectWriter::write`] go out as one request body, so the
/// stored object's entity tag is the MD5 of the whole body. Dropping a writer
/// without calling [`ObjectWriter::finish`] abandons the request.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Preferred chunk size for `write`
    fn buffer_size(&self) -> usize;

    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Complete the request and wait for the store to acknowledge it
    async fn finish(&mut self) -> Result<()>;
}

/// Remote object store protocol
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        options: WriteOptions,
    ) -> Result<Box<dyn ObjectWriter>>;

    /// Raw entity tag as the store reports it (usually quoted)
    async fn entity_tag(&self, bucket: &str, key: &str) -> Result<String>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Time-limited read URL
    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
        secure: bool,
    ) -> Result<String>;

    /// Stable unauthenticated URL. Does not touch the network.
    fn public_url(&self, bucket: &str, key: &str, secure: bool) -> String;
}

/// Force the scheme of `url` to `https` or `http`.
pub(crate) fn with_scheme(url: &str, secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };
    match url.split_once("://") {
        Some((_, rest)) => format!("{}://{}", scheme, rest),
        None => format!("{}://{}", scheme, url),
    }
}

/// Object keys in URL paths keep `/` separators but escape everything else
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
