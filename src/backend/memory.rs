//! In-process object store
//!
//! Behaves like a single-request S3 PUT: the entity tag is the quoted MD5 of the
//! body. Useful for local development and as a test double.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use super::{encode_key, with_scheme, ObjectBackend, ObjectWriter, WriteOptions};
use crate::error::{Result, StorageError};

/// Default chunk size requested from uploaders: 16KB
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

const MEMORY_HOST: &str = "memory.local";

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub data: Bytes,
    pub options: WriteOptions,
    pub etag: String,
}

#[derive(Default)]
struct Inner {
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<(String, String), StoredEntry>>,
}

/// In-memory [`ObjectBackend`]
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
    buffer_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Create with a custom write chunk size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            ..Self::new()
        }
    }

    /// Fetch a stored object
    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredEntry> {
        self.inner
            .objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.inner.buckets.read().contains(bucket)
    }

    /// Number of objects across all buckets
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.has_bucket(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.inner.buckets.write().insert(bucket.to_string());
        Ok(())
    }

    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        options: WriteOptions,
    ) -> Result<Box<dyn ObjectWriter>> {
        if !self.has_bucket(bucket) {
            return Err(StorageError::Connection(format!("NoSuchBucket: {}", bucket)));
        }

        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: BytesMut::with_capacity(preallocation(options.content_length, self.buffer_size)),
            options,
            buffer_size: self.buffer_size,
        }))
    }

    async fn entity_tag(&self, bucket: &str, key: &str) -> Result<String> {
        self.get(bucket, key)
            .map(|entry| entry.etag)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.get(bucket, key).is_some())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
        secure: bool,
    ) -> Result<String> {
        Ok(format!(
            "{}?X-Amz-Expires={}&X-Amz-Signature=memory",
            self.public_url(bucket, key, secure),
            expires.as_secs()
        ))
    }

    fn public_url(&self, bucket: &str, key: &str, secure: bool) -> String {
        with_scheme(
            &format!("{}/{}/{}", MEMORY_HOST, bucket, encode_key(key)),
            secure,
        )
    }
}

struct MemoryWriter {
    inner: Arc<Inner>,
    bucket: String,
    key: String,
    options: WriteOptions,
    buffer: BytesMut,
    buffer_size: usize,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let data = self.buffer.split().freeze();
        let etag = format!("\"{:x}\"", md5::compute(&data));
        self.inner.objects.write().insert(
            (self.bucket.clone(), self.key.clone()),
            StoredEntry {
                data,
                options: self.options.clone(),
                etag,
            },
        );
        Ok(())
    }
}

/// Initial buffer capacity: the declared length is only a hint
fn preallocation(content_length: u64, buffer_size: usize) -> usize {
    usize::try_from(content_length).map_or(buffer_size, |len| len.min(buffer_size))
}
