//! Upload pipeline
//!
//! One attempt: rewind (when possible), open a single-request write, stream the
//! source through a [`DigestWriter`], then compare the local MD5 with the
//! store's entity tag. A mismatch is never reported as success.

use std::io::{Cursor, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use super::digest::DigestWriter;
use super::object::{SeekableSource, StoredObject, UploadSource};
use crate::backend::{Acl, ObjectWriter, WriteOptions};
use crate::client::{Bucket, StoreClient};
use crate::error::{Result, StorageError};
use crate::retry::RetryPolicy;
use crate::url::Visibility;

/// Streams objects to the store and verifies what it received
pub struct UploadPipeline {
    client: Arc<StoreClient>,
    retry: RetryPolicy,
    etag_retry: RetryPolicy,
}

impl UploadPipeline {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            etag_retry: RetryPolicy::default(),
        }
    }

    /// Policy for retrying whole attempts of replayable uploads
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Policy for retrying the entity tag fetch
    pub fn with_etag_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.etag_retry = policy;
        self
    }

    /// Upload `source` under `object.key` and return its verified hex MD5.
    pub async fn put(&self, object: &StoredObject, source: UploadSource<'_>) -> Result<String> {
        // Settings are resolved once; a bad configuration fails before any attempt
        let acl = Visibility::from_config(self.client.config())?.acl();
        let bucket = self.client.bucket().await?;
        let target = Target {
            bucket: &bucket,
            acl,
            object,
        };

        match source {
            UploadSource::Bytes(bytes) => {
                let length = bytes.len() as u64;
                let mut cursor = Cursor::new(bytes);
                self.put_replayable(target, &mut cursor, Some(length)).await
            }
            UploadSource::Seekable(reader) => {
                self.put_replayable(target, reader, object.content_length)
                    .await
            }
            UploadSource::Stream(reader) => {
                let length = object.content_length.ok_or_else(|| {
                    StorageError::InvalidInput(format!(
                        "content length required to stream {}",
                        object.key
                    ))
                })?;
                self.attempt(target, reader, length).await
            }
        }
    }

    async fn put_replayable<R>(
        &self,
        target: Target<'_>,
        reader: &mut R,
        length: Option<u64>,
    ) -> Result<String>
    where
        R: SeekableSource + ?Sized,
    {
        let name = format!("sending {}", target.object.key);
        let mut replay = Replay {
            pipeline: self,
            target,
            reader,
            length,
        };
        self.retry
            .run_with_if(
                &name,
                &mut replay,
                |replay| Box::pin(replay.attempt()),
                StorageError::is_retryable,
            )
            .await
    }

    async fn attempt<R>(&self, target: Target<'_>, reader: &mut R, length: u64) -> Result<String>
    where
        R: AsyncRead + Send + Unpin + ?Sized,
    {
        let object = target.object;
        let options = WriteOptions {
            content_disposition: object.content_disposition(),
            content_type: object.content_type.clone(),
            content_length: length,
            acl: target.acl,
        };

        target.bucket.ensure().await?;
        let remote_object = target.bucket.object(&object.key);
        let mut writer = DigestWriter::new(remote_object.open_write(options).await?);

        let mut buffer = vec![0u8; writer.buffer_size().max(1)];
        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            writer.write(Bytes::copy_from_slice(&buffer[..read])).await?;
        }
        writer.finish().await?;

        let local = writer.hex_digest();
        if let Some(expected) = &object.expected_digest {
            if !expected.eq_ignore_ascii_case(&local) {
                tracing::warn!(
                    key = %object.key,
                    expected = %expected,
                    actual = %local,
                    "wrong digest for file {}",
                    object.key
                );
            }
        }

        let remote = self
            .etag_retry
            .run(&format!("get MD5 for {}", object.key), || remote_object.etag())
            .await?;

        if remote != local {
            return Err(StorageError::Transfer {
                key: object.key.clone(),
                local,
                remote,
            });
        }

        tracing::info!(
            key = %object.key,
            bytes = writer.bytes_written(),
            digest = %local,
            "Uploaded object"
        );

        Ok(local)
    }
}

/// Where and how one upload is written
#[derive(Clone, Copy)]
struct Target<'a> {
    bucket: &'a Bucket,
    acl: Acl,
    object: &'a StoredObject,
}

/// State shared by the attempts of one replayable upload
struct Replay<'a, R: ?Sized> {
    pipeline: &'a UploadPipeline,
    target: Target<'a>,
    reader: &'a mut R,
    length: Option<u64>,
}

impl<R: SeekableSource + ?Sized> Replay<'_, R> {
    async fn attempt(&mut self) -> Result<String> {
        let length = match self.length {
            Some(length) => length,
            None => self.reader.seek(SeekFrom::End(0)).await?,
        };
        self.reader.seek(SeekFrom::Start(0)).await?;
        self.pipeline
            .attempt(self.target, &mut *self.reader, length)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Acl, MemoryBackend, ObjectBackend};
    use crate::config::{ConnectionConfig, StorageSettings};
    use crate::error::ConfigError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn settings(private: bool) -> StorageSettings {
        StorageSettings {
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: Some("files".to_string()),
            private,
            secure: true,
            ..Default::default()
        }
    }

    fn pipeline(backend: Arc<dyn ObjectBackend>, private: bool) -> UploadPipeline {
        pipeline_with(backend, settings(private))
    }

    fn pipeline_with(backend: Arc<dyn ObjectBackend>, settings: StorageSettings) -> UploadPipeline {
        let config = Arc::new(ConnectionConfig::from_settings(settings));
        UploadPipeline::new(Arc::new(StoreClient::with_backend(config, backend)))
    }

    fn payload() -> Vec<u8> {
        (0..4096u32).map(|i| (i % 251) as u8).collect()
    }

    fn photo() -> StoredObject {
        StoredObject::new("a1b2.png", "photo.png", "image/png")
    }

    /// Fails the first `failures` writes, then behaves like the wrapped backend
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicU32,
        rejected: bool,
        opened: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryBackend::with_buffer_size(1000),
                failures: AtomicU32::new(failures),
                rejected: false,
                opened: AtomicU32::new(0),
            }
        }

        /// Failed writes report a caller mistake instead of a network fault
        fn rejecting(failures: u32) -> Self {
            Self {
                rejected: true,
                ..Self::new(failures)
            }
        }
    }

    struct FailingWriter {
        rejected: bool,
    }

    #[async_trait]
    impl ObjectWriter for FailingWriter {
        fn buffer_size(&self) -> usize {
            1000
        }

        async fn write(&mut self, _chunk: Bytes) -> Result<()> {
            if self.rejected {
                Err(StorageError::InvalidInput("body rejected".to_string()))
            } else {
                Err(StorageError::Connection("connection reset".to_string()))
            }
        }

        async fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectBackend for FlakyBackend {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
            self.inner.bucket_exists(bucket).await
        }

        async fn create_bucket(&self, bucket: &str) -> Result<()> {
            self.inner.create_bucket(bucket).await
        }

        async fn open_write(
            &self,
            bucket: &str,
            key: &str,
            options: WriteOptions,
        ) -> Result<Box<dyn ObjectWriter>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Ok(Box::new(FailingWriter {
                    rejected: self.rejected,
                }));
            }
            self.inner.open_write(bucket, key, options).await
        }

        async fn entity_tag(&self, bucket: &str, key: &str) -> Result<String> {
            self.inner.entity_tag(bucket, key).await
        }

        async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
            self.inner.object_exists(bucket, key).await
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
            self.inner.delete_object(bucket, key).await
        }

        async fn presigned_get_url(
            &self,
            bucket: &str,
            key: &str,
            expires: Duration,
            secure: bool,
        ) -> Result<String> {
            self.inner.presigned_get_url(bucket, key, expires, secure).await
        }

        fn public_url(&self, bucket: &str, key: &str, secure: bool) -> String {
            self.inner.public_url(bucket, key, secure)
        }
    }

    /// Reports a fixed entity tag regardless of what was stored
    struct FixedEtagBackend {
        inner: MemoryBackend,
        etag: &'static str,
        fetches: AtomicU32,
    }

    #[async_trait]
    impl ObjectBackend for FixedEtagBackend {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
            self.inner.bucket_exists(bucket).await
        }

        async fn create_bucket(&self, bucket: &str) -> Result<()> {
            self.inner.create_bucket(bucket).await
        }

        async fn open_write(
            &self,
            bucket: &str,
            key: &str,
            options: WriteOptions,
        ) -> Result<Box<dyn ObjectWriter>> {
            self.inner.open_write(bucket, key, options).await
        }

        async fn entity_tag(&self, _bucket: &str, _key: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.etag.to_string())
        }

        async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
            self.inner.object_exists(bucket, key).await
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
            self.inner.delete_object(bucket, key).await
        }

        async fn presigned_get_url(
            &self,
            bucket: &str,
            key: &str,
            expires: Duration,
            secure: bool,
        ) -> Result<String> {
            self.inner.presigned_get_url(bucket, key, expires, secure).await
        }

        fn public_url(&self, bucket: &str, key: &str, secure: bool) -> String {
            self.inner.public_url(bucket, key, secure)
        }
    }

    #[tokio::test]
    async fn test_put_returns_verified_digest() {
        let backend = MemoryBackend::new();
        let uploads = pipeline(Arc::new(backend.clone()), false);
        let data = payload();

        let digest = uploads.put(&photo(), data.clone().into()).await.unwrap();

        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(digest, format!("{:x}", md5::compute(&data)));

        let stored = backend.get("files", "a1b2.png").unwrap();
        assert_eq!(stored.data.as_ref(), data.as_slice());
        assert_eq!(stored.etag.trim_matches('"'), digest);
        assert_eq!(stored.options.content_type, "image/png");
        assert_eq!(stored.options.content_length, 4096);
        assert_eq!(stored.options.content_disposition, "inline; filename=\"photo.png\"");
        assert_eq!(stored.options.acl, Acl::PublicRead);
    }

    #[tokio::test]
    async fn test_private_storage_skips_public_acl() {
        let backend = MemoryBackend::new();
        let uploads = pipeline(Arc::new(backend.clone()), true);

        uploads.put(&photo(), payload().into()).await.unwrap();

        assert_eq!(backend.get("files", "a1b2.png").unwrap().options.acl, Acl::Private);
    }

    #[tokio::test]
    async fn test_expected_digest_mismatch_is_only_a_warning() {
        let backend = MemoryBackend::new();
        let uploads = pipeline(Arc::new(backend.clone()), false);
        let object = photo().with_expected_digest("0".repeat(32));

        let digest = uploads.put(&object, payload().into()).await.unwrap();
        assert_eq!(digest, format!("{:x}", md5::compute(payload())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seekable_source_retried_after_transient_failures() {
        let backend = Arc::new(FlakyBackend::new(2));
        let uploads = pipeline(backend.clone(), false);
        let data = payload();
        let mut cursor = Cursor::new(data.clone());

        let digest = uploads
            .put(&photo(), UploadSource::Seekable(&mut cursor))
            .await
            .unwrap();

        assert_eq!(digest, format!("{:x}", md5::compute(&data)));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 3);
        // One full pass in the successful attempt
        assert_eq!(cursor.position(), 4096);
        assert_eq!(backend.inner.get("files", "a1b2.png").unwrap().data.as_ref(), data.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seekable_source_gives_up_after_max_tries() {
        let backend = Arc::new(FlakyBackend::new(5));
        let uploads = pipeline(backend.clone(), false);
        let mut cursor = Cursor::new(payload());

        let result = uploads.put(&photo(), UploadSource::Seekable(&mut cursor)).await;

        assert!(matches!(result, Err(StorageError::Connection(_))));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 3);
        assert!(!backend.inner.object_exists("files", "a1b2.png").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_source_is_not_retried() {
        let backend = Arc::new(FlakyBackend::new(1));
        let uploads = pipeline(backend.clone(), false);
        let data = payload();
        let mut stream: &[u8] = &data;

        let result = uploads
            .put(
                &photo().with_content_length(4096),
                UploadSource::Stream(&mut stream),
            )
            .await;

        assert!(matches!(result, Err(StorageError::Connection(_))));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_source_uploads_once() {
        let backend = MemoryBackend::new();
        let uploads = pipeline(Arc::new(backend.clone()), false);
        let data = payload();
        let mut stream: &[u8] = &data;

        let digest = uploads
            .put(
                &photo().with_content_length(4096),
                UploadSource::Stream(&mut stream),
            )
            .await
            .unwrap();

        assert_eq!(digest, format!("{:x}", md5::compute(&data)));
        assert!(stream.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bucket_setting_fails_without_retry() {
        let backend = Arc::new(FlakyBackend::new(0));
        let uploads = pipeline_with(
            backend.clone(),
            StorageSettings {
                bucket: None,
                ..settings(false)
            },
        );
        let start = tokio::time::Instant::now();

        let result = uploads.put(&photo(), payload().into()).await;

        assert!(matches!(
            result,
            Err(StorageError::Config(ConfigError::MissingField("bucket")))
        ));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_is_not_retried() {
        let backend = Arc::new(FlakyBackend::rejecting(5));
        let uploads = pipeline(backend.clone(), false);
        let start = tokio::time::Instant::now();

        let result = uploads.put(&photo(), payload().into()).await;

        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_in_memory_source_sends_its_own_length() {
        let backend = MemoryBackend::new();
        let uploads = pipeline(Arc::new(backend.clone()), false);

        uploads
            .put(&photo().with_content_length(10), payload().into())
            .await
            .unwrap();

        let stored = backend.get("files", "a1b2.png").unwrap();
        assert_eq!(stored.options.content_length, 4096);
        assert_eq!(stored.data.len(), 4096);
    }

    #[tokio::test]
    async fn test_stream_source_requires_length() {
        let uploads = pipeline(Arc::new(MemoryBackend::new()), false);
        let mut stream: &[u8] = b"abc";

        let result = uploads.put(&photo(), UploadSource::Stream(&mut stream)).await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_digest_mismatch_fails_with_both_digests() {
        let backend = Arc::new(FixedEtagBackend {
            inner: MemoryBackend::new(),
            etag: "\"deadbeefdeadbeefdeadbeefdeadbeef\"",
            fetches: AtomicU32::new(0),
        });
        let uploads = pipeline(backend.clone(), false);
        let data = vec![0u8; 4096];
        let local = format!("{:x}", md5::compute(&data));

        let result = uploads.put(&photo(), data.into()).await;

        match result {
            Err(StorageError::Transfer { key, local: l, remote }) => {
                assert_eq!(key, "a1b2.png");
                assert_eq!(l, local);
                assert_eq!(remote, "deadbeefdeadbeefdeadbeefdeadbeef");
            }
            other => panic!("expected transfer error, got {:?}", other),
        }
        // Every one of the three attempts re-fetched and re-compared
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 3);
    }
}
