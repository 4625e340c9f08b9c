//! S3-compatible storage backend
//!
//! Wraps the AWS SDK for S3-compatible storage access. Writes are streamed:
//! chunks go through a bounded channel into a single `PutObject` request that
//! runs on its own task.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation},
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration, ObjectCannedAcl},
    Client,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::{encode_key, with_scheme, Acl, ObjectBackend, ObjectWriter, WriteOptions};
use crate::config::{ConnectionConfig, DEFAULT_REGION};
use crate::error::{Result, StorageError};

/// Endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

/// Chunk size requested from uploaders: 64KB
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Chunks allowed in flight between the uploader and the request task
const WRITE_QUEUE_DEPTH: usize = 4;

/// Connection settings resolved from [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub secure: bool,
}

impl S3Settings {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let (access_key_id, secret_access_key) = config.credentials()?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            endpoint: config.endpoint()?,
            region: config.region()?,
            secure: config.is_secure()?,
        })
    }

    /// Endpoint URL, with the scheme chosen by `secure` when none is given
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if endpoint.contains("://") => endpoint.trim_end_matches('/').to_string(),
            Some(endpoint) => with_scheme(endpoint.trim_end_matches('/'), self.secure),
            None => with_scheme(DEFAULT_ENDPOINT, self.secure),
        }
    }
}

/// S3-compatible [`ObjectBackend`]
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    endpoint_url: String,
    region: String,
}

impl S3Backend {
    /// Create a new S3 client from settings. Performs no network I/O.
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "s3-attachments",
        );

        let endpoint_url = settings.endpoint_url();
        let region = if settings.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            settings.region.clone()
        };

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint_url)
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            // Plain single-request bodies: no aws-chunked framing or checksum trailers
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        tracing::info!(endpoint = %endpoint_url, region = %region, "S3 client initialized");

        Self {
            client: Client::from_conf(s3_config),
            endpoint_url,
            region,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn sdk_error<E>(context: &str, err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Connection(format!("{}: {}", context, DisplayErrorContext(&err)))
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service_err| service_err.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(sdk_error(&format!("Failed to head bucket {}", bucket), e))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let already_ours = e
                    .as_service_error()
                    .map(|service_err| service_err.is_bucket_already_owned_by_you())
                    .unwrap_or(false);
                if already_ours {
                    Ok(())
                } else {
                    Err(StorageError::Bucket {
                        bucket: bucket.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }

    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        options: WriteOptions,
    ) -> Result<Box<dyn ObjectWriter>> {
        let content_length = i64::try_from(options.content_length).map_err(|_| {
            StorageError::InvalidInput(format!("content length too large: {}", options.content_length))
        })?;

        let (sender, receiver) = mpsc::channel::<Bytes>(WRITE_QUEUE_DEPTH);
        let frames = ReceiverStream::new(receiver).map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
        let body = ByteStream::from_body_1_x(StreamBody::new(frames));

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_disposition(options.content_disposition)
            .content_type(options.content_type)
            .content_length(content_length)
            .body(body);

        if options.acl == Acl::PublicRead {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        let context = format!("Failed to put object {}", key);
        let upload = tokio::spawn(async move {
            request
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(&context, e))
        });

        Ok(Box::new(S3Writer {
            sender: Some(sender),
            upload: Some(upload),
        }))
    }

    async fn entity_tag(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|service_err| service_err.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    sdk_error(&format!("Failed to head object {}", key), e)
                }
            })?;

        response
            .e_tag()
            .map(|s| s.to_string())
            .ok_or_else(|| StorageError::Connection(format!("No entity tag returned for {}", key)))
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.entity_tag(bucket, key).await {
            Ok(_) => Ok(true),
            Err(StorageError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to delete object {}", key), e))?;
        Ok(())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
        secure: bool,
    ) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|e| StorageError::InvalidInput(format!("Invalid URL expiry: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| sdk_error(&format!("Failed to presign {}", key), e))?;

        // The scheme is not part of the signature
        Ok(with_scheme(request.uri(), secure))
    }

    fn public_url(&self, bucket: &str, key: &str, secure: bool) -> String {
        with_scheme(
            &format!("{}/{}/{}", self.endpoint_url, bucket, encode_key(key)),
            secure,
        )
    }
}

/// Feeds a running `PutObject` request
struct S3Writer {
    sender: Option<mpsc::Sender<Bytes>>,
    upload: Option<JoinHandle<Result<()>>>,
}

impl S3Writer {
    /// Close the body and wait for the request's outcome
    async fn complete(&mut self) -> Result<()> {
        self.sender.take();
        match self.upload.take() {
            Some(upload) => upload
                .await
                .map_err(|e| StorageError::Connection(format!("Upload task failed: {}", e)))?,
            None => Err(StorageError::Connection("Upload already completed".to_string())),
        }
    }
}

#[async_trait]
impl ObjectWriter for S3Writer {
    fn buffer_size(&self) -> usize {
        WRITE_BUFFER_SIZE
    }

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let sent = match &self.sender {
            Some(sender) => sender.send(chunk).await.is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }

        // The request ended before the body did; report why
        self.complete().await?;
        Err(StorageError::Connection("Upload closed before body was sent".to_string()))
    }

    async fn finish(&mut self) -> Result<()> {
        self.complete().await
    }
}

impl Drop for S3Writer {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}
