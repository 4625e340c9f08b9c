//! Upload inputs: object metadata and byte sources

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek};

/// A source that can be rewound and read again
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// Bytes to upload.
///
/// Only in-memory and seekable sources are retried, since a plain stream
/// cannot be replayed after a failed attempt.
pub enum UploadSource<'a> {
    /// In-memory blob, wrapped in a rewindable cursor
    Bytes(Bytes),
    Seekable(&'a mut dyn SeekableSource),
    /// One-shot stream; needs [`StoredObject::content_length`]
    Stream(&'a mut (dyn AsyncRead + Send + Unpin)),
}

impl UploadSource<'_> {
    pub fn is_replayable(&self) -> bool {
        !matches!(self, UploadSource::Stream(_))
    }
}

impl From<Bytes> for UploadSource<'_> {
    fn from(bytes: Bytes) -> Self {
        UploadSource::Bytes(bytes)
    }
}

impl From<Vec<u8>> for UploadSource<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(bytes))
    }
}

impl std::fmt::Debug for UploadSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            UploadSource::Seekable(_) => f.write_str("Seekable"),
            UploadSource::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Metadata for an object being uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Storage key (the disk filename)
    pub key: String,
    /// User-facing filename
    pub display_name: String,
    pub content_type: String,
    /// Measured from the source when unset and the source is seekable
    pub content_length: Option<u64>,
    /// Caller's precomputed hex MD5, if any
    pub expected_digest: Option<String>,
}

impl StoredObject {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            content_type: content_type.into(),
            content_length: None,
            expected_digest: None,
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    /// `Content-Disposition` header carrying the URL-encoded display name
    pub fn content_disposition(&self) -> String {
        format!(
            "inline; filename=\"{}\"",
            urlencoding::encode(&self.display_name)
        )
    }
}
