//! Hashing tee around an object writer

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::ObjectWriter;
use crate::error::Result;

/// Updates an MD5 context with every chunk before forwarding it to the
/// wrapped writer.
pub struct DigestWriter<W: ?Sized = dyn ObjectWriter> {
    context: md5::Context,
    bytes_written: u64,
    inner: Box<W>,
}

impl<W: ObjectWriter + ?Sized> DigestWriter<W> {
    pub fn new(inner: Box<W>) -> Self {
        Self {
            context: md5::Context::new(),
            bytes_written: 0,
            inner,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Lowercase hex MD5 of everything written so far
    pub fn hex_digest(&self) -> String {
        hex::encode(self.context.clone().compute().0)
    }
}

#[async_trait]
impl<W: ObjectWriter + ?Sized> ObjectWriter for DigestWriter<W> {
    fn buffer_size(&self) -> usize {
        self.inner.buffer_size()
    }

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.context.consume(&chunk);
        self.bytes_written += chunk.len() as u64;
        self.inner.write(chunk).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.inner.finish().await
    }
}
