//! Verified uploads
//!
//! Streams an object's bytes to the store while computing their MD5, then
//! checks the digest against the entity tag the store reports. Replayable
//! sources are retried as a whole on failure.

mod digest;
mod object;
mod pipeline;

pub use digest::DigestWriter;
pub use object::{SeekableSource, StoredObject, UploadSource};
pub use pipeline::UploadPipeline;
