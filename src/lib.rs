//! BleepFS library: buffered file-like access to S3-compatible buckets.
//!
//! Writes accumulate in per-object buffers and become visible only when
//! flushed, either as one PUT or as a multipart upload whose parts are
//! uploaded in parallel through a shared [`pool::TaskPool`].  Reads are
//! ranged GETs against committed objects.  Remote calls go through the
//! [`storage::client::RemoteStoreClient`] trait.

pub mod buffer;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod pool;
pub mod storage;
pub mod store;
pub mod upload;
pub mod uri;

pub use errors::FsError;
pub use pool::TaskPool;
pub use store::ObjectStore;
