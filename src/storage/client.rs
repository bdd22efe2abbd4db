//! Remote object-store capability trait.
//!
//! Every remote store must implement [`RemoteStoreClient`].  The trait is
//! the only way the buffered path touches the network: signing, retries,
//! timeouts and connection pooling live behind it.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::uri::ObjectKey;

/// Boxed future returned by every client call.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async object-store contract.
pub trait RemoteStoreClient: Send + Sync + 'static {
    /// Store `data` as the whole object at `key`, replacing any previous object.
    fn put_object(&self, key: &ObjectKey, data: Bytes) -> ClientFuture<'_, ()>;

    /// Read `length` bytes starting at `offset`.
    fn get_object_range(&self, key: &ObjectKey, offset: u64, length: u64)
        -> ClientFuture<'_, Bytes>;

    /// Return the committed size, or `None` if no object exists at `key`.
    fn head_object(&self, key: &ObjectKey) -> ClientFuture<'_, Option<u64>>;

    /// List every object path in `bucket` that starts with `prefix`.
    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, Vec<String>>;

    /// Delete the object at `key`.  Deleting a missing object is not an error.
    fn delete_object(&self, key: &ObjectKey) -> ClientFuture<'_, ()>;

    /// Start a multipart upload for `key`, returning its upload id.
    fn create_multipart_upload(&self, key: &ObjectKey) -> ClientFuture<'_, String>;

    /// Upload one part, returning its ETag.
    fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> ClientFuture<'_, String>;

    /// Assemble the listed parts, in the given order, into the final object.
    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> ClientFuture<'_, ()>;

    /// Discard a multipart upload and every part uploaded under it.
    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> ClientFuture<'_, ()>;

    /// Create a bucket.
    fn create_bucket(&self, bucket: &str) -> ClientFuture<'_, ()>;

    /// Delete an empty bucket.
    fn delete_bucket(&self, bucket: &str) -> ClientFuture<'_, ()>;

    /// Check whether `bucket` exists.
    fn bucket_exists(&self, bucket: &str) -> ClientFuture<'_, bool>;
}
