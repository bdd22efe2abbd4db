//! In-memory remote store.
//!
//! Buckets, objects and in-progress multipart uploads are held in
//! `tokio::sync::RwLock<HashMap<...>>` maps and follow S3 semantics closely
//! enough to exercise the buffered path end to end: objects appear only on
//! PUT or multipart completion, parts are invisible until completed, and a
//! bucket can only be deleted once empty.

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};

use super::client::{ClientFuture, RemoteStoreClient};
use crate::uri::ObjectKey;

/// One bucket: object path -> (data, etag).
type BucketContents = BTreeMap<String, (Bytes, String)>;

/// A multipart upload that has been started but not completed or aborted.
#[derive(Debug)]
struct PendingUpload {
    key: ObjectKey,
    /// part_number -> (data, etag).
    parts: BTreeMap<u32, (Bytes, String)>,
}

/// In-memory [`RemoteStoreClient`].
#[derive(Debug, Default)]
pub struct MemoryStoreClient {
    buckets: tokio::sync::RwLock<HashMap<String, BucketContents>>,
    uploads: tokio::sync::RwLock<HashMap<String, PendingUpload>>,
}

impl MemoryStoreClient {
    /// Create an empty store with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of multipart uploads that are neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }

    // ── ETag helpers ────────────────────────────────────────────────

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Composite ETag: md5 of the concatenated binary part digests, `-N`.
    fn composite_etag(part_etags: &[&str]) -> String {
        let mut combined = Vec::with_capacity(part_etags.len() * 16);
        for etag in part_etags {
            if let Ok(bytes) = hex::decode(etag.trim_matches('"')) {
                combined.extend_from_slice(&bytes);
            }
        }
        let mut hasher = Md5::new();
        hasher.update(&combined);
        format!("\"{}-{}\"", hex::encode(hasher.finalize()), part_etags.len())
    }
}

impl RemoteStoreClient for MemoryStoreClient {
    fn put_object(&self, key: &ObjectKey, data: Bytes) -> ClientFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let etag = Self::compute_etag(&data);
            let mut buckets = self.buckets.write().await;
            let contents = buckets
                .get_mut(key.bucket())
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {}", key.bucket()))?;
            contents.insert(key.path().to_string(), (data, etag));
            Ok(())
        })
    }

    fn get_object_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: u64,
    ) -> ClientFuture<'_, Bytes> {
        let key = key.clone();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let (data, _etag) = buckets
                .get(key.bucket())
                .and_then(|contents| contents.get(key.path()))
                .ok_or_else(|| anyhow::anyhow!("NoSuchKey: {key}"))?;

            let start = usize::try_from(offset)?;
            let end = usize::try_from(offset.saturating_add(length))?;
            if start > data.len() || end > data.len() {
                anyhow::bail!(
                    "InvalidRange: bytes={start}-{end} for {key} of {} bytes",
                    data.len()
                );
            }
            Ok(data.slice(start..end))
        })
    }

    fn head_object(&self, key: &ObjectKey) -> ClientFuture<'_, Option<u64>> {
        let key = key.clone();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            Ok(buckets
                .get(key.bucket())
                .and_then(|contents| contents.get(key.path()))
                .map(|(data, _)| data.len() as u64))
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, Vec<String>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let contents = buckets
                .get(&bucket)
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {bucket}"))?;
            Ok(contents
                .range(prefix.clone()..)
                .take_while(|(path, _)| path.starts_with(&prefix))
                .map(|(path, _)| path.clone())
                .collect())
        })
    }

    fn delete_object(&self, key: &ObjectKey) -> ClientFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let contents = buckets
                .get_mut(key.bucket())
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {}", key.bucket()))?;
            contents.remove(key.path());
            Ok(())
        })
    }

    fn create_multipart_upload(&self, key: &ObjectKey) -> ClientFuture<'_, String> {
        let key = key.clone();
        Box::pin(async move {
            if !self.buckets.read().await.contains_key(key.bucket()) {
                anyhow::bail!("NoSuchBucket: {}", key.bucket());
            }
            let upload_id = uuid::Uuid::new_v4().to_string();
            self.uploads.write().await.insert(
                upload_id.clone(),
                PendingUpload {
                    key,
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> ClientFuture<'_, String> {
        let key = key.clone();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            if !(1..=10_000).contains(&part_number) {
                anyhow::bail!("InvalidArgument: part number {part_number} out of range");
            }
            let mut uploads = self.uploads.write().await;
            let upload = uploads
                .get_mut(&upload_id)
                .filter(|upload| upload.key == key)
                .ok_or_else(|| anyhow::anyhow!("NoSuchUpload: {upload_id}"))?;

            let etag = Self::compute_etag(&data);
            upload.parts.insert(part_number, (data, etag.clone()));
            Ok(etag)
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> ClientFuture<'_, ()> {
        let key = key.clone();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            if parts.is_empty() {
                anyhow::bail!("MalformedXML: no parts listed for {upload_id}");
            }
            if parts.windows(2).any(|w| w[0].0 >= w[1].0) {
                anyhow::bail!("InvalidPartOrder: parts for {upload_id} are not ascending");
            }

            let mut uploads = self.uploads.write().await;
            let upload = uploads
                .get(&upload_id)
                .filter(|upload| upload.key == key)
                .ok_or_else(|| anyhow::anyhow!("NoSuchUpload: {upload_id}"))?;

            let mut assembled = BytesMut::new();
            let mut etags = Vec::with_capacity(parts.len());
            for (part_number, etag) in &parts {
                match upload.parts.get(part_number) {
                    Some((data, stored)) if stored == etag => {
                        assembled.extend_from_slice(data);
                        etags.push(stored.as_str());
                    }
                    _ => anyhow::bail!("InvalidPart: part {part_number} of {upload_id}"),
                }
            }
            let etag = Self::composite_etag(&etags);
            let data = assembled.freeze();

            let mut buckets = self.buckets.write().await;
            let contents = buckets
                .get_mut(key.bucket())
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {}", key.bucket()))?;
            contents.insert(key.path().to_string(), (data, etag));
            uploads.remove(&upload_id);
            Ok(())
        })
    }

    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> ClientFuture<'_, ()> {
        let key = key.clone();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut uploads = self.uploads.write().await;
            match uploads.get(&upload_id) {
                Some(upload) if upload.key == key => {
                    uploads.remove(&upload_id);
                    Ok(())
                }
                _ => anyhow::bail!("NoSuchUpload: {upload_id}"),
            }
        })
    }

    fn create_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if buckets.contains_key(&bucket) {
                anyhow::bail!("BucketAlreadyOwnedByYou: {bucket}");
            }
            buckets.insert(bucket, BTreeMap::new());
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            match buckets.get(&bucket) {
                None => anyhow::bail!("NoSuchBucket: {bucket}"),
                Some(contents) if !contents.is_empty() => {
                    anyhow::bail!("BucketNotEmpty: {bucket}")
                }
                Some(_) => {
                    buckets.remove(&bucket);
                    Ok(())
                }
            }
        })
    }

    fn bucket_exists(&self, bucket: &str) -> ClientFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move { Ok(self.buckets.read().await.contains_key(&bucket)) })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
