//! Fault-injecting client wrapper used by unit tests.
//!
//! [`FaultyClient`] forwards every call to a [`MemoryStoreClient`] holding
//! one bucket, `test-bucket`, and can fail or delay chosen calls while
//! recording what the buffered path asked of the store.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use super::client::{ClientFuture, RemoteStoreClient};
use super::memory::MemoryStoreClient;
use crate::uri::ObjectKey;

pub const TEST_BUCKET: &str = "test-bucket";

#[derive(Debug, Default)]
pub struct FaultyClient {
    inner: MemoryStoreClient,
    fail_part: AtomicU32,
    fail_initiate: AtomicBool,
    fail_complete: AtomicBool,
    fail_delete: AtomicBool,
    reverse_delay_total: AtomicU32,
    in_flight_parts: AtomicUsize,
    peak_parts: AtomicUsize,
    puts: AtomicUsize,
    aborts: AtomicUsize,
    uploaded: Mutex<Vec<(u32, u64)>>,
    completed: Mutex<Vec<Vec<u32>>>,
}

impl FaultyClient {
    pub async fn new() -> Self {
        let client = Self::default();
        client.inner.create_bucket(TEST_BUCKET).await.unwrap();
        client
    }

    pub fn key(path: &str) -> ObjectKey {
        ObjectKey::new(TEST_BUCKET, path)
    }

    pub fn inner(&self) -> &MemoryStoreClient {
        &self.inner
    }

    pub fn fail_part(&self, part_number: u32) {
        self.fail_part.store(part_number, Ordering::SeqCst);
    }

    pub fn fail_initiate(&self) {
        self.fail_initiate.store(true, Ordering::SeqCst);
    }

    pub fn fail_complete(&self) {
        self.fail_complete.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    /// Delay part `n` by `(total - n + 1) * 5ms` so low part numbers finish last.
    pub fn delay_parts_in_reverse(&self, total: u32) {
        self.reverse_delay_total.store(total, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn peak_concurrent_parts(&self) -> usize {
        self.peak_parts.load(Ordering::SeqCst)
    }

    /// Part numbers passed to `upload_part`, in call order.
    pub fn uploaded_part_numbers(&self) -> Vec<u32> {
        self.uploaded.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    /// Sizes of uploaded parts, ordered by part number.
    pub fn part_sizes(&self) -> Vec<u64> {
        let mut parts = self.uploaded.lock().unwrap().clone();
        parts.sort_by_key(|(n, _)| *n);
        parts.into_iter().map(|(_, len)| len).collect()
    }

    /// Part-number lists passed to each `complete_multipart_upload` call.
    pub fn completed_part_numbers(&self) -> Vec<Vec<u32>> {
        self.completed.lock().unwrap().clone()
    }
}

impl RemoteStoreClient for FaultyClient {
    fn put_object(&self, key: &ObjectKey, data: Bytes) -> ClientFuture<'_, ()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_object(key, data)
    }

    fn get_object_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: u64,
    ) -> ClientFuture<'_, Bytes> {
        self.inner.get_object_range(key, offset, length)
    }

    fn head_object(&self, key: &ObjectKey) -> ClientFuture<'_, Option<u64>> {
        self.inner.head_object(key)
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, Vec<String>> {
        self.inner.list_objects(bucket, prefix)
    }

    fn delete_object(&self, key: &ObjectKey) -> ClientFuture<'_, ()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            let key = key.clone();
            return Box::pin(async move { Err(anyhow::anyhow!("injected delete failure for {key}")) });
        }
        self.inner.delete_object(key)
    }

    fn create_multipart_upload(&self, key: &ObjectKey) -> ClientFuture<'_, String> {
        if self.fail_initiate.load(Ordering::SeqCst) {
            return Box::pin(async { Err(anyhow::anyhow!("injected initiate failure")) });
        }
        self.inner.create_multipart_upload(key)
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
            self.uploaded
                .lock()
                .unwrap()
                .push((part_number, data.len() as u64));

            let now = self.in_flight_parts.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_parts.fetch_max(now, Ordering::SeqCst);

            let total = self.reverse_delay_total.load(Ordering::SeqCst);
            if total >= part_number {
                let steps = u64::from(total - part_number + 1);
                tokio::time::sleep(Duration::from_millis(steps * 5)).await;
            } else {
                tokio::task::yield_now().await;
            }

            let result = if self.fail_part.load(Ordering::SeqCst) == part_number {
                Err(anyhow::anyhow!("injected failure for part {part_number}"))
            } else {
                self.inner
                    .upload_part(&key, &upload_id, part_number, data)
                    .await
            };

            self.in_flight_parts.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> ClientFuture<'_, ()> {
        self.completed
            .lock()
            .unwrap()
            .push(parts.iter().map(|(n, _)| *n).collect());
        if self.fail_complete.load(Ordering::SeqCst) {
            return Box::pin(async { Err(anyhow::anyhow!("injected complete failure")) });
        }
        self.inner.complete_multipart_upload(key, upload_id, parts)
    }

    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> ClientFuture<'_, ()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_multipart_upload(key, upload_id)
    }

    fn create_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        self.inner.create_bucket(bucket)
    }

    fn delete_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        self.inner.delete_bucket(bucket)
    }

    fn bucket_exists(&self, bucket: &str) -> ClientFuture<'_, bool> {
        self.inner.bucket_exists(bucket)
    }
}
