//! Multipart upload coordination.
//!
//! One [`MultipartUpload`] moves through
//! `Initiated -> UploadingParts -> Completed | Aborted`.  Parts are cut by
//! [`PartSplitter`] and uploaded through the shared [`TaskPool`] with at
//! most `max_parallel_ops` in flight.  ETags land in a scratch slot
//! per part number, so the completion list is ordered by part number no
//! matter which upload finishes first.

use std::num::NonZeroU64;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, info, warn};

use super::splitter::{PartRange, PartSplitter};
use crate::errors::FsError;
use crate::metrics::{MULTIPART_ABORTS_TOTAL, PARTS_UPLOADED_TOTAL};
use crate::pool::TaskPool;
use crate::storage::client::RemoteStoreClient;
use crate::uri::ObjectKey;

/// S3 accepts at most this many parts per upload.
pub const MAX_PARTS: u64 = 10_000;

/// Lifecycle of a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    UploadingParts,
    Completed,
    Aborted,
}

/// A multipart upload in progress.
#[derive(Debug)]
pub struct MultipartUpload {
    key: ObjectKey,
    upload_id: String,
    parts: Vec<(u32, String)>,
    state: UploadState,
}

impl MultipartUpload {
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Completed parts, ordered by part number.
    pub fn parts(&self) -> &[(u32, String)] {
        &self.parts
    }

    pub fn state(&self) -> UploadState {
        self.state
    }
}

/// Drives multipart uploads against a remote store.
#[derive(Clone)]
pub struct MultipartUploadCoordinator {
    client: Arc<dyn RemoteStoreClient>,
    pool: TaskPool,
    part_size: NonZeroU64,
    max_parallel_ops: usize,
}

impl MultipartUploadCoordinator {
    pub fn new(
        client: Arc<dyn RemoteStoreClient>,
        pool: TaskPool,
        part_size: NonZeroU64,
        max_parallel_ops: usize,
    ) -> Self {
        Self {
            client,
            pool,
            part_size,
            max_parallel_ops: max_parallel_ops.max(1),
        }
    }

    /// Start an upload for `total` bytes at `key`.
    ///
    /// Fails before touching the store if the buffer would need more than
    /// [`MAX_PARTS`] parts.
    pub async fn initiate(&self, key: &ObjectKey, total: u64) -> Result<MultipartUpload, FsError> {
        let part_count = PartSplitter::part_count(total, self.part_size);
        if part_count > MAX_PARTS {
            return Err(FsError::InvalidArgument {
                message: format!(
                    "{key} needs {part_count} parts of {} bytes; at most {MAX_PARTS} are allowed",
                    self.part_size
                ),
            });
        }

        let upload_id = self
            .client
            .create_multipart_upload(key)
            .await
            .map_err(|e| FsError::remote("create_multipart_upload", key, e))?;

        info!(
            "Multipart upload initiated: key={} upload_id={} parts={}",
            key, upload_id, part_count
        );

        Ok(MultipartUpload {
            key: key.clone(),
            upload_id,
            parts: Vec::new(),
            state: UploadState::Initiated,
        })
    }

    /// Upload every part of `data` and complete the upload.
    ///
    /// On any failure the upload is aborted and the first error is
    /// returned; `complete_multipart_upload` is never called with a
    /// partial part set.
    pub async fn commit(&self, upload: &mut MultipartUpload, data: Bytes) -> Result<(), FsError> {
        let result = match self.upload_parts(upload, &data).await {
            Ok(()) => self.complete(upload).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.abort(upload).await;
            return Err(e);
        }
        Ok(())
    }

    async fn upload_parts(
        &self,
        upload: &mut MultipartUpload,
        data: &Bytes,
    ) -> Result<(), FsError> {
        upload.state = UploadState::UploadingParts;

        let ranges: Vec<PartRange> = PartSplitter::new(data.len() as u64, self.part_size).collect();
        let tasks = ranges.iter().copied().map(|part: PartRange| {
            let client = Arc::clone(&self.client);
            let key = upload.key.clone();
            let upload_id = upload.upload_id.clone();
            let number = part.number;
            let body = data.slice(part.range());
            async move {
                let etag = client
                    .upload_part(&key, &upload_id, number, body)
                    .await
                    .map_err(|e| FsError::remote("upload_part", &key, e))?;
                debug!(
                    "Part uploaded: key={} upload_id={} part={}",
                    key, upload_id, number
                );
                counter!(PARTS_UPLOADED_TOTAL).increment(1);
                Ok((number, etag))
            }
        });
        let uploaded = self.pool.run_windowed(tasks, self.max_parallel_ops).await?;

        // Scratch slot per part number (index = number - 1).
        let mut etags: Vec<Option<String>> = vec![None; ranges.len()];
        for (number, etag) in uploaded {
            etags[(number - 1) as usize] = Some(etag);
        }
        upload.parts = ranges
            .iter()
            .zip(etags)
            .filter_map(|(part, etag)| etag.map(|etag| (part.number, etag)))
            .collect();
        Ok(())
    }

    async fn complete(&self, upload: &mut MultipartUpload) -> Result<(), FsError> {
        self.client
            .complete_multipart_upload(&upload.key, &upload.upload_id, &upload.parts)
            .await
            .map_err(|e| FsError::remote("complete_multipart_upload", &upload.key, e))?;

        upload.state = UploadState::Completed;
        info!(
            "Multipart upload completed: key={} upload_id={} parts={}",
            upload.key,
            upload.upload_id,
            upload.parts.len()
        );
        Ok(())
    }

    /// Abort the upload once.  Abort failures are logged, not returned, so
    /// the caller always sees the error that caused the abort.
    async fn abort(&self, upload: &mut MultipartUpload) {
        if matches!(upload.state, UploadState::Completed | UploadState::Aborted) {
            return;
        }
        upload.state = UploadState::Aborted;
        counter!(MULTIPART_ABORTS_TOTAL).increment(1);
        warn!(
            "Aborting multipart upload: key={} upload_id={}",
            upload.key, upload.upload_id
        );
        if let Err(e) = self
            .client
            .abort_multipart_upload(&upload.key, &upload.upload_id)
            .await
        {
            warn!(
                "Failed to abort multipart upload {}: {}",
                upload.upload_id, e
            );
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FaultyClient;

    const PART: u64 = 8;

    fn coordinator(client: Arc<FaultyClient>, max_parallel_ops: usize) -> MultipartUploadCoordinator {
        MultipartUploadCoordinator::new(
            client,
            TaskPool::new(8),
            NonZeroU64::new(PART).unwrap(),
            max_parallel_ops,
        )
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect::<Vec<u8>>().into()
    }

    #[tokio::test]
    async fn test_commit_orders_parts_despite_out_of_order_completion() {
        let client = Arc::new(FaultyClient::new().await);
        // Earlier parts finish last.
        client.delay_parts_in_reverse(5);
        let coordinator = coordinator(Arc::clone(&client), 5);
        let key = FaultyClient::key("big");
        let data = payload(4 * PART as usize + 3);

        let mut upload = coordinator.initiate(&key, data.len() as u64).await.unwrap();
        assert_eq!(upload.state(), UploadState::Initiated);
        coordinator.commit(&mut upload, data.clone()).await.unwrap();

        assert_eq!(upload.state(), UploadState::Completed);
        let numbers: Vec<u32> = upload.parts().iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(client.completed_part_numbers(), vec![vec![1, 2, 3, 4, 5]]);
        assert_eq!(client.part_sizes(), vec![PART, PART, PART, PART, 3]);

        let stored = client
            .inner()
            .get_object_range(&key, 0, data.len() as u64)
            .await
            .unwrap();
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_once_and_never_completes() {
        let client = Arc::new(FaultyClient::new().await);
        // Part 2 fails after 5ms while part 1 is still running.
        client.delay_parts_in_reverse(2);
        client.fail_part(2);
        let coordinator = coordinator(Arc::clone(&client), 2);
        let key = FaultyClient::key("broken");
        let data = payload(6 * PART as usize);

        let mut upload = coordinator.initiate(&key, data.len() as u64).await.unwrap();
        let err = coordinator.commit(&mut upload, data).await.unwrap_err();

        assert!(matches!(
            err,
            FsError::RemoteOperationFailed { operation: "upload_part", .. }
        ));
        assert_eq!(upload.state(), UploadState::Aborted);
        assert_eq!(client.abort_count(), 1);
        assert!(client.completed_part_numbers().is_empty());
        assert_eq!(client.inner().head_object(&key).await.unwrap(), None);
        assert_eq!(client.inner().pending_uploads().await, 0);
        // Nothing is submitted after the failure.
        let mut sent = client.uploaded_part_numbers();
        sent.sort_unstable();
        assert_eq!(sent, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_completion_failure_is_surfaced_and_aborted() {
        let client = Arc::new(FaultyClient::new().await);
        client.fail_complete();
        let coordinator = coordinator(Arc::clone(&client), 4);
        let key = FaultyClient::key("incomplete");
        let data = payload(3 * PART as usize);

        let mut upload = coordinator.initiate(&key, data.len() as u64).await.unwrap();
        let err = coordinator.commit(&mut upload, data).await.unwrap_err();

        assert!(matches!(
            err,
            FsError::RemoteOperationFailed { operation: "complete_multipart_upload", .. }
        ));
        assert_eq!(client.abort_count(), 1);
        assert_eq!(client.inner().head_object(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_initiation_failure_has_no_side_effects() {
        let client = Arc::new(FaultyClient::new().await);
        client.fail_initiate();
        let coordinator = coordinator(Arc::clone(&client), 4);

        let err = coordinator
            .initiate(&FaultyClient::key("never"), 3 * PART)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RemoteOperationFailed");
        assert!(client.uploaded_part_numbers().is_empty());
        assert_eq!(client.abort_count(), 0);
    }

    #[tokio::test]
    async fn test_parallelism_never_exceeds_max_parallel_ops() {
        let client = Arc::new(FaultyClient::new().await);
        client.delay_parts_in_reverse(12);
        let coordinator = coordinator(Arc::clone(&client), 3);
        let key = FaultyClient::key("wide");
        let data = payload(12 * PART as usize);

        let mut upload = coordinator.initiate(&key, data.len() as u64).await.unwrap();
        coordinator.commit(&mut upload, data).await.unwrap();

        assert!(client.peak_concurrent_parts() <= 3);
        assert_eq!(client.completed_part_numbers()[0].len(), 12);
    }

    #[tokio::test]
    async fn test_too_many_parts_rejected_before_initiation() {
        let client = Arc::new(FaultyClient::new().await);
        let coordinator = coordinator(Arc::clone(&client), 1);

        let err = coordinator
            .initiate(&FaultyClient::key("huge"), PART * (MAX_PARTS + 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert_eq!(client.inner().pending_uploads().await, 0);
    }
}
