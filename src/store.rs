//! The [`ObjectStore`] façade.
//!
//! Writes land in a per-key [`ObjectWriteBuffer`] and stay invisible until
//! the key is flushed.  A flush commits the buffer with one PUT or, for
//! buffers larger than a part, through the [`MultipartUploadCoordinator`].
//! Reads, size queries and bucket operations always go to the remote store.
//!
//! The buffer map lock guards in-memory state transitions only and is never
//! held across a remote call.  Each commit runs on its own task, so a caller
//! that stops waiting on a flush cannot leave the key stuck in `Committing`
//! or a multipart upload open.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::buffer::{CommitPath, ObjectWriteBuffer};
use crate::config::S3Config;
use crate::errors::FsError;
use crate::metrics::{
    BYTES_BUFFERED_TOTAL, BYTES_READ_TOTAL, OBJECTS_DELETED_TOTAL, OBJECTS_FLUSHED_TOTAL,
};
use crate::pool::TaskPool;
use crate::storage::client::RemoteStoreClient;
use crate::upload::multipart::MultipartUploadCoordinator;
use crate::uri::{self, ObjectKey, S3_SCHEME};

type Buffers = HashMap<ObjectKey, ObjectWriteBuffer>;
type BufferMap = Arc<Mutex<Buffers>>;

fn lock_buffers(buffers: &Mutex<Buffers>) -> MutexGuard<'_, Buffers> {
    buffers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffered file-like access to a remote object store.
pub struct ObjectStore {
    client: Arc<dyn RemoteStoreClient>,
    pool: TaskPool,
    config: S3Config,
    part_size: NonZeroU64,
    coordinator: MultipartUploadCoordinator,
    buffers: BufferMap,
}

impl ObjectStore {
    /// Create a store over `client`, running remote fan-out on `pool`.
    pub fn new(
        client: Arc<dyn RemoteStoreClient>,
        pool: TaskPool,
        config: S3Config,
    ) -> Result<Self, FsError> {
        config.check()?;
        let part_size = config.part_size()?;
        let coordinator = MultipartUploadCoordinator::new(
            Arc::clone(&client),
            pool.clone(),
            part_size,
            config.max_parallel_ops,
        );
        Ok(Self {
            client,
            pool,
            config,
            part_size,
            coordinator,
            buffers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    // -- Writes -------------------------------------------------------------

    /// Append `data` to the buffer for `uri`.  Nothing is visible remotely
    /// until [`flush_object`](Self::flush_object).
    pub async fn write(&self, uri: &str, data: &[u8]) -> Result<(), FsError> {
        let key = ObjectKey::parse(uri)?;
        let mut buffers = lock_buffers(&self.buffers);
        match buffers.get_mut(&key) {
            Some(buffer) => buffer.append(&key, data)?,
            None if data.is_empty() => return Ok(()),
            None => {
                let mut buffer =
                    ObjectWriteBuffer::new(self.part_size, self.config.use_multipart_upload);
                buffer.append(&key, data)?;
                buffers.insert(key.clone(), buffer);
            }
        }
        counter!(BYTES_BUFFERED_TOTAL).increment(data.len() as u64);
        debug!("Buffered {} bytes for {}", data.len(), key);
        Ok(())
    }

    /// Commit the buffered bytes for `uri`.  A key with nothing buffered is
    /// a no-op and creates no object.
    pub async fn flush_object(&self, uri: &str) -> Result<(), FsError> {
        let key = ObjectKey::parse(uri)?;
        self.flush_key(&key).await
    }

    /// Flush every key holding buffered bytes.  Every key is attempted; the
    /// first error is returned.
    pub async fn flush_all(&self) -> Result<(), FsError> {
        let keys: Vec<ObjectKey> = {
            let buffers = lock_buffers(&self.buffers);
            buffers
                .iter()
                .filter(|(_, buffer)| !buffer.is_committing() && buffer.accumulated_size() > 0)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.flush_key(&key).await {
                warn!("Flush of {} failed: {}", key, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the bytes buffered for `uri` without committing them.
    pub fn discard(&self, uri: &str) -> Result<(), FsError> {
        let key = ObjectKey::parse(uri)?;
        let mut buffers = lock_buffers(&self.buffers);
        if buffers.get(&key).is_some_and(ObjectWriteBuffer::is_committing) {
            return Err(FsError::FlushInProgress {
                key: key.to_string(),
            });
        }
        if let Some(buffer) = buffers.remove(&key) {
            debug!("Discarded {} buffered bytes for {}", buffer.accumulated_size(), key);
        }
        Ok(())
    }

    async fn flush_key(&self, key: &ObjectKey) -> Result<(), FsError> {
        let (data, path) = {
            let mut buffers = lock_buffers(&self.buffers);
            let Some(buffer) = buffers.get_mut(key) else {
                return Ok(());
            };
            let Some(data) = buffer.begin_commit(key)? else {
                return Ok(());
            };
            (data, buffer.commit_path())
        };

        let guard = CommitGuard {
            buffers: Arc::clone(&self.buffers),
            key: key.clone(),
            data: Some(data.clone()),
        };
        let client = Arc::clone(&self.client);
        let coordinator = self.coordinator.clone();
        let commit = tokio::spawn(async move {
            let size = data.len();
            match path {
                CommitPath::SinglePut => client
                    .put_object(&guard.key, data)
                    .await
                    .map_err(|e| FsError::remote("put_object", &guard.key, e))?,
                CommitPath::Multipart => commit_multipart(&coordinator, &guard, data).await?,
            }
            counter!(OBJECTS_FLUSHED_TOTAL, "path" => path.as_str()).increment(1);
            info!("Flushed {}: size={} path={}", guard.key, size, path.as_str());
            guard.finish();
            Ok::<(), FsError>(())
        });

        commit.await.map_err(|e| FsError::TaskFailed {
            message: format!("commit of {key} did not complete: {e}"),
        })?
    }

    // -- Reads --------------------------------------------------------------

    /// Fill `buf` with the committed bytes at `[offset, offset + buf.len())`.
    pub async fn read(&self, uri: &str, offset: u64, buf: &mut [u8]) -> Result<(), FsError> {
        let data = self.read_range(uri, offset, buf.len() as u64).await?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    /// Return `length` committed bytes starting at `offset`.
    pub async fn read_range(&self, uri: &str, offset: u64, length: u64) -> Result<Bytes, FsError> {
        let key = ObjectKey::parse(uri)?;
        let size = self.committed_size(&key).await?;

        let end = offset.checked_add(length).ok_or_else(|| FsError::RangeError {
            key: key.to_string(),
            offset,
            end: u64::MAX,
            size,
        })?;
        if end > size {
            return Err(FsError::RangeError {
                key: key.to_string(),
                offset,
                end,
                size,
            });
        }
        if length == 0 {
            return Ok(Bytes::new());
        }

        debug!("GET {} bytes={}-{}", key, offset, end - 1);
        let data = self
            .client
            .get_object_range(&key, offset, length)
            .await
            .map_err(|e| FsError::remote("get_object_range", &key, e))?;
        if data.len() as u64 != length {
            return Err(FsError::remote(
                "get_object_range",
                &key,
                anyhow::anyhow!("expected {length} bytes, got {}", data.len()),
            ));
        }
        counter!(BYTES_READ_TOTAL).increment(length);
        Ok(data)
    }

    /// Size of the committed object at `uri`.
    pub async fn object_size(&self, uri: &str) -> Result<u64, FsError> {
        let key = ObjectKey::parse(uri)?;
        self.committed_size(&key).await
    }

    /// Whether a committed object exists at `uri`.
    pub async fn is_object(&self, uri: &str) -> Result<bool, FsError> {
        let key = ObjectKey::parse(uri)?;
        Ok(self.head(&key).await?.is_some())
    }

    async fn head(&self, key: &ObjectKey) -> Result<Option<u64>, FsError> {
        debug!("HEAD {}", key);
        self.client
            .head_object(key)
            .await
            .map_err(|e| FsError::remote("head_object", key, e))
    }

    async fn committed_size(&self, key: &ObjectKey) -> Result<u64, FsError> {
        self.head(key).await?.ok_or_else(|| FsError::NotFound {
            key: key.to_string(),
        })
    }

    // -- Objects and prefixes -----------------------------------------------

    /// Delete the committed object at `uri`.
    pub async fn remove_object(&self, uri: &str) -> Result<(), FsError> {
        let key = ObjectKey::parse(uri)?;
        self.committed_size(&key).await?;
        self.client
            .delete_object(&key)
            .await
            .map_err(|e| FsError::remote("delete_object", &key, e))?;
        counter!(OBJECTS_DELETED_TOTAL).increment(1);
        info!("Removed {}", key);
        Ok(())
    }

    /// Create an empty object at `uri` unless one already exists.
    pub async fn touch(&self, uri: &str) -> Result<(), FsError> {
        let key = ObjectKey::parse(uri)?;
        if self.head(&key).await?.is_some() {
            return Ok(());
        }
        self.client
            .put_object(&key, Bytes::new())
            .await
            .map_err(|e| FsError::remote("put_object", &key, e))?;
        info!("Touched {}", key);
        Ok(())
    }

    /// Immediate children of the prefix `uri`, sorted.  Entries standing
    /// for deeper objects end with `/`.
    pub async fn ls(&self, uri: &str) -> Result<Vec<String>, FsError> {
        let (bucket, prefix) = uri::parse_prefix(uri)?;
        let paths = self.list(&bucket, &prefix).await?;

        let mut entries = BTreeSet::new();
        for path in &paths {
            let rest = &path[prefix.len()..];
            if rest.is_empty() {
                continue;
            }
            let entry = match rest.split_once('/') {
                Some((dir, _)) => format!("{S3_SCHEME}{bucket}/{prefix}{dir}/"),
                None => format!("{S3_SCHEME}{bucket}/{path}"),
            };
            entries.insert(entry);
        }
        Ok(entries.into_iter().collect())
    }

    /// Whether any object lives under the prefix `uri`.
    pub async fn is_dir(&self, uri: &str) -> Result<bool, FsError> {
        let (bucket, prefix) = uri::parse_prefix(uri)?;
        Ok(!self.list(&bucket, &prefix).await?.is_empty())
    }

    /// Delete every object under the prefix `uri`.
    pub async fn remove_dir(&self, uri: &str) -> Result<(), FsError> {
        let (bucket, prefix) = uri::parse_prefix(uri)?;
        let paths = self.list(&bucket, &prefix).await?;
        let removed = self.delete_all(&bucket, paths).await?;
        info!("Removed {} objects under {}{}/{}", removed, S3_SCHEME, bucket, prefix);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, FsError> {
        debug!("LIST {}{}/{}", S3_SCHEME, bucket, prefix);
        self.client
            .list_objects(bucket, prefix)
            .await
            .map_err(|e| FsError::remote("list_objects", format!("{S3_SCHEME}{bucket}/{prefix}"), e))
    }

    /// Delete `paths` through the pool with at most `max_parallel_ops` in
    /// flight.  Nothing more is submitted after the first failure.
    async fn delete_all(&self, bucket: &str, paths: Vec<String>) -> Result<usize, FsError> {
        let count = paths.len();
        let tasks = paths.into_iter().map(|path| {
            let client = Arc::clone(&self.client);
            let key = ObjectKey::new(bucket, path);
            async move {
                client
                    .delete_object(&key)
                    .await
                    .map_err(|e| FsError::remote("delete_object", &key, e))?;
                counter!(OBJECTS_DELETED_TOTAL).increment(1);
                Ok(())
            }
        });
        self.pool
            .run_windowed(tasks, self.config.max_parallel_ops)
            .await?;
        Ok(count)
    }

    // -- Buckets ------------------------------------------------------------

    /// Create the bucket named by `uri`.  Fails if it already exists.
    pub async fn create_bucket(&self, uri: &str) -> Result<(), FsError> {
        let bucket = uri::parse_bucket(uri)?;
        if self.bucket_exists(&bucket).await? {
            return Err(FsError::BucketStateError {
                bucket,
                reason: "already exists",
            });
        }
        self.client
            .create_bucket(&bucket)
            .await
            .map_err(|e| FsError::remote("create_bucket", &bucket, e))?;
        info!("Created bucket {}", bucket);
        Ok(())
    }

    /// Remove the bucket named by `uri`.  It must exist and be empty.
    pub async fn remove_bucket(&self, uri: &str) -> Result<(), FsError> {
        let bucket = uri::parse_bucket(uri)?;
        if !self.bucket_is_empty(&bucket).await? {
            return Err(FsError::BucketStateError {
                bucket,
                reason: "is not empty",
            });
        }
        self.client
            .delete_bucket(&bucket)
            .await
            .map_err(|e| FsError::remote("delete_bucket", &bucket, e))?;
        info!("Removed bucket {}", bucket);
        Ok(())
    }

    pub async fn is_bucket(&self, uri: &str) -> Result<bool, FsError> {
        let bucket = uri::parse_bucket(uri)?;
        self.bucket_exists(&bucket).await
    }

    /// Whether the bucket holds no objects.  Fails if it does not exist.
    pub async fn is_empty_bucket(&self, uri: &str) -> Result<bool, FsError> {
        let bucket = uri::parse_bucket(uri)?;
        self.bucket_is_empty(&bucket).await
    }

    /// Delete every object in the bucket named by `uri`.
    pub async fn empty_bucket(&self, uri: &str) -> Result<(), FsError> {
        let bucket = uri::parse_bucket(uri)?;
        if !self.bucket_exists(&bucket).await? {
            return Err(FsError::BucketStateError {
                bucket,
                reason: "does not exist",
            });
        }
        let paths = self.list(&bucket, "").await?;
        let removed = self.delete_all(&bucket, paths).await?;

        if !self.bucket_is_empty(&bucket).await? {
            return Err(FsError::BucketStateError {
                bucket,
                reason: "could not be emptied",
            });
        }
        info!("Emptied bucket {}: removed {} objects", bucket, removed);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, FsError> {
        self.client
            .bucket_exists(bucket)
            .await
            .map_err(|e| FsError::remote("bucket_exists", bucket, e))
    }

    async fn bucket_is_empty(&self, bucket: &str) -> Result<bool, FsError> {
        if !self.bucket_exists(bucket).await? {
            return Err(FsError::BucketStateError {
                bucket: bucket.to_string(),
                reason: "does not exist",
            });
        }
        Ok(self.list(bucket, "").await?.is_empty())
    }
}

/// Outcome of one in-flight commit.  Dropped without [`finish`](Self::finish),
/// it hands the bytes back to the key's buffer.
struct CommitGuard {
    buffers: BufferMap,
    key: ObjectKey,
    data: Option<Bytes>,
}

impl CommitGuard {
    fn record_upload(&self, upload_id: &str) {
        if let Some(buffer) = lock_buffers(&self.buffers).get_mut(&self.key) {
            buffer.record_upload(upload_id);
        }
    }

    /// The object is committed; a later write starts a new buffer.
    fn finish(mut self) {
        self.data = None;
        lock_buffers(&self.buffers).remove(&self.key);
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            if let Some(buffer) = lock_buffers(&self.buffers).get_mut(&self.key) {
                buffer.abandon_commit(data);
            }
        }
    }
}

async fn commit_multipart(
    coordinator: &MultipartUploadCoordinator,
    guard: &CommitGuard,
    data: Bytes,
) -> Result<(), FsError> {
    let mut upload = coordinator.initiate(&guard.key, data.len() as u64).await?;
    guard.record_upload(upload.upload_id());
    coordinator.commit(&mut upload, data).await
}

// -- Tests -------------------------------------------------------------------
