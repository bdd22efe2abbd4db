//! Error types for the buffered object path.
//!
//! Every variant carries enough context (key, bucket, operation) for a
//! caller to decide whether to retry.  Remote failures are never retried
//! here; that policy belongs to the [`RemoteStoreClient`].
//!
//! [`RemoteStoreClient`]: crate::storage::client::RemoteStoreClient

use metrics::counter;
use thiserror::Error;

use crate::metrics::REMOTE_FAILURES_TOTAL;

/// Boxed cause of a failed remote call.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`ObjectStore`](crate::store::ObjectStore) operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// A non-multipart write would grow the buffer past the single-PUT ceiling.
    #[error("Writing {length} bytes to {key} would exceed the single-upload ceiling of {ceiling} bytes ({buffered} already buffered); enable multipart upload or flush first")]
    CapacityExceeded {
        key: String,
        buffered: u64,
        length: u64,
        ceiling: u64,
    },

    /// The object has never been committed.
    #[error("The specified object does not exist: {key}")]
    NotFound { key: String },

    /// The requested range lies outside the committed object.
    #[error("Range [{offset}, {end}) is outside {key} (size {size})")]
    RangeError {
        key: String,
        offset: u64,
        end: u64,
        size: u64,
    },

    /// An underlying store call failed.
    #[error("{operation} failed for {key}: {source}")]
    RemoteOperationFailed {
        operation: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    /// Bucket lifecycle precondition violated (exists / missing / not empty).
    #[error("Bucket {bucket} {reason}")]
    BucketStateError { bucket: String, reason: &'static str },

    /// An argument or configuration value is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// A URI could not be parsed into a bucket and key.
    #[error("Invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The key is mid-flush; accumulation and commit may not interleave.
    #[error("A flush is already in progress for {key}")]
    FlushInProgress { key: String },

    /// A pool task panicked, was cancelled, or the pool was closed.
    #[error("Pool task failed: {message}")]
    TaskFailed { message: String },
}

impl FsError {
    /// Wrap a collaborator error with the operation and key that failed.
    pub fn remote(
        operation: &'static str,
        key: impl std::fmt::Display,
        source: anyhow::Error,
    ) -> Self {
        counter!(REMOTE_FAILURES_TOTAL, "operation" => operation).increment(1);
        FsError::RemoteOperationFailed {
            operation,
            key: key.to_string(),
            source: source.into(),
        }
    }

    /// Return a stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::CapacityExceeded { .. } => "CapacityExceeded",
            FsError::NotFound { .. } => "NotFound",
            FsError::RangeError { .. } => "RangeError",
            FsError::RemoteOperationFailed { .. } => "RemoteOperationFailed",
            FsError::BucketStateError { .. } => "BucketStateError",
            FsError::InvalidArgument { .. } => "InvalidArgument",
            FsError::InvalidUri { .. } => "InvalidUri",
            FsError::FlushInProgress { .. } => "FlushInProgress",
            FsError::TaskFailed { .. } => "TaskFailed",
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_remote_error_keeps_context_and_source() {
        let err = FsError::remote(
            "put_object",
            "s3://bucket/key",
            anyhow::anyhow!("connection reset"),
        );
        assert_eq!(err.code(), "RemoteOperationFailed");
        assert_eq!(
            err.to_string(),
            "put_object failed for s3://bucket/key: connection reset"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_capacity_message_mentions_ceiling() {
        let err = FsError::CapacityExceeded {
            key: "s3://b/k".to_string(),
            buffered: 0,
            length: 11_000_000,
            ceiling: 10_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("11000000"));
        assert!(msg.contains("10000000"));
        assert_eq!(err.code(), "CapacityExceeded");
    }

    #[test]
    fn test_bucket_state_message() {
        let err = FsError::BucketStateError {
            bucket: "data".to_string(),
            reason: "is not empty",
        };
        assert_eq!(err.to_string(), "Bucket data is not empty");
    }
}
