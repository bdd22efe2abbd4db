//! Prometheus metrics for BleepFS.
//!
//! Defines metric name constants and registers their descriptions.  The
//! library only emits through the `metrics` facade; a binary that wants
//! the numbers installs a recorder with [`init_metrics`].

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Bytes accepted into write buffers (counter).
pub const BYTES_BUFFERED_TOTAL: &str = "bleepfs_bytes_buffered_total";

/// Objects committed by a flush (counter). Labels: path (single, multipart).
pub const OBJECTS_FLUSHED_TOTAL: &str = "bleepfs_objects_flushed_total";

/// Multipart parts uploaded successfully (counter).
pub const PARTS_UPLOADED_TOTAL: &str = "bleepfs_parts_uploaded_total";

/// Multipart uploads aborted after a failure (counter).
pub const MULTIPART_ABORTS_TOTAL: &str = "bleepfs_multipart_aborts_total";

/// Bytes returned by ranged reads (counter).
pub const BYTES_READ_TOTAL: &str = "bleepfs_bytes_read_total";

/// Objects deleted by remove/empty operations (counter).
pub const OBJECTS_DELETED_TOTAL: &str = "bleepfs_objects_deleted_total";

/// Failed remote store calls (counter). Labels: operation.
pub const REMOTE_FAILURES_TOTAL: &str = "bleepfs_remote_failures_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(
        BYTES_BUFFERED_TOTAL,
        Unit::Bytes,
        "Bytes accepted into write buffers"
    );
    describe_counter!(OBJECTS_FLUSHED_TOTAL, "Objects committed by a flush");
    describe_counter!(PARTS_UPLOADED_TOTAL, "Multipart parts uploaded");
    describe_counter!(MULTIPART_ABORTS_TOTAL, "Multipart uploads aborted");
    describe_counter!(BYTES_READ_TOTAL, Unit::Bytes, "Bytes returned by reads");
    describe_counter!(OBJECTS_DELETED_TOTAL, "Objects deleted");
    describe_counter!(REMOTE_FAILURES_TOTAL, "Failed remote store calls");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            BYTES_BUFFERED_TOTAL,
            OBJECTS_FLUSHED_TOTAL,
            PARTS_UPLOADED_TOTAL,
            MULTIPART_ABORTS_TOTAL,
            BYTES_READ_TOTAL,
            OBJECTS_DELETED_TOTAL,
            REMOTE_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("bleepfs_"));
            assert!(name.ends_with("_total"));
        }
    }
}
