//! AWS S3 remote store client.
//!
//! Maps each [`RemoteStoreClient`] call onto one `aws-sdk-s3` request.
//! Request signing, retries and connection pooling are the SDK's job;
//! this module only translates keys, ranges and not-found responses.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use super::client::{ClientFuture, RemoteStoreClient};
use crate::config::AwsStorageConfig;
use crate::uri::ObjectKey;

/// Region whose buckets must be created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// [`RemoteStoreClient`] backed by the AWS SDK.
pub struct AwsS3Client {
    /// AWS S3 SDK client.
    client: Client,
    /// Region used for bucket creation.
    region: String,
}

impl AwsS3Client {
    /// Create a new client from configuration.
    ///
    /// Loads AWS credentials from the default credential chain unless
    /// `access_key_id`/`secret_access_key` are set, and applies the
    /// configured endpoint, addressing style and timeouts.
    pub async fn new(config: &AwsStorageConfig) -> anyhow::Result<Self> {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .operation_timeout(Duration::from_millis(config.request_timeout_ms))
            .build();

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .timeout_config(timeouts);

        if !config.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&config.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "bleepfs-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "AWS S3 client initialized: region={} endpoint='{}' path_style={}",
            config.region, config.endpoint_url, config.use_path_style
        );

        Ok(Self {
            client,
            region: config.region.clone(),
        })
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("AWS S3 {context}: {err}")
    }
}

/// HTTP `Range` header value for `length` bytes at `offset` (inclusive end).
fn range_header(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length - 1)
}

/// Part numbers are `u32` here and `i32` on the wire; S3 caps them at 10,000.
fn wire_part_number(part_number: u32) -> anyhow::Result<i32> {
    i32::try_from(part_number)
        .map_err(|_| anyhow::anyhow!("part number {part_number} does not fit the S3 wire format"))
}

impl RemoteStoreClient for AwsS3Client {
    fn put_object(&self, key: &ObjectKey, data: Bytes) -> ClientFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            debug!(
                "AWS put_object: bucket={} key={} bytes={}",
                key.bucket(),
                key.path(),
                data.len()
            );

            self.client
                .put_object()
                .bucket(key.bucket())
                .key(key.path())
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e.into_service_error()))?;

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
            if length == 0 {
                return Ok(Bytes::new());
            }
            let range = range_header(offset, length);

            debug!(
                "AWS get_object: bucket={} key={} range={}",
                key.bucket(),
                key.path(),
                range
            );

            let resp = self
                .client
                .get_object()
                .bucket(key.bucket())
                .key(key.path())
                .range(range)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        anyhow::anyhow!("Object not found: {key}")
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();

            Ok(body)
        })
    }

    fn head_object(&self, key: &ObjectKey) -> ClientFuture<'_, Option<u64>> {
        let key = key.clone();
        Box::pin(async move {
            debug!("AWS head_object: bucket={} key={}", key.bucket(), key.path());

            match self
                .client
                .head_object()
                .bucket(key.bucket())
                .key(key.path())
                .send()
                .await
            {
                Ok(resp) => {
                    let size = resp.content_length().unwrap_or(0);
                    Ok(Some(u64::try_from(size).unwrap_or(0)))
                }
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, Vec<String>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            debug!("AWS list_objects_v2: bucket={} prefix={}", bucket, prefix);

            let mut keys = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix);

                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req.send().await.map_err(|e| {
                    Self::map_sdk_error("list_objects_v2", e.into_service_error())
                })?;

                keys.extend(
                    resp.contents()
                        .iter()
                        .filter_map(|obj| obj.key().map(str::to_string)),
                );

                if resp.is_truncated() == Some(true) {
                    continuation_token = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }

            Ok(keys)
        })
    }

    fn delete_object(&self, key: &ObjectKey) -> ClientFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            debug!("AWS delete_object: bucket={} key={}", key.bucket(), key.path());

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(key.bucket())
                .key(key.path())
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e.into_service_error()))?;

            Ok(())
        })
    }

    fn create_multipart_upload(&self, key: &ObjectKey) -> ClientFuture<'_, String> {
        let key = key.clone();
        Box::pin(async move {
            debug!(
                "AWS create_multipart_upload: bucket={} key={}",
                key.bucket(),
                key.path()
            );

            let resp = self
                .client
                .create_multipart_upload()
                .bucket(key.bucket())
                .key(key.path())
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("create_multipart_upload", e.into_service_error())
                })?;

            let upload_id = resp
                .upload_id()
                .ok_or_else(|| anyhow::anyhow!("AWS did not return upload ID"))?
                .to_string();

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
            debug!(
                "AWS upload_part: bucket={} key={} upload={} part={} bytes={}",
                key.bucket(),
                key.path(),
                upload_id,
                part_number,
                data.len()
            );

            let resp = self
                .client
                .upload_part()
                .bucket(key.bucket())
                .key(key.path())
                .upload_id(&upload_id)
                .part_number(wire_part_number(part_number)?)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e.into_service_error()))?;

            let etag = resp
                .e_tag()
                .ok_or_else(|| anyhow::anyhow!("AWS did not return an ETag for part {part_number}"))?
                .to_string();

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
            debug!(
                "AWS complete_multipart_upload: bucket={} key={} upload={} parts={}",
                key.bucket(),
                key.path(),
                upload_id,
                parts.len()
            );

            let mut completed_parts = Vec::with_capacity(parts.len());
            for (part_number, etag) in &parts {
                completed_parts.push(
                    CompletedPart::builder()
                        .e_tag(etag)
                        .part_number(wire_part_number(*part_number)?)
                        .build(),
                );
            }

            let completed_upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            self.client
                .complete_multipart_upload()
                .bucket(key.bucket())
                .key(key.path())
                .upload_id(&upload_id)
                .multipart_upload(completed_upload)
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("complete_multipart_upload", e.into_service_error())
                })?;

            Ok(())
        })
    }

    fn abort_multipart_upload(&self, key: &ObjectKey, upload_id: &str) -> ClientFuture<'_, ()> {
        let key = key.clone();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            debug!(
                "AWS abort_multipart_upload: bucket={} key={} upload={}",
                key.bucket(),
                key.path(),
                upload_id
            );

            self.client
                .abort_multipart_upload()
                .bucket(key.bucket())
                .key(key.path())
                .upload_id(&upload_id)
                .send()
                .await
                .map_err(|e| {
                    Self::map_sdk_error("abort_multipart_upload", e.into_service_error())
                })?;

            Ok(())
        })
    }

    fn create_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS create_bucket: bucket={} region={}", bucket, self.region);

            let mut req = self.client.create_bucket().bucket(&bucket);
            if self.region != DEFAULT_REGION {
                let location = CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build();
                req = req.create_bucket_configuration(location);
            }

            req.send()
                .await
                .map_err(|e| Self::map_sdk_error("create_bucket", e.into_service_error()))?;

            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS delete_bucket: bucket={}", bucket);

            self.client
                .delete_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_bucket", e.into_service_error()))?;

            Ok(())
        })
    }

    fn bucket_exists(&self, bucket: &str) -> ClientFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS head_bucket: bucket={}", bucket);

            match self.client.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(Self::map_sdk_error("head_bucket", service_err))
                    }
                }
            }
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(0, 26), "bytes=0-25");
        assert_eq!(range_header(11, 26), "bytes=11-36");
        assert_eq!(range_header(5, 1), "bytes=5-5");
    }

    #[test]
    fn test_wire_part_number() {
        assert_eq!(wire_part_number(1).unwrap(), 1);
        assert_eq!(wire_part_number(10_000).unwrap(), 10_000);
        assert!(wire_part_number(u32::MAX).is_err());
    }

    #[test]
    fn test_map_sdk_error_context() {
        let err = AwsS3Client::map_sdk_error("upload_part", "throttled");
        assert_eq!(err.to_string(), "AWS S3 upload_part: throttled");
    }
}
