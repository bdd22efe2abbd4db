//! `s3://bucket/path` parsing.
//!
//! An [`ObjectKey`] names one object; bucket-level operations take a bare
//! bucket URI (`s3://bucket` or `s3://bucket/`).

use std::fmt;

use garde::Validate;

use crate::errors::FsError;

/// URI scheme handled by this crate.
pub const S3_SCHEME: &str = "s3://";

/// Bucket + path within the bucket.  Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    bucket: String,
    path: String,
}

impl ObjectKey {
    /// Build a key from an already-validated bucket and a path.
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Parse `s3://bucket/path/to/object`.  The path must be non-empty.
    pub fn parse(uri: &str) -> Result<Self, FsError> {
        let (bucket, path) = split_uri(uri)?;
        if path.is_empty() {
            return Err(FsError::InvalidUri {
                uri: uri.to_string(),
                reason: "missing object path".to_string(),
            });
        }
        Ok(Self::new(bucket, path))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.path)
    }
}

/// Parse a bucket URI.  Any path component is ignored.
pub fn parse_bucket(uri: &str) -> Result<String, FsError> {
    split_uri(uri).map(|(bucket, _)| bucket)
}

/// Parse `s3://bucket/prefix` into the bucket and a directory prefix that
/// is either empty or ends with `/`.
pub fn parse_prefix(uri: &str) -> Result<(String, String), FsError> {
    let (bucket, mut path) = split_uri(uri)?;
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    Ok((bucket, path))
}

fn split_uri(uri: &str) -> Result<(String, String), FsError> {
    let rest = uri
        .strip_prefix(S3_SCHEME)
        .ok_or_else(|| FsError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("expected scheme {S3_SCHEME}"),
        })?;

    let (bucket, path) = match rest.split_once('/') {
        Some((bucket, path)) => (bucket, path),
        None => (rest, ""),
    };

    validate_bucket_name(bucket).map_err(|reason| FsError::InvalidUri {
        uri: uri.to_string(),
        reason,
    })?;

    Ok((bucket.to_string(), path.to_string()))
}

/// Validation struct for bucket names.
#[derive(Debug, Validate)]
struct BucketNameInput<'a> {
    /// 3-63 lowercase alphanumeric characters, dots, and hyphens.
    #[garde(length(min = 3, max = 63), pattern(r"^[a-z0-9][a-z0-9.\-]*[a-z0-9]$"))]
    bucket_name: &'a str,
}

/// Check a bucket name against the S3 naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    BucketNameInput { bucket_name: name }
        .validate()
        .map_err(|report| format!("invalid bucket name '{name}': {report}"))?;

    if looks_like_ip(name) {
        return Err(format!("bucket name '{name}' must not look like an IP address"));
    }
    if name.starts_with("xn--") {
        return Err(format!("bucket name '{name}' must not start with xn--"));
    }
    Ok(())
}

/// Check if a string looks like an IPv4 address (e.g. "192.168.1.1").
fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_key() {
        let key = ObjectKey::parse("s3://my-bucket/dir/largefile").unwrap();
        assert_eq!(key.bucket(), "my-bucket");
        assert_eq!(key.path(), "dir/largefile");
        assert_eq!(key.to_string(), "s3://my-bucket/dir/largefile");
    }

    #[test]
    fn test_parse_object_key_requires_path() {
        assert!(ObjectKey::parse("s3://my-bucket/").is_err());
        assert!(ObjectKey::parse("s3://my-bucket").is_err());
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = ObjectKey::parse("gs://my-bucket/key").unwrap_err();
        assert_eq!(err.code(), "InvalidUri");
        assert!(parse_bucket("my-bucket").is_err());
    }

    #[test]
    fn test_parse_bucket() {
        assert_eq!(parse_bucket("s3://my-bucket").unwrap(), "my-bucket");
        assert_eq!(parse_bucket("s3://my-bucket/").unwrap(), "my-bucket");
        assert_eq!(parse_bucket("s3://my-bucket/a/b").unwrap(), "my-bucket");
    }

    #[test]
    fn test_parse_prefix_adds_trailing_slash() {
        assert_eq!(
            parse_prefix("s3://my-bucket/dir").unwrap(),
            ("my-bucket".to_string(), "dir/".to_string())
        );
        assert_eq!(
            parse_prefix("s3://my-bucket/dir/").unwrap(),
            ("my-bucket".to_string(), "dir/".to_string())
        );
        assert_eq!(
            parse_prefix("s3://my-bucket").unwrap(),
            ("my-bucket".to_string(), String::new())
        );
    }

    #[test]
    fn test_validate_bucket_name() {
        assert!(validate_bucket_name("valid-bucket").is_ok());
        assert!(validate_bucket_name("my.bucket.name").is_ok());
        assert!(validate_bucket_name("abc").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
        assert!(validate_bucket_name("InvalidBucket").is_err());
        assert!(validate_bucket_name("bucket_name").is_err());
        assert!(validate_bucket_name("-bucket").is_err());
        assert!(validate_bucket_name("bucket.").is_err());
        assert!(validate_bucket_name("192.168.1.1").is_err());
        assert!(validate_bucket_name("xn--example").is_err());
    }

    #[test]
    fn test_looks_like_ip() {
        assert!(looks_like_ip("10.0.0.1"));
        assert!(!looks_like_ip("192.168.1"));
        assert!(!looks_like_ip("999.999.999.999"));
    }
}
