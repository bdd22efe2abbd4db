//! Configuration loading and types for BleepFS.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `s3` section governs buffering and multipart
//! behaviour, `storage` selects the remote store client, and `logging`
//! configures the subscriber installed by the CLI.

use std::num::NonZeroU64;
use std::path::Path;

use garde::Validate;
use serde::Deserialize;

use crate::errors::FsError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Buffering and multipart settings.
    #[serde(default)]
    pub s3: S3Config,

    /// Remote store client settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Buffering and multipart upload settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct S3Config {
    /// Upper bound on concurrent part uploads / deletes per operation.
    #[serde(default = "default_max_parallel_ops")]
    #[garde(range(min = 1))]
    pub max_parallel_ops: usize,

    /// Bytes per multipart part, and the single-PUT ceiling when
    /// multipart upload is disabled.
    #[serde(default = "default_multipart_part_size")]
    #[garde(range(min = 1))]
    pub multipart_part_size: u64,

    /// Enable the multipart path for buffers larger than one part.
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub use_multipart_upload: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            max_parallel_ops: default_max_parallel_ops(),
            multipart_part_size: default_multipart_part_size(),
            use_multipart_upload: true,
        }
    }
}

impl S3Config {
    /// Validate the settings, mapping garde's report onto [`FsError`].
    pub fn check(&self) -> Result<(), FsError> {
        self.validate().map_err(|report| FsError::InvalidArgument {
            message: format!("invalid s3 configuration: {report}"),
        })
    }

    /// Configured part size as a non-zero value.
    pub fn part_size(&self) -> Result<NonZeroU64, FsError> {
        NonZeroU64::new(self.multipart_part_size).ok_or_else(|| FsError::InvalidArgument {
            message: "s3.multipart_part_size must be at least 1".to_string(),
        })
    }
}

/// Remote store client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Client type: `aws` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// AWS S3 client configuration.
    #[serde(default)]
    pub aws: Option<AwsStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            aws: None,
        }
    }
}

/// AWS S3 (or S3-compatible) client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-operation timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AwsStorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_max_parallel_ops() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_multipart_part_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------
