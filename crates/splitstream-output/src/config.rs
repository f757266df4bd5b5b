//! Output Engine Configuration
//!
//! Controls how messages are split into files, rotated, and published:
//!
//! - **path**: base output directory; in-flight files live under
//!   `<path>/current/<dimension path>` and rotated ones under
//!   `<path>/finalized/<dimension path>`
//! - **max_file_size**: rotate a current file once it reaches this many
//!   bytes (default: 500MB)
//! - **max_file_age_ms**: rotate a current file this long after its last
//!   write even if not full (default: 1 hour)
//! - **flush_interval_ms**: how often the age check runs (default: 1s)
//! - **max_open_files**: bound on concurrently open file handles; the least
//!   recently used handle is closed when the bound is hit (0 = unbounded)
//! - **s3_worker_count**: size of the publisher pool
//! - **s3_retries**: upload attempts re-queued after a partial failure
//!
//! ## Usage
//!
//! ```ignore
//! let config = OutputConfig {
//!     path: "/var/spool/splitstream".into(),
//!     schema_file: "/etc/splitstream/schema.json".into(),
//!     s3_bucket: "telemetry-published".to_string(),
//!     s3_bucket_prefix: "data/v4".to_string(),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base output file path.
    pub path: PathBuf,

    /// Output file permissions, an octal string (default "644").
    #[serde(default = "default_perm")]
    pub perm: String,

    /// Permissions for created directories, an octal string (default "700").
    #[serde(default = "default_folder_perm")]
    pub folder_perm: String,

    /// Path to the dimension schema JSON file.
    pub schema_file: PathBuf,

    /// Interval between age-based rotation checks, in milliseconds.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Whether stream framing is applied to output. Unset defaults to the
    /// encoder's own preference.
    #[serde(default)]
    pub use_framing: Option<bool>,

    /// Bytes written to a single file before rotation (default 500MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Idle time before a current file is rotated (default 1 hour).
    #[serde(default = "default_max_file_age")]
    pub max_file_age_ms: u64,

    /// Maximum concurrently open data files; 0 means no maximum
    /// (default 1000).
    #[serde(default = "default_max_open_files")]
    pub max_open_files: usize,

    /// Destination bucket; empty disables publishing.
    #[serde(default)]
    pub s3_bucket: String,

    /// Key prefix within the destination bucket.
    #[serde(default)]
    pub s3_bucket_prefix: String,

    /// Publish attempts re-queued after a partial failure (default 5).
    #[serde(default = "default_retries")]
    pub s3_retries: u32,

    /// Seconds to wait for a store connection (default 60).
    #[serde(default = "default_timeout")]
    pub s3_connect_timeout_secs: u64,

    /// Seconds to wait for a store read (default 60).
    #[serde(default = "default_timeout")]
    pub s3_read_timeout_secs: u64,

    /// Size of the publisher pool (default 10).
    #[serde(default = "default_worker_count")]
    pub s3_worker_count: usize,

    /// Store region (default "us-west-2").
    #[serde(default = "default_region")]
    pub aws_region: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            perm: default_perm(),
            folder_perm: default_folder_perm(),
            schema_file: PathBuf::new(),
            flush_interval_ms: default_flush_interval(),
            use_framing: None,
            max_file_size: default_max_file_size(),
            max_file_age_ms: default_max_file_age(),
            max_open_files: default_max_open_files(),
            s3_bucket: String::new(),
            s3_bucket_prefix: String::new(),
            s3_retries: default_retries(),
            s3_connect_timeout_secs: default_timeout(),
            s3_read_timeout_secs: default_timeout(),
            s3_worker_count: default_worker_count(),
            aws_region: default_region(),
        }
    }
}

fn default_perm() -> String {
    "644".to_string()
}

fn default_folder_perm() -> String {
    "700".to_string()
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_max_file_size() -> u64 {
    524_288_000 // 500MB
}

fn default_max_file_age() -> u64 {
    3_600_000 // 1 hour
}

fn default_max_open_files() -> usize {
    1000
}

fn default_retries() -> u32 {
    5
}

fn default_timeout() -> u64 {
    60
}

fn default_worker_count() -> usize {
    10
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn octal_mode(param: &'static str, value: &str) -> Result<u32> {
    u32::from_str_radix(value, 8).map_err(|_| Error::Config {
        param,
        reason: format!("'{}' is not an octal integer string", value),
    })
}

impl OutputConfig {
    /// File permission bits parsed from `perm`.
    pub fn perm_mode(&self) -> Result<u32> {
        octal_mode("perm", &self.perm)
    }

    /// Directory permission bits parsed from `folder_perm`.
    pub fn folder_perm_mode(&self) -> Result<u32> {
        octal_mode("folder_perm", &self.folder_perm)
    }

    /// Validate the configuration. Called once at engine start; every
    /// failure names the offending parameter.
    pub fn validate(&self) -> Result<()> {
        self.perm_mode()?;
        self.folder_perm_mode()?;

        if self.max_file_size < 1 {
            return Err(Error::Config {
                param: "max_file_size",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_file_age_ms < 1 {
            return Err(Error::Config {
                param: "max_file_age",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.schema_file.as_os_str().is_empty() {
            return Err(Error::Config {
                param: "schema_file",
                reason: "is missing".to_string(),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config {
                param: "path",
                reason: "is missing".to_string(),
            });
        }
        Ok(())
    }
}
