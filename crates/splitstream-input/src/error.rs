//! Input Error Types
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! - `Config`: a parameter failed validation at init; names the parameter
//!
//! ### Index Errors
//! - `Index`: a malformed offset-index row; carries the file name and
//!   row number
//!
//! ### Fetch Errors
//! - `ShortFetch`: a byte-range read returned a different number of bytes
//!   than the location's length
//! - `ObjectStore`: a store operation failed
//!
//! ### Bridge Errors
//! - `Sqs`: a queue operation failed
//! - `Notification`: an event notification body did not parse
//!
//! All operations return `Result<T>` aliased to `Result<T, Error>`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid value for '{param}': {reason}")]
    Config { param: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] splitstream_core::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("error on {file} line {line}: {reason}")]
    Index {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("unexpected body length fetching {key}: {actual} != {expected}")]
    ShortFetch {
        key: String,
        expected: u32,
        actual: usize,
    },

    #[error("queue closed")]
    QueueClosed,

    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("bad notification body: {0}")]
    Notification(String),
}
