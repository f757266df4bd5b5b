//! Output Engine Error Types
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! - `Config`: a parameter failed validation at init; the message names the
//!   parameter
//!
//! ### Write-Path Errors
//! - `FileWrite`: appending to a current file failed
//! - `Truncated`: a write landed fewer bytes than requested; the current
//!   file entry survives and the error is not retried
//!
//! ### Store Errors
//! - `ObjectStore`: an upload or other store operation failed
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

    #[error("can't write to {name}: {source}")]
    FileWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("truncated output for {name}: wrote {wrote} of {expected} bytes")]
    Truncated {
        name: String,
        wrote: usize,
        expected: usize,
    },
}
