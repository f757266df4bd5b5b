//! Error Types for Splitstream Core
//!
//! This module defines the errors shared by the core types.
//!
//! ## Error Categories
//!
//! ### Schema Errors
//! - `SchemaJson`: the schema file is not valid JSON
//! - `SchemaField`: a dimension entry has the wrong shape (the message names
//!   the offending field)
//! - `UnknownField`: a value was checked against a field the schema does not
//!   declare
//!
//! ### Framing Errors
//! - `RecordTooLarge`: a payload exceeds the maximum record size when
//!   encoding a frame
//!
//! ### Encoding Errors
//! - `Encode`: a message encoder failed to produce bytes
//!
//! ## Usage
//! All fallible functions in this crate return `Result<T>` aliased to
//! `Result<T, Error>`, so errors propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema JSON: {0}")]
    SchemaJson(#[from] serde_json::Error),

    #[error("Schema field '{field}': {reason}")]
    SchemaField { field: String, reason: String },

    #[error("No such field: '{0}'")]
    UnknownField(String),

    #[error("Record of {declared} bytes exceeds maximum record size {max}")]
    RecordTooLarge { declared: usize, max: usize },

    #[error("Encode error: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
