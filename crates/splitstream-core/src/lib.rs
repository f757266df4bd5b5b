//! Splitstream core types
//!
//! This crate holds the pieces shared by the output and input sides of a
//! splitstream pipeline:
//!
//! - [`Message`]: the unit of data, with named fields and a wire payload
//! - [`Schema`]: the dimension schema that routes messages, loaded from JSON
//! - [`path`]: dimension sanitization and path/file naming
//! - [`FrameCodec`]: the length-prefixed record envelope and stream splitter
//! - [`MessageEncoder`]: the pluggable message-to-bytes seam
//!
//! ## The shape of the pipeline
//!
//! ```text
//! Message ──project──▶ dimension vector ──sanitize──▶ dimension path
//!    │
//!    └──encode──▶ payload bytes ──frame──▶ split file ──▶ object store
//!
//! object store ──▶ byte stream ──FrameCodec──▶ records ──▶ downstream
//! ```

pub mod encoder;
pub mod error;
pub mod framing;
pub mod message;
pub mod path;
pub mod schema;
pub mod util;

pub use encoder::{JsonEncoder, MessageEncoder, PayloadEncoder};
pub use error::{Error, Result};
pub use framing::{frame, frame_header_len, FrameCodec, SplitEvent, MAX_RECORD_SIZE};
pub use message::{Field, FieldValue, Message};
pub use path::{clean_bucket_prefix, dimension_path, host_tag, new_file_name, sanitize_dimension};
pub use schema::{AllowedValues, Schema, OTHER, UNKNOWN};
pub use util::pretty_size;
