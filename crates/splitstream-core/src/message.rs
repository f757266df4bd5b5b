//! Message Data Structure
//!
//! This module defines the `Message` type - the unit of data flowing through
//! a splitstream pipeline.
//!
//! ## Structure
//! Each message contains:
//! - **timestamp**: When the message was produced (milliseconds since epoch)
//! - **fields**: Ordered, named metadata values used for dimension routing
//! - **payload**: The wire-format body (arbitrary bytes)
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for the payload so splitting and re-delivery are
//!   zero-copy
//! - Field values keep their native type but every variant coerces to a
//!   string, because dimension routing is string-valued
//! - Fields are a `Vec`, not a map: projection walks them once in order and
//!   the first value for a name wins
//!
//! ## Example
//! ```ignore
//! let msg = Message::new(Bytes::from_static(b"raw body"))
//!     .with_field("appName", FieldValue::from("Firefox"))
//!     .with_field("appVersion", FieldValue::from("42.0"));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl FieldValue {
    /// Coerce the value to the string form used for dimension routing.
    pub fn as_dimension(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Double(d) => d.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Double(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// A named field attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// A single message in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Timestamp in milliseconds since epoch
    pub timestamp: u64,

    /// Named metadata fields, in insertion order
    pub fields: Vec<Field>,

    /// Wire-format body
    pub payload: Bytes,
}

impl Message {
    pub fn new(payload: Bytes) -> Self {
        Self {
            timestamp: 0,
            fields: Vec::new(),
            payload,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// First value recorded under `name`, if any.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Estimate the size of this message in bytes
    pub fn estimated_size(&self) -> usize {
        8 + // timestamp
        self.fields
            .iter()
            .map(|f| f.name.len() + std::mem::size_of::<FieldValue>())
            .sum::<usize>() +
        self.payload.len()
    }
}
