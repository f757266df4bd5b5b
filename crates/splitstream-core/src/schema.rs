//! Dimension Schema
//!
//! A schema is an ordered list of dimension fields, each paired with a
//! validator describing which values are acceptable. Messages are projected
//! onto the schema to produce the dimension vector that routes them to a
//! directory path and object-key prefix.
//!
//! ## Validators
//! Three variants cover every schema in the wild:
//! - **Any** - accepts every value (`"allowed_values": "*"`)
//! - **List** - accepts a closed set of values (`"allowed_values": ["a","b"]`)
//! - **Range** - accepts values between optional lexicographic bounds
//!   (`"allowed_values": {"min":"20140120","max":"20140125"}`)
//!
//! ## Sentinels
//! - A field missing from the message projects to `"UNKNOWN"`
//! - A value rejected by the validator projects to `"OTHER"`
//!
//! The projected vector always has exactly one entry per schema field, in
//! schema order.
//!
//! ## Schema file
//! ```ignore
//! {
//!   "version": 1,
//!   "dimensions": [
//!     { "field_name": "submissionDate", "allowed_values": {"min": "20140120", "max": "20140125"} },
//!     { "field_name": "sourceName",     "allowed_values": "*" },
//!     { "field_name": "reason",         "allowed_values": ["idle-daily", "saved-session"] }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::message::Message;

/// Projection sentinel for values rejected by a validator.
pub const OTHER: &str = "OTHER";

/// Projection sentinel for fields absent from the message.
pub const UNKNOWN: &str = "UNKNOWN";

/// Which values are acceptable for a dimension field.
#[derive(Debug, Clone, PartialEq)]
pub enum AllowedValues {
    /// Accept any value at all.
    Any,
    /// Accept only values in the set.
    List(HashSet<String>),
    /// Accept values between the bounds (inclusive, lexicographic). A
    /// missing bound is not enforced; at least one bound is always present.
    Range {
        min: Option<String>,
        max: Option<String>,
    },
}

impl AllowedValues {
    pub fn is_allowed(&self, value: &str) -> bool {
        match self {
            AllowedValues::Any => true,
            AllowedValues::List(set) => set.contains(value),
            AllowedValues::Range { min, max } => {
                if let Some(min) = min {
                    if value < min.as_str() {
                        return false;
                    }
                }
                if let Some(max) = max {
                    if value > max.as_str() {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// The directory-splitting schema: ordered fields plus their validators.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<String>,
    indices: HashMap<String, usize>,
    validators: HashMap<String, AllowedValues>,
    version: i64,
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    version: i64,
    dimensions: Vec<RawDimension>,
}

#[derive(Deserialize)]
struct RawDimension {
    field_name: String,
    allowed_values: serde_json::Value,
}

fn field_error(field: &str, reason: impl Into<String>) -> Error {
    Error::SchemaField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Build one validator from the open-typed `allowed_values` JSON value.
fn parse_allowed(field: &str, value: &serde_json::Value) -> Result<AllowedValues> {
    use serde_json::Value;

    match value {
        Value::String(s) => {
            if s == "*" {
                Ok(AllowedValues::Any)
            } else {
                // A bare string is a one-element list.
                Ok(AllowedValues::List(HashSet::from([s.clone()])))
            }
        }
        Value::Array(items) => {
            let mut set = HashSet::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => {
                        set.insert(s.to_string());
                    }
                    None => {
                        return Err(field_error(
                            field,
                            "entries in 'allowed_values' must be strings",
                        ))
                    }
                }
            }
            Ok(AllowedValues::List(set))
        }
        Value::Object(range) => {
            let bound = |key: &str| -> Result<Option<String>> {
                match range.get(key) {
                    None => Ok(None),
                    Some(Value::String(s)) => Ok(Some(s.clone())),
                    Some(other) => Err(field_error(
                        field,
                        format!("value of '{}' must be a string (it was {})", key, other),
                    )),
                }
            };
            let min = bound("min")?;
            let max = bound("max")?;
            if min.is_none() && max.is_none() {
                return Err(field_error(
                    field,
                    "range must have at least one of 'min' or 'max'",
                ));
            }
            Ok(AllowedValues::Range { min, max })
        }
        other => Err(field_error(
            field,
            format!(
                "'allowed_values' must be \"*\", a list of strings, or a min/max range (it was {})",
                other
            ),
        )),
    }
}

impl Schema {
    /// A schema with no dimensions. Listing with an empty schema emits the
    /// objects directly under the prefix without descending.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a schema from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parse a schema from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawSchema = serde_json::from_slice(bytes)?;

        let mut fields = Vec::with_capacity(raw.dimensions.len());
        let mut indices = HashMap::with_capacity(raw.dimensions.len());
        let mut validators = HashMap::with_capacity(raw.dimensions.len());

        for (i, dim) in raw.dimensions.iter().enumerate() {
            let checker = parse_allowed(&dim.field_name, &dim.allowed_values)?;
            fields.push(dim.field_name.clone());
            indices.insert(dim.field_name.clone(), i);
            validators.insert(dim.field_name.clone(), checker);
        }

        Ok(Self {
            fields,
            indices,
            validators,
            version: raw.version,
        })
    }

    /// The schema's dimension field names, in order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// The validator for a field, if the schema declares it.
    pub fn validator(&self, field: &str) -> Option<&AllowedValues> {
        self.validators.get(field)
    }

    /// Whether `segment` is acceptable for the dimension at position `level`.
    /// Positions past the end of the field list accept everything (the
    /// hierarchy below the dimensions is key names, not dimensions).
    pub fn is_allowed_at(&self, level: usize, segment: &str) -> bool {
        match self.fields.get(level) {
            Some(field) => self
                .validators
                .get(field)
                .map(|v| v.is_allowed(segment))
                .unwrap_or(false),
            None => true,
        }
    }

    /// Check a value against a field's validator, substituting `OTHER` when
    /// the value is rejected.
    pub fn accept(&self, field: &str, value: &str) -> Result<String> {
        let checker = self
            .validators
            .get(field)
            .ok_or_else(|| Error::UnknownField(field.to_string()))?;
        if checker.is_allowed(value) {
            Ok(value.to_string())
        } else {
            Ok(OTHER.to_string())
        }
    }

    /// Project a message onto the schema, producing one dimension value per
    /// schema field. Absent fields project to `UNKNOWN`; rejected values
    /// project to `OTHER`. The first value seen for a field wins.
    pub fn project(&self, message: &Message) -> Vec<String> {
        let mut dims = vec![UNKNOWN.to_string(); self.fields.len()];
        let mut filled = vec![false; self.fields.len()];

        let mut remaining = dims.len();
        for field in &message.fields {
            if remaining == 0 {
                break;
            }
            let idx = match self.indices.get(&field.name) {
                Some(&idx) => idx,
                None => continue,
            };
            if filled[idx] {
                // Duplicate field; the first value already won.
                continue;
            }
            filled[idx] = true;
            remaining -= 1;

            let value = field.value.as_dimension();
            match self.accept(&field.name, &value) {
                Ok(v) => dims[idx] = v,
                Err(e) => {
                    // Unreachable: the index lookup proved the field exists.
                    tracing::warn!(field = %field.name, error = %e, "dimension check failed");
                }
            }
        }

        dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FieldValue;
    use bytes::Bytes;

    const TEST_SCHEMA: &str = r#"{
        "version": 1,
        "dimensions": [
            { "field_name": "any",      "allowed_values": "*" },
            { "field_name": "list",     "allowed_values": ["foo", "bar", "baz"] },
            { "field_name": "rangeMin", "allowed_values": {"min": "aaa"} },
            { "field_name": "rangeMax", "allowed_values": {"max": "bbb"} },
            { "field_name": "range",    "allowed_values": {"min": "aaa", "max": "bbb"} }
        ]
    }"#;

    fn test_schema() -> Schema {
        Schema::from_slice(TEST_SCHEMA.as_bytes()).expect("valid test schema")
    }

    fn expect_value(schema: &Schema, field: &str, actual: &str, expected: &str) {
        let v = schema.accept(field, actual).expect("known field");
        assert_eq!(v, expected, "field {} value {}", field, actual);
    }

    #[test]
    fn test_schema_field_count() {
        assert_eq!(test_schema().fields().len(), 5);
    }

    #[test]
    fn test_bogus_field_errors() {
        let schema = test_schema();
        assert!(schema.accept("bogus", "some value").is_err());
    }

    #[test]
    fn test_any_accepts_everything() {
        let schema = test_schema();
        expect_value(&schema, "any", "foo", "foo");
        expect_value(&schema, "any", "Any value at all is acceptable!", "Any value at all is acceptable!");
    }

    #[test]
    fn test_list_allow() {
        let schema = test_schema();
        expect_value(&schema, "list", "foo", "foo");
        expect_value(&schema, "list", "bar", "bar");
        expect_value(&schema, "list", "baz", "baz");
        expect_value(&schema, "list", "quux", "OTHER");
        expect_value(&schema, "list", "Some values are not acceptable!", "OTHER");
    }

    #[test]
    fn test_range_min() {
        let schema = test_schema();
        expect_value(&schema, "rangeMin", "aaa", "aaa");
        expect_value(&schema, "rangeMin", "foo", "foo");
        expect_value(&schema, "rangeMin", "bar", "bar");
        expect_value(&schema, "rangeMin", "all values larger than 'aaa' are fine!", "all values larger than 'aaa' are fine!");
        expect_value(&schema, "rangeMin", "100", "OTHER");
    }

    #[test]
    fn test_range_max() {
        let schema = test_schema();
        expect_value(&schema, "rangeMax", "all", "all");
        expect_value(&schema, "rangeMax", "bar", "bar");
        expect_value(&schema, "rangeMax", "bbb", "bbb");
        expect_value(&schema, "rangeMax", "100", "100");
        expect_value(&schema, "rangeMax", "ccc", "OTHER");
    }

    #[test]
    fn test_range_both_bounds() {
        let schema = test_schema();
        expect_value(&schema, "range", "aaa", "aaa");
        expect_value(&schema, "range", "all", "all");
        expect_value(&schema, "range", "bar", "bar");
        expect_value(&schema, "range", "bbb", "bbb");
        expect_value(&schema, "range", "100", "OTHER");
        expect_value(&schema, "range", "aa0", "OTHER");
        expect_value(&schema, "range", "bbc", "OTHER");
        expect_value(&schema, "range", "ccc", "OTHER");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("schema.json");
        std::fs::write(&path, TEST_SCHEMA).expect("write schema");
        let schema = Schema::load(&path).expect("load");
        assert_eq!(schema.fields().len(), 5);
        assert_eq!(schema.version(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Schema::load("/no/such/schema.json").is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(Schema::from_slice(b"{ not json").is_err());
    }

    #[test]
    fn test_single_string_is_one_element_list() {
        let schema = Schema::from_slice(
            br#"{"dimensions": [{"field_name": "f", "allowed_values": "only"}]}"#,
        )
        .expect("parse");
        expect_value(&schema, "f", "only", "only");
        expect_value(&schema, "f", "other", "OTHER");
    }

    #[test]
    fn test_non_string_list_entry_errors() {
        let err = Schema::from_slice(
            br#"{"dimensions": [{"field_name": "bad", "allowed_values": ["ok", 3]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(err.to_string().contains("must be strings"));
    }

    #[test]
    fn test_range_without_bounds_errors() {
        let err = Schema::from_slice(
            br#"{"dimensions": [{"field_name": "r", "allowed_values": {}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains('r'));
        assert!(err.to_string().contains("min"));
    }

    #[test]
    fn test_non_string_min_errors() {
        let err = Schema::from_slice(
            br#"{"dimensions": [{"field_name": "r", "allowed_values": {"min": 5}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'min' must be a string"));
    }

    #[test]
    fn test_wrong_shape_errors() {
        let err = Schema::from_slice(
            br#"{"dimensions": [{"field_name": "n", "allowed_values": 42}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains('n'));
    }

    // ---------------------------------------------------------------
    // Projection
    // ---------------------------------------------------------------

    #[test]
    fn test_project_no_fields_is_all_unknown() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new());
        let dims = schema.project(&msg);
        assert_eq!(dims, vec!["UNKNOWN"; 5]);
    }

    #[test]
    fn test_project_vector_length_is_stable() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new())
            .with_field("list", "quux")
            .with_field("unrelated", "x");
        let dims = schema.project(&msg);
        assert_eq!(dims.len(), schema.fields().len());
        assert_eq!(dims[1], "OTHER");
    }

    #[test]
    fn test_project_coerces_int() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new()).with_field("any", FieldValue::Int(1));
        assert_eq!(schema.project(&msg)[0], "1");
    }

    #[test]
    fn test_project_coerces_bool() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new()).with_field("any", FieldValue::Bool(true));
        assert_eq!(schema.project(&msg)[0], "true");
    }

    #[test]
    fn test_project_coerces_double() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new()).with_field("any", FieldValue::Double(1.23));
        assert_eq!(schema.project(&msg)[0], "1.23");
    }

    #[test]
    fn test_project_first_duplicate_wins() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new())
            .with_field("list", "foo")
            .with_field("list", "bar");
        assert_eq!(schema.project(&msg)[1], "foo");
    }

    #[test]
    fn test_project_preserves_order() {
        let schema = test_schema();
        let msg = Message::new(Bytes::new())
            .with_field("range", "bar")
            .with_field("any", "v");
        let dims = schema.project(&msg);
        assert_eq!(dims[0], "v");
        assert_eq!(dims[4], "bar");
    }

    #[test]
    fn test_is_allowed_at_past_fields_accepts() {
        let schema = test_schema();
        assert!(schema.is_allowed_at(99, "anything"));
    }

    #[test]
    fn test_empty_schema() {
        let schema = Schema::empty();
        assert!(schema.fields().is_empty());
        assert!(schema.is_allowed_at(0, "x"));
    }
}
