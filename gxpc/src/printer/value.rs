//! Dynamic values whose shape is only known at runtime
//!
//! The agent serialises XPC dictionaries, arrays and scalars to JSON. The
//! renderer walks them through this small tagged union instead of poking at
//! `serde_json::Value` directly.

use serde::{Deserialize, Deserializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    /// Key/value pairs, sorted by key as `serde_json` yields them
    Mapping(Vec<(String, DynValue)>),
    Sequence(Vec<DynValue>),
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<serde_json::Value> for DynValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Object(map) => {
                DynValue::Mapping(map.into_iter().map(|(k, v)| (k, DynValue::from(v))).collect())
            }
            Value::Array(items) => DynValue::Sequence(items.into_iter().map(DynValue::from).collect()),
            Value::Null => DynValue::Scalar(Scalar::Null),
            Value::Bool(b) => DynValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => DynValue::Scalar(Scalar::Number(n)),
            Value::String(s) => DynValue::Scalar(Scalar::Text(s)),
        }
    }
}

impl<'de> Deserialize<'de> for DynValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(DynValue::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        let value = DynValue::from(json!({"a": [1, "two", null]}));
        let DynValue::Mapping(entries) = value else {
            panic!("expected mapping");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a");
        assert!(matches!(&entries[0].1, DynValue::Sequence(items) if items.len() == 3));
    }

    #[test]
    fn test_scalar_text_form() {
        assert_eq!(Scalar::Text("com.apple.xpc".into()).to_string(), "com.apple.xpc");
        assert_eq!(Scalar::Number(7.into()).to_string(), "7");
        assert_eq!(Scalar::Bool(true).to_string(), "true");
        assert_eq!(Scalar::Null.to_string(), "null");
    }
}
