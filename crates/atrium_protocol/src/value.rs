//! Dynamic payload values carried by schema-coded messages.
//!
//! A [`Payload`] is the decoded form of a wire frame: a field-name keyed
//! set of [`Value`]s. The codec checks every value against the schema's
//! field type at encode time; fields absent from a payload encode as their
//! type's default (zero, `false`, empty).

use crate::schema::{FieldType, ScalarType};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// A single dynamically typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Sint32(i32),
    Uint32(u32),
    Sint64(i64),
    Uint64(u64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Float(f32),
    Double(f64),
    Sint32Array(Vec<i32>),
    Uint32Array(Vec<u32>),
    Sint64Array(Vec<i64>),
    Uint64Array(Vec<u64>),
    BoolArray(Vec<bool>),
    StrArray(Vec<String>),
    BytesArray(Vec<Vec<u8>>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
}

impl Value {
    /// The default value encoded for a field the payload does not set.
    pub fn default_for(ty: FieldType) -> Value {
        match (ty.scalar, ty.repeated) {
            (ScalarType::Sint32, false) => Value::Sint32(0),
            (ScalarType::Uint32, false) => Value::Uint32(0),
            (ScalarType::Sint64, false) => Value::Sint64(0),
            (ScalarType::Uint64, false) => Value::Uint64(0),
            (ScalarType::Bool, false) => Value::Bool(false),
            (ScalarType::String, false) => Value::Str(String::new()),
            (ScalarType::Bytes, false) => Value::Bytes(Vec::new()),
            (ScalarType::Float, false) => Value::Float(0.0),
            (ScalarType::Double, false) => Value::Double(0.0),
            (ScalarType::Sint32, true) => Value::Sint32Array(Vec::new()),
            (ScalarType::Uint32, true) => Value::Uint32Array(Vec::new()),
            (ScalarType::Sint64, true) => Value::Sint64Array(Vec::new()),
            (ScalarType::Uint64, true) => Value::Uint64Array(Vec::new()),
            (ScalarType::Bool, true) => Value::BoolArray(Vec::new()),
            (ScalarType::String, true) => Value::StrArray(Vec::new()),
            (ScalarType::Bytes, true) => Value::BytesArray(Vec::new()),
            (ScalarType::Float, true) => Value::FloatArray(Vec::new()),
            (ScalarType::Double, true) => Value::DoubleArray(Vec::new()),
        }
    }

    /// The field type this value conforms to.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Sint32(_) => FieldType::SINT32,
            Value::Uint32(_) => FieldType::UINT32,
            Value::Sint64(_) => FieldType::SINT64,
            Value::Uint64(_) => FieldType::UINT64,
            Value::Bool(_) => FieldType::BOOL,
            Value::Str(_) => FieldType::STRING,
            Value::Bytes(_) => FieldType::BYTES,
            Value::Float(_) => FieldType::FLOAT,
            Value::Double(_) => FieldType::DOUBLE,
            Value::Sint32Array(_) => FieldType::SINT32_ARRAY,
            Value::Uint32Array(_) => FieldType::UINT32_ARRAY,
            Value::Sint64Array(_) => FieldType::SINT64_ARRAY,
            Value::Uint64Array(_) => FieldType::UINT64_ARRAY,
            Value::BoolArray(_) => FieldType::BOOL_ARRAY,
            Value::StrArray(_) => FieldType::STRING_ARRAY,
            Value::BytesArray(_) => FieldType::BYTES_ARRAY,
            Value::FloatArray(_) => FieldType::FLOAT_ARRAY,
            Value::DoubleArray(_) => FieldType::DOUBLE_ARRAY,
        }
    }

    /// Debug/log representation. Bytes render as lengths, not contents.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Sint32(v) => json!(v),
            Value::Uint32(v) => json!(v),
            Value::Sint64(v) => json!(v),
            Value::Uint64(v) => json!(v),
            Value::Bool(v) => json!(v),
            Value::Str(v) => json!(v),
            Value::Bytes(v) => json!(format!("<{} bytes>", v.len())),
            Value::Float(v) => json!(v),
            Value::Double(v) => json!(v),
            Value::Sint32Array(v) => json!(v),
            Value::Uint32Array(v) => json!(v),
            Value::Sint64Array(v) => json!(v),
            Value::Uint64Array(v) => json!(v),
            Value::BoolArray(v) => json!(v),
            Value::StrArray(v) => json!(v),
            Value::BytesArray(v) => {
                json!(v.iter().map(|b| format!("<{} bytes>", b.len())).collect::<Vec<_>>())
            }
            Value::FloatArray(v) => json!(v),
            Value::DoubleArray(v) => json!(v),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(impl From<$source> for Value {
            fn from(value: $source) -> Self {
                Value::$variant(value)
            }
        })*
    };
}

value_from! {
    i32 => Sint32,
    u32 => Uint32,
    i64 => Sint64,
    u64 => Uint64,
    bool => Bool,
    String => Str,
    Vec<u8> => Bytes,
    f32 => Float,
    f64 => Double,
    Vec<i32> => Sint32Array,
    Vec<u32> => Uint32Array,
    Vec<i64> => Sint64Array,
    Vec<u64> => Uint64Array,
    Vec<bool> => BoolArray,
    Vec<String> => StrArray,
    Vec<f32> => FloatArray,
    Vec<f64> => DoubleArray,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

/// Field-name keyed value set; the decoded form of one wire frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: HashMap<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// String field accessor; `None` when absent or differently typed.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Value::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub fn str_array(&self, name: &str) -> Option<&[String]> {
        match self.fields.get(name) {
            Some(Value::StrArray(value)) => Some(value),
            _ => None,
        }
    }

    pub fn uint32(&self, name: &str) -> Option<u32> {
        match self.fields.get(name) {
            Some(Value::Uint32(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(Value::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    /// Debug/log representation of the whole payload.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Payload {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut payload = Payload::new();
        for (name, value) in iter {
            payload.insert(name, value);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_their_type() {
        assert_eq!(Value::default_for(FieldType::UINT32), Value::Uint32(0));
        assert_eq!(
            Value::default_for(FieldType::STRING_ARRAY),
            Value::StrArray(Vec::new())
        );
        for ty in [FieldType::BYTES, FieldType::DOUBLE, FieldType::BOOL_ARRAY] {
            assert_eq!(Value::default_for(ty).field_type(), ty);
        }
    }

    #[test]
    fn typed_accessors() {
        let payload = Payload::new()
            .with("name", "lobby")
            .with("count", 3u32)
            .with("tags", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(payload.str("name"), Some("lobby"));
        assert_eq!(payload.uint32("count"), Some(3));
        assert_eq!(payload.str_array("tags").map(|t| t.len()), Some(2));
        assert_eq!(payload.str("count"), None);
        assert_eq!(payload.get("missing"), None);
    }
}
