//! # Schema Registry
//!
//! Schemas give every message payload a named, ordered field-type layout
//! identified by a short hash. Field order is significant: it defines wire
//! position, not name-based tagging, so a schema is immutable once defined.
//! Hashes are assigned monotonically per registry and are distributed to
//! clients through the handshake package rather than persisted anywhere.
//!
//! The registry is an explicitly constructed service. Servers typically
//! hold one per process; tests construct isolated instances freely.

use crate::types::SchemaHash;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Scalar wire types supported by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Sint32,
    Uint32,
    Sint64,
    Uint64,
    Bool,
    String,
    Bytes,
    Float,
    Double,
}

impl ScalarType {
    fn name(self) -> &'static str {
        match self {
            ScalarType::Sint32 => "sint32",
            ScalarType::Uint32 => "uint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Uint64 => "uint64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }
}

/// A field type: a scalar, or an array variant of one.
///
/// The text form is the scalar name with an optional `[]` suffix
/// (`"uint32"`, `"string[]"`); this is the representation used in the
/// handshake schema list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub scalar: ScalarType,
    pub repeated: bool,
}

impl FieldType {
    pub const SINT32: FieldType = FieldType::scalar(ScalarType::Sint32);
    pub const UINT32: FieldType = FieldType::scalar(ScalarType::Uint32);
    pub const SINT64: FieldType = FieldType::scalar(ScalarType::Sint64);
    pub const UINT64: FieldType = FieldType::scalar(ScalarType::Uint64);
    pub const BOOL: FieldType = FieldType::scalar(ScalarType::Bool);
    pub const STRING: FieldType = FieldType::scalar(ScalarType::String);
    pub const BYTES: FieldType = FieldType::scalar(ScalarType::Bytes);
    pub const FLOAT: FieldType = FieldType::scalar(ScalarType::Float);
    pub const DOUBLE: FieldType = FieldType::scalar(ScalarType::Double);
    pub const SINT32_ARRAY: FieldType = FieldType::array(ScalarType::Sint32);
    pub const UINT32_ARRAY: FieldType = FieldType::array(ScalarType::Uint32);
    pub const SINT64_ARRAY: FieldType = FieldType::array(ScalarType::Sint64);
    pub const UINT64_ARRAY: FieldType = FieldType::array(ScalarType::Uint64);
    pub const BOOL_ARRAY: FieldType = FieldType::array(ScalarType::Bool);
    pub const STRING_ARRAY: FieldType = FieldType::array(ScalarType::String);
    pub const BYTES_ARRAY: FieldType = FieldType::array(ScalarType::Bytes);
    pub const FLOAT_ARRAY: FieldType = FieldType::array(ScalarType::Float);
    pub const DOUBLE_ARRAY: FieldType = FieldType::array(ScalarType::Double);

    pub const fn scalar(scalar: ScalarType) -> Self {
        Self {
            scalar,
            repeated: false,
        }
    }

    pub const fn array(scalar: ScalarType) -> Self {
        Self {
            scalar,
            repeated: true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repeated {
            write!(f, "{}[]", self.scalar.name())
        } else {
            f.write_str(self.scalar.name())
        }
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, repeated) = match s.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let scalar = match base {
            "sint32" => ScalarType::Sint32,
            "uint32" => ScalarType::Uint32,
            "sint64" => ScalarType::Sint64,
            "uint64" => ScalarType::Uint64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            _ => return Err(SchemaError::InvalidFieldType(s.to_string())),
        };
        Ok(FieldType { scalar, repeated })
    }
}

/// Errors raised while defining a schema or parsing a received layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A field type name is not part of the fixed type enum.
    #[error("field type=({0}) is not valid")]
    InvalidFieldType(String),
    /// A field name appears more than once in one layout.
    #[error("field name=({0}) appears more than once")]
    DuplicateField(String),
    /// The received layout description is not the expected JSON shape.
    #[error("malformed schema layout: {0}")]
    MalformedLayout(String),
    /// The 2-byte hash space of this registry is used up.
    #[error("schema hash space exhausted")]
    SpaceExhausted,
}

/// An immutable, ordered field-type layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    hash: SchemaHash,
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    pub(crate) fn new(
        hash: SchemaHash,
        fields: Vec<(String, FieldType)>,
    ) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for (name, _) in &fields {
            if !seen.insert(name.as_str()) {
                return Err(SchemaError::DuplicateField(name.clone()));
            }
        }
        Ok(Self { hash, fields })
    }

    pub fn hash(&self) -> SchemaHash {
        self.hash
    }

    /// Fields in wire order.
    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    /// The layout as a JSON object, field order preserved. This is the
    /// per-schema entry shipped inside the handshake package.
    pub fn layout_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, ty) in &self.fields {
            map.insert(name.clone(), JsonValue::String(ty.to_string()));
        }
        JsonValue::Object(map)
    }

    /// Parses a layout received as a JSON object back into an ordered
    /// field list. The inverse of [`Schema::layout_json`].
    pub fn layout_from_json(value: &JsonValue) -> Result<Vec<(String, FieldType)>, SchemaError> {
        let object = value
            .as_object()
            .ok_or_else(|| SchemaError::MalformedLayout("layout is not an object".into()))?;
        let mut fields = Vec::with_capacity(object.len());
        for (name, ty) in object {
            let ty = ty
                .as_str()
                .ok_or_else(|| SchemaError::MalformedLayout(format!("field=({name}) type is not a string")))?;
            fields.push((name.clone(), ty.parse::<FieldType>()?));
        }
        Ok(fields)
    }
}

struct RegistryInner {
    schemas: std::collections::HashMap<SchemaHash, Arc<Schema>>,
    counter: u16,
}

/// Process-scoped mapping from hash to schema.
///
/// Two layouts are pre-defined on construction and share fixed hashes on
/// every registry: [`SchemaRegistry::EMPTY`] (no fields) and
/// [`SchemaRegistry::SYNC`] (the handshake package layout). Both ends of a
/// connection rely on the sync layout being known before any schema
/// exchange has happened.
pub struct SchemaRegistry {
    inner: RwLock<RegistryInner>,
}

impl SchemaRegistry {
    /// Hash of the empty layout.
    pub const EMPTY: SchemaHash = SchemaHash(0x0000);
    /// Hash of the handshake package layout.
    pub const SYNC: SchemaHash = SchemaHash(0x0001);

    pub fn new() -> Self {
        let registry = Self {
            inner: RwLock::new(RegistryInner {
                schemas: std::collections::HashMap::new(),
                counter: 0,
            }),
        };
        // Both layouts are statically valid, so definition cannot fail here.
        let empty = registry
            .define(Vec::<(String, FieldType)>::new())
            .expect("empty layout");
        let sync = registry
            .define([
                ("roomId", FieldType::STRING),
                ("actorId", FieldType::STRING),
                ("actions", FieldType::STRING_ARRAY),
                ("schemas", FieldType::STRING),
            ])
            .expect("sync layout");
        debug_assert_eq!(empty, Self::EMPTY);
        debug_assert_eq!(sync, Self::SYNC);
        registry
    }

    /// Defines a new schema and assigns it the next sequential hash.
    pub fn define<N>(
        &self,
        fields: impl IntoIterator<Item = (N, FieldType)>,
    ) -> Result<SchemaHash, SchemaError>
    where
        N: Into<String>,
    {
        let fields: Vec<(String, FieldType)> = fields
            .into_iter()
            .map(|(name, ty)| (name.into(), ty))
            .collect();
        let mut inner = self.inner.write().expect("schema registry poisoned");
        let hash = SchemaHash(inner.counter);
        let schema = Schema::new(hash, fields)?;
        inner.counter = inner
            .counter
            .checked_add(1)
            .ok_or(SchemaError::SpaceExhausted)?;
        inner.schemas.insert(hash, Arc::new(schema));
        Ok(hash)
    }

    pub fn get(&self, hash: SchemaHash) -> Option<Arc<Schema>> {
        self.inner
            .read()
            .expect("schema registry poisoned")
            .schemas
            .get(&hash)
            .cloned()
    }

    pub fn contains(&self, hash: SchemaHash) -> bool {
        self.get(hash).is_some()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("schema registry poisoned");
        f.debug_struct("SchemaRegistry")
            .field("schemas", &inner.schemas.len())
            .field("counter", &inner.counter)
            .finish()
    }
}
