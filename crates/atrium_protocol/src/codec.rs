//! # Binary Codec
//!
//! Encodes and decodes schema-coded payloads to and from compact binary
//! buffers. The format is positional: the schema's field order defines wire
//! position, so compatibility is pinned to the schema hash and nothing
//! else. Changing field order or types under an existing hash corrupts
//! every live client using that hash.
//!
//! Wire encodings per scalar:
//!
//! | type            | encoding                                |
//! |-----------------|-----------------------------------------|
//! | uint32 / uint64 | LEB128 varint                           |
//! | sint32 / sint64 | zigzag, then LEB128 varint              |
//! | bool            | single byte `0x00`/`0x01`               |
//! | float / double  | fixed width, big-endian                 |
//! | string / bytes  | varint length prefix + raw bytes        |
//! | `T[]`           | varint element count + elements         |

use crate::schema::{FieldType, ScalarType, Schema, SchemaRegistry};
use crate::types::SchemaHash;
use crate::value::{Payload, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised by [`ProtocolCodec::encode`] and [`ProtocolCodec::decode`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The schema hash is not registered with this codec.
    #[error("schema hash=({0}) is not registered")]
    UnknownSchema(SchemaHash),
    /// A payload value does not conform to the schema's field type.
    #[error("field=({field}) expects type=({expected}), got=({actual})")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },
    /// The buffer ended before the field was fully read.
    #[error("buffer ended short while reading field=({0})")]
    UnexpectedEof(String),
    /// A varint ran past its maximum width.
    #[error("varint overflow while reading field=({0})")]
    VarintOverflow(String),
    /// A length prefix points past the end of the buffer.
    #[error("length prefix of field=({0}) exceeds the remaining buffer")]
    LengthOverrun(String),
    /// A string field holds invalid UTF-8.
    #[error("invalid utf-8 in field=({0})")]
    InvalidUtf8(String),
    /// Bytes remain after the schema's last field was decoded.
    #[error("trailing bytes after the last field")]
    TrailingBytes,
}

const MAX_VARINT_BYTES: usize = 10;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn zigzag32(value: i32) -> u64 {
    (((value << 1) ^ (value >> 31)) as u32) as u64
}

fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag32(value: u64) -> i32 {
    let value = value as u32;
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Cursor over an inbound buffer; every read is bounds-checked against the
/// field currently being decoded so errors name the offending field.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof(field.to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_varint(&mut self, field: &str) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for index in 0..MAX_VARINT_BYTES {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| CodecError::UnexpectedEof(field.to_string()))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (index * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow(field.to_string()))
    }

    fn read_len(&mut self, field: &str) -> Result<usize, CodecError> {
        let len = self.read_varint(field)? as usize;
        if len > self.remaining() {
            return Err(CodecError::LengthOverrun(field.to_string()));
        }
        Ok(len)
    }
}

/// Schema-driven payload codec.
///
/// Resolves schemas from an injected [`SchemaRegistry`], plus an overlay of
/// layouts learned at runtime via [`ProtocolCodec::add_schema`] - the path
/// a client takes after receiving the handshake schema list.
pub struct ProtocolCodec {
    registry: Arc<SchemaRegistry>,
    learned: RwLock<HashMap<SchemaHash, Arc<Schema>>>,
}

impl ProtocolCodec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            learned: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Installs a layout under a peer-assigned hash. Used by clients after
    /// the handshake; an existing entry for the hash is replaced.
    pub fn add_schema(
        &self,
        hash: SchemaHash,
        fields: Vec<(String, FieldType)>,
    ) -> Result<(), crate::schema::SchemaError> {
        let schema = Schema::new(hash, fields)?;
        self.learned
            .write()
            .expect("codec overlay poisoned")
            .insert(hash, Arc::new(schema));
        Ok(())
    }

    fn resolve(&self, hash: SchemaHash) -> Result<Arc<Schema>, CodecError> {
        if let Some(schema) = self.registry.get(hash) {
            return Ok(schema);
        }
        self.learned
            .read()
            .expect("codec overlay poisoned")
            .get(&hash)
            .cloned()
            .ok_or(CodecError::UnknownSchema(hash))
    }

    /// Encodes `payload` under the schema identified by `hash`.
    ///
    /// Fields the payload does not set encode as their type's default;
    /// fields set to a mismatched type fail with
    /// [`CodecError::TypeMismatch`].
    pub fn encode(&self, hash: SchemaHash, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        let schema = self.resolve(hash)?;
        let mut out = Vec::new();
        for (name, ty) in schema.fields() {
            match payload.get(name) {
                Some(value) => {
                    if value.field_type() != *ty {
                        return Err(CodecError::TypeMismatch {
                            field: name.clone(),
                            expected: *ty,
                            actual: value.field_type(),
                        });
                    }
                    encode_value(&mut out, value);
                }
                None => encode_value(&mut out, &Value::default_for(*ty)),
            }
        }
        Ok(out)
    }

    /// Decodes a buffer produced by [`ProtocolCodec::encode`] under the
    /// same schema. The returned payload contains every schema field.
    pub fn decode(&self, hash: SchemaHash, buffer: &[u8]) -> Result<Payload, CodecError> {
        let schema = self.resolve(hash)?;
        let mut reader = Reader::new(buffer);
        let mut payload = Payload::new();
        for (name, ty) in schema.fields() {
            let value = decode_value(&mut reader, *ty, name)?;
            payload.insert(name.clone(), value);
        }
        if reader.remaining() != 0 {
            return Err(CodecError::TrailingBytes);
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for ProtocolCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCodec")
            .field("registry", &self.registry)
            .field(
                "learned",
                &self.learned.read().expect("codec overlay poisoned").len(),
            )
            .finish()
    }
}

fn encode_scalar(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Sint32(v) => write_varint(out, zigzag32(*v)),
        Value::Uint32(v) => write_varint(out, u64::from(*v)),
        Value::Sint64(v) => write_varint(out, zigzag64(*v)),
        Value::Uint64(v) => write_varint(out, *v),
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::Str(v) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v);
        }
        Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        _ => unreachable!("arrays are flattened before scalar encoding"),
    }
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    macro_rules! encode_array {
        ($items:expr, $variant:ident) => {{
            write_varint(out, $items.len() as u64);
            for item in $items {
                encode_scalar(out, &Value::$variant(item.clone()));
            }
        }};
    }
    match value {
        Value::Sint32Array(items) => encode_array!(items, Sint32),
        Value::Uint32Array(items) => encode_array!(items, Uint32),
        Value::Sint64Array(items) => encode_array!(items, Sint64),
        Value::Uint64Array(items) => encode_array!(items, Uint64),
        Value::BoolArray(items) => encode_array!(items, Bool),
        Value::StrArray(items) => encode_array!(items, Str),
        Value::BytesArray(items) => encode_array!(items, Bytes),
        Value::FloatArray(items) => encode_array!(items, Float),
        Value::DoubleArray(items) => encode_array!(items, Double),
        scalar => encode_scalar(out, scalar),
    }
}

fn decode_scalar(
    reader: &mut Reader<'_>,
    scalar: ScalarType,
    field: &str,
) -> Result<Value, CodecError> {
    let value = match scalar {
        ScalarType::Sint32 => Value::Sint32(unzigzag32(reader.read_varint(field)?)),
        ScalarType::Uint32 => Value::Uint32(reader.read_varint(field)? as u32),
        ScalarType::Sint64 => Value::Sint64(unzigzag64(reader.read_varint(field)?)),
        ScalarType::Uint64 => Value::Uint64(reader.read_varint(field)?),
        ScalarType::Bool => Value::Bool(reader.take(1, field)?[0] != 0),
        ScalarType::String => {
            let len = reader.read_len(field)?;
            let bytes = reader.take(len, field)?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CodecError::InvalidUtf8(field.to_string()))?;
            Value::Str(text.to_string())
        }
        ScalarType::Bytes => {
            let len = reader.read_len(field)?;
            Value::Bytes(reader.take(len, field)?.to_vec())
        }
        ScalarType::Float => {
            let bytes = reader.take(4, field)?;
            Value::Float(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        ScalarType::Double => {
            let bytes = reader.take(8, field)?;
            Value::Double(f64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]))
        }
    };
    Ok(value)
}

fn decode_value(
    reader: &mut Reader<'_>,
    ty: FieldType,
    field: &str,
) -> Result<Value, CodecError> {
    if !ty.repeated {
        return decode_scalar(reader, ty.scalar, field);
    }
    let count = reader.read_varint(field)? as usize;
    macro_rules! decode_array {
        ($variant:ident, $array:ident) => {{
            let mut items = Vec::new();
            for _ in 0..count {
                match decode_scalar(reader, ty.scalar, field)? {
                    Value::$variant(item) => items.push(item),
                    _ => unreachable!("scalar decode returns its own variant"),
                }
            }
            Value::$array(items)
        }};
    }
    let value = match ty.scalar {
        ScalarType::Sint32 => decode_array!(Sint32, Sint32Array),
        ScalarType::Uint32 => decode_array!(Uint32, Uint32Array),
        ScalarType::Sint64 => decode_array!(Sint64, Sint64Array),
        ScalarType::Uint64 => decode_array!(Uint64, Uint64Array),
        ScalarType::Bool => decode_array!(Bool, BoolArray),
        ScalarType::String => decode_array!(Str, StrArray),
        ScalarType::Bytes => decode_array!(Bytes, BytesArray),
        ScalarType::Float => decode_array!(Float, FloatArray),
        ScalarType::Double => decode_array!(Double, DoubleArray),
    };
    Ok(value)
}
