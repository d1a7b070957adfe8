//! # Protocol Identifier Types
//!
//! Small fixed-width identifiers that travel on the wire. Every identifier
//! has a canonical lowercase hex text form (used in handshake action lists
//! and registry snapshots) and a fixed-width big-endian byte form (used in
//! message frames).
//!
//! - [`ActionHash`] - 2 bytes / 4 hex digits, prefixes every application frame
//! - [`SchemaHash`] - 2 bytes / 4 hex digits, names a field layout
//! - [`ActorId`] - 4 bytes / 8 hex digits, identifies a room participant

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error raised when parsing an identifier from its hex text form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    /// The text form has the wrong number of hex digits.
    #[error("expected {expected} hex digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    /// The text form contains a non-hex character.
    #[error("invalid hex digit in identifier")]
    InvalidDigit,
}

fn parse_fixed_hex(s: &str, digits: usize) -> Result<u64, IdParseError> {
    if s.len() != digits {
        return Err(IdParseError::InvalidLength {
            expected: digits,
            actual: s.len(),
        });
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IdParseError::InvalidDigit);
    }
    u64::from_str_radix(s, 16).map_err(|_| IdParseError::InvalidDigit)
}

/// Identifies a registered action route inside a single room.
///
/// Hashes are allocated from a per-room monotonically increasing counter,
/// so a fixed registration sequence always yields the same hashes. The
/// 2-byte value is the leading prefix of every application frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionHash(pub u16);

impl ActionHash {
    /// Big-endian byte form used as the frame prefix.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl fmt::Display for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for ActionHash {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s, 4).map(|v| Self(v as u16))
    }
}

/// Identifies a field layout in a [`SchemaRegistry`](crate::SchemaRegistry).
///
/// Assigned once per process lifetime and distributed to clients through
/// the handshake package; never persisted across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaHash(pub u16);

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for SchemaHash {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s, 4).map(|v| Self(v as u16))
    }
}

impl Serialize for SchemaHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Identifies one connected, authorized participant of a room.
///
/// Ids are unique per transport layer at any instant. The all-zero value is
/// the reserved [root sentinel](ActorId::ROOT) used as the default sender
/// for server-originated messages; it is never issued to a real connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId([u8; 4]);

impl ActorId {
    /// The reserved synthetic root actor id (`00000000`).
    pub const ROOT: ActorId = ActorId([0; 4]);

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Byte form embedded in outbound frames as the sender prefix.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ActorId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_fixed_hex(s, 8)? as u32;
        Ok(Self(value.to_be_bytes()))
    }
}

impl Serialize for ActorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_hash_text_round_trip() {
        let hash = ActionHash(0x01ff);
        assert_eq!(hash.to_string(), "01ff");
        assert_eq!("01ff".parse::<ActionHash>().unwrap(), hash);
        assert_eq!(hash.to_bytes(), [0x01, 0xff]);
    }

    #[test]
    fn actor_id_text_round_trip() {
        let id = ActorId::from_bytes([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.to_string(), "deadbeef");
        assert_eq!("deadbeef".parse::<ActorId>().unwrap(), id);
        assert!(!id.is_root());
        assert!(ActorId::ROOT.is_root());
        assert_eq!(ActorId::ROOT.to_string(), "00000000");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            "abc".parse::<ActionHash>(),
            Err(IdParseError::InvalidLength { .. })
        ));
        assert!(matches!(
            "zzzzzzzz".parse::<ActorId>(),
            Err(IdParseError::InvalidDigit)
        ));
    }
}
