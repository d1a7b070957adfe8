//! Bidirectional routing-key / action-hash / schema mapping.
//!
//! Every registered action binds a dotted routing key to a 2-byte hash and
//! a pair of schema hashes (incoming, outgoing). The repository snapshots
//! to a compact line format (`hash,key,incoming,outgoing`) that travels
//! inside the handshake package, letting a client self-configure its codec
//! without out-of-band schema distribution.

use crate::types::{ActionHash, SchemaHash};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Error raised while loading a transferred action list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionListError {
    #[error("malformed action entry=({0})")]
    MalformedEntry(String),
}

#[derive(Debug, Clone, Default)]
pub struct ActionRepository {
    // BTreeMap keeps snapshot order == hash allocation order.
    keys: BTreeMap<ActionHash, String>,
    incoming: HashMap<ActionHash, SchemaHash>,
    outgoing: HashMap<ActionHash, SchemaHash>,
    hashes: HashMap<String, ActionHash>,
    schemas: BTreeSet<SchemaHash>,
}

impl ActionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action. Re-registering a hash is last-write-wins; the
    /// router prevents duplicate keys before this is reached.
    pub fn register(
        &mut self,
        hash: ActionHash,
        key: impl Into<String>,
        incoming: SchemaHash,
        outgoing: SchemaHash,
    ) {
        let key = key.into();
        self.keys.insert(hash, key.clone());
        self.incoming.insert(hash, incoming);
        self.outgoing.insert(hash, outgoing);
        self.hashes.insert(key, hash);
        self.schemas.insert(incoming);
        self.schemas.insert(outgoing);
    }

    pub fn get_key(&self, hash: ActionHash) -> Option<&str> {
        self.keys.get(&hash).map(String::as_str)
    }

    pub fn get_hash(&self, key: &str) -> Option<ActionHash> {
        self.hashes.get(key).copied()
    }

    pub fn get_incoming(&self, hash: ActionHash) -> Option<SchemaHash> {
        self.incoming.get(&hash).copied()
    }

    pub fn get_outgoing(&self, hash: ActionHash) -> Option<SchemaHash> {
        self.outgoing.get(&hash).copied()
    }

    /// Every registered routing key, in hash order.
    pub fn action_keys(&self) -> Vec<String> {
        self.keys.values().cloned().collect()
    }

    /// Every schema hash referenced by any registered action, deduplicated.
    pub fn schema_list(&self) -> Vec<SchemaHash> {
        self.schemas.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Snapshots the repository as transfer lines, one per action.
    pub fn get_list(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|(hash, key)| {
                let incoming = self.incoming.get(hash).copied().unwrap_or(SchemaHash(0));
                let outgoing = self.outgoing.get(hash).copied().unwrap_or(SchemaHash(0));
                format!("{hash},{key},{incoming},{outgoing}")
            })
            .collect()
    }

    /// Replaces the whole repository with a transferred snapshot. Used only
    /// on the client side of the handshake.
    pub fn load_list(&mut self, list: &[String]) -> Result<(), ActionListError> {
        let mut loaded = ActionRepository::new();
        for entry in list {
            let mut parts = entry.split(',');
            let (hash, key, incoming, outgoing) = match (
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
            ) {
                (Some(hash), Some(key), Some(incoming), Some(outgoing), None) => {
                    (hash, key, incoming, outgoing)
                }
                _ => return Err(ActionListError::MalformedEntry(entry.clone())),
            };
            let hash: ActionHash = hash
                .parse()
                .map_err(|_| ActionListError::MalformedEntry(entry.clone()))?;
            let incoming: SchemaHash = incoming
                .parse()
                .map_err(|_| ActionListError::MalformedEntry(entry.clone()))?;
            let outgoing: SchemaHash = outgoing
                .parse()
                .map_err(|_| ActionListError::MalformedEntry(entry.clone()))?;
            loaded.register(hash, key, incoming, outgoing);
        }
        *self = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_return_none_on_miss() {
        let repo = ActionRepository::new();
        assert_eq!(repo.get_key(ActionHash(1)), None);
        assert_eq!(repo.get_hash("chat.message"), None);
        assert_eq!(repo.get_incoming(ActionHash(1)), None);
        assert_eq!(repo.get_outgoing(ActionHash(1)), None);
    }

    #[test]
    fn list_round_trip() {
        let mut repo = ActionRepository::new();
        repo.register(ActionHash(1), "chat.message", SchemaHash(2), SchemaHash(3));
        repo.register(ActionHash(2), "chat.join", SchemaHash(0), SchemaHash(2));
        let list = repo.get_list();
        assert_eq!(
            list,
            vec![
                "0001,chat.message,0002,0003".to_string(),
                "0002,chat.join,0000,0002".to_string(),
            ]
        );

        let mut other = ActionRepository::new();
        other.register(ActionHash(9), "stale", SchemaHash(9), SchemaHash(9));
        other.load_list(&list).unwrap();
        assert_eq!(other.get_hash("stale"), None);
        assert_eq!(other.get_key(ActionHash(1)), Some("chat.message"));
        assert_eq!(other.get_incoming(ActionHash(2)), Some(SchemaHash(0)));
        assert_eq!(other.schema_list(), vec![SchemaHash(0), SchemaHash(2), SchemaHash(3)]);
    }

    #[test]
    fn malformed_entries_leave_repository_untouched() {
        let mut repo = ActionRepository::new();
        repo.register(ActionHash(1), "keep.me", SchemaHash(0), SchemaHash(0));
        let result = repo.load_list(&["0001,missing.parts".to_string()]);
        assert!(matches!(result, Err(ActionListError::MalformedEntry(_))));
        assert_eq!(repo.get_key(ActionHash(1)), Some("keep.me"));
    }

    #[test]
    fn reregistering_a_hash_is_last_write_wins() {
        let mut repo = ActionRepository::new();
        repo.register(ActionHash(1), "first", SchemaHash(0), SchemaHash(0));
        repo.register(ActionHash(1), "second", SchemaHash(2), SchemaHash(2));
        assert_eq!(repo.get_key(ActionHash(1)), Some("second"));
        assert_eq!(repo.get_hash("second"), Some(ActionHash(1)));
        assert_eq!(repo.get_incoming(ActionHash(1)), Some(SchemaHash(2)));
    }
}
