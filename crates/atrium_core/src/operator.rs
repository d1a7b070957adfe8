//! # Data Operator
//!
//! Per-room frame plumbing: builds the handshake sync package, splits
//! inbound frames into routing key and payload, builds outbound frames and
//! dispatches decoded messages to the bound listener.

use crate::actor::Actor;
use crate::error::{DeliveryError, ProtocolError, RoomError};
use crate::room::Room;
use crate::router::{Router, RouterShared};
use atrium_protocol::{ActionHash, ActorId, Payload, ProtocolCodec, SchemaRegistry};
use serde_json::json;
use std::sync::Arc;

/// Fixed prefix of a client-to-server frame: the 2-byte action hash.
const ACTION_PREFIX: usize = 2;

pub(crate) struct DataOperator {
    room_id: String,
    codec: Arc<ProtocolCodec>,
    shared: Arc<RouterShared>,
}

impl DataOperator {
    pub(crate) fn new(
        room_id: String,
        codec: Arc<ProtocolCodec>,
        shared: Arc<RouterShared>,
    ) -> Self {
        Self {
            room_id,
            codec,
            shared,
        }
    }

    /// Builds the handshake package for an actor: the full action list
    /// plus every schema any action references, JSON-encoded, under the
    /// well-known sync schema.
    pub(crate) fn create_sync_package(&self, actor_id: ActorId) -> Result<Vec<u8>, RoomError> {
        let (action_list, schema_hashes) = {
            let actions = self.shared.actions.read().expect("action repository poisoned");
            (actions.get_list(), actions.schema_list())
        };
        let mut schema_entries = Vec::with_capacity(schema_hashes.len());
        for hash in schema_hashes {
            if let Some(schema) = self.shared.schemas.get(hash) {
                schema_entries.push(json!([hash.to_string(), schema.layout_json()]));
            }
        }
        self.codec
            .encode(
                SchemaRegistry::SYNC,
                &Payload::new()
                    .with("roomId", self.room_id.as_str())
                    .with("actorId", actor_id.to_string())
                    .with("actions", action_list)
                    .with("schemas", json!(schema_entries).to_string()),
            )
            .map_err(RoomError::SyncPackage)
    }

    /// Decodes a handshake-completion frame and extracts the echoed id.
    pub(crate) fn decode_sync_package(&self, frame: &[u8]) -> Result<ActorId, ProtocolError> {
        let package = self
            .codec
            .decode(SchemaRegistry::SYNC, frame)
            .map_err(ProtocolError::SyncDecode)?;
        package
            .str("actorId")
            .unwrap_or_default()
            .parse()
            .map_err(|_| ProtocolError::SyncMismatch)
    }

    fn frame_hash(frame: &[u8]) -> Result<ActionHash, ProtocolError> {
        if frame.len() < ACTION_PREFIX {
            return Err(ProtocolError::TruncatedFrame);
        }
        Ok(ActionHash::from_bytes([frame[0], frame[1]]))
    }

    /// Resolves an inbound frame's action hash to its routing key.
    pub(crate) fn package_key(&self, frame: &[u8]) -> Result<String, ProtocolError> {
        let hash = Self::frame_hash(frame)?;
        let actions = self.shared.actions.read().expect("action repository poisoned");
        actions
            .get_key(hash)
            .map(str::to_string)
            .ok_or(ProtocolError::InvalidMessageKey(hash))
    }

    /// Decodes an inbound frame's payload against its incoming schema.
    pub(crate) fn package_data(&self, frame: &[u8]) -> Result<Payload, ProtocolError> {
        let hash = Self::frame_hash(frame)?;
        let incoming = {
            let actions = self.shared.actions.read().expect("action repository poisoned");
            actions
                .get_incoming(hash)
                .ok_or(ProtocolError::InvalidMessageFormat(hash))?
        };
        self.codec
            .decode(incoming, &frame[ACTION_PREFIX..])
            .map_err(ProtocolError::Deserialize)
    }

    /// Builds an outbound frame:
    /// `[2-byte action hash][4-byte sender id][payload]`.
    pub(crate) fn message_to_buffer(
        &self,
        sender: ActorId,
        key: &str,
        data: &Payload,
    ) -> Result<Vec<u8>, DeliveryError> {
        let (hash, outgoing) = {
            let actions = self.shared.actions.read().expect("action repository poisoned");
            let hash = actions
                .get_hash(key)
                .ok_or_else(|| DeliveryError::UnknownKey(key.to_string()))?;
            let outgoing = actions
                .get_outgoing(hash)
                .ok_or_else(|| DeliveryError::MissingOutputSchema(key.to_string()))?;
            (hash, outgoing)
        };
        let payload = self
            .codec
            .encode(outgoing, data)
            .map_err(|source| DeliveryError::Serialization {
                topic: key.to_string(),
                source,
            })?;
        let mut frame = Vec::with_capacity(ACTION_PREFIX + 4 + payload.len());
        frame.extend_from_slice(&hash.to_bytes());
        frame.extend_from_slice(sender.as_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Invokes the listener bound to `key`. Listener failures are wrapped
    /// and propagate to the caller, which kicks the offending actor; they
    /// never crash the room.
    pub(crate) async fn invoke_listener(
        &self,
        room: Arc<Room>,
        actor: Actor,
        key: &str,
        data: Payload,
    ) -> Result<(), ProtocolError> {
        let listener = Router::root(self.shared.clone())
            .get_listener(key)
            .ok_or_else(|| ProtocolError::ListenerNotRegistered(key.to_string()))?;
        listener(room, actor, key.to_string(), data)
            .await
            .map_err(|source| ProtocolError::Listener {
                key: key.to_string(),
                source,
            })
    }

    pub(crate) fn shared(&self) -> &Arc<RouterShared> {
        &self.shared
    }
}

impl std::fmt::Debug for DataOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataOperator")
            .field("room_id", &self.room_id)
            .finish()
    }
}
