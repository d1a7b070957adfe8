//! Client-side protocol session.
//!
//! A [`ClientSession`] is the pure state machine a connecting peer runs:
//! it consumes the server's handshake package, installs the transferred
//! action list and schema layouts into its own codec, produces the echo
//! frame that completes the handshake, and thereafter frames outbound
//! messages and decodes inbound ones. It owns no socket; transports feed
//! it frames and forward what it returns.

use crate::actions::{ActionListError, ActionRepository};
use crate::codec::{CodecError, ProtocolCodec};
use crate::schema::{Schema, SchemaError, SchemaRegistry};
use crate::types::{ActionHash, ActorId, SchemaHash};
use crate::value::Payload;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed prefix of a server-to-client frame: action hash + sender id.
const SERVER_FRAME_PREFIX: usize = 6;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A message frame arrived (or a send was attempted) before the
    /// handshake package.
    #[error("handshake has not completed yet")]
    NotSynced,
    /// The handshake package was decodable but semantically broken.
    #[error("malformed handshake package: {0}")]
    MalformedHandshake(String),
    /// `send` was called with a key the server never registered.
    #[error("server can not accept message key=({0})")]
    UnknownKey(String),
    /// An inbound frame carries a hash outside the transferred action list.
    #[error("unknown action hash=({0})")]
    UnknownAction(ActionHash),
    /// An inbound frame is shorter than its fixed prefix.
    #[error("frame shorter than its fixed prefix")]
    TruncatedFrame,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Actions(#[from] ActionListError),
}

/// What one inbound frame produced.
#[derive(Debug)]
pub enum SessionEvent {
    /// The handshake package arrived. `answer` must be sent back to the
    /// server verbatim to complete the handshake.
    Synced {
        room_id: String,
        actor_id: ActorId,
        answer: Vec<u8>,
    },
    /// A routed application message.
    Message {
        key: String,
        sender: ActorId,
        data: Payload,
    },
}

pub struct ClientSession {
    codec: ProtocolCodec,
    actions: ActionRepository,
    identity: Option<(String, ActorId)>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            codec: ProtocolCodec::new(Arc::new(SchemaRegistry::new())),
            actions: ActionRepository::new(),
            identity: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.identity.is_some()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|(room, _)| room.as_str())
    }

    pub fn actor_id(&self) -> Option<ActorId> {
        self.identity.as_ref().map(|(_, actor)| *actor)
    }

    /// Routing keys the server accepts, in hash order.
    pub fn action_keys(&self) -> Vec<String> {
        self.actions.action_keys()
    }

    /// Consumes one inbound frame. The first frame of a connection must be
    /// the handshake package; every later frame is an application message.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<SessionEvent, SessionError> {
        if self.identity.is_none() {
            return self.handle_sync(frame);
        }
        if frame.len() < SERVER_FRAME_PREFIX {
            return Err(SessionError::TruncatedFrame);
        }
        let hash = ActionHash::from_bytes([frame[0], frame[1]]);
        let key = self
            .actions
            .get_key(hash)
            .ok_or(SessionError::UnknownAction(hash))?
            .to_string();
        let outgoing = self
            .actions
            .get_outgoing(hash)
            .ok_or(SessionError::UnknownAction(hash))?;
        let sender = ActorId::from_bytes([frame[2], frame[3], frame[4], frame[5]]);
        let data = self.codec.decode(outgoing, &frame[SERVER_FRAME_PREFIX..])?;
        Ok(SessionEvent::Message { key, sender, data })
    }

    fn handle_sync(&mut self, frame: &[u8]) -> Result<SessionEvent, SessionError> {
        let package = self.codec.decode(SchemaRegistry::SYNC, frame)?;
        let room_id = package
            .str("roomId")
            .ok_or_else(|| SessionError::MalformedHandshake("roomId missing".into()))?
            .to_string();
        let actor_id: ActorId = package
            .str("actorId")
            .unwrap_or_default()
            .parse()
            .map_err(|_| SessionError::MalformedHandshake("actorId is not an id".into()))?;
        let action_list = package
            .str_array("actions")
            .ok_or_else(|| SessionError::MalformedHandshake("action list missing".into()))?
            .to_vec();
        let schema_json = package
            .str("schemas")
            .ok_or_else(|| SessionError::MalformedHandshake("schema list missing".into()))?;

        self.actions.load_list(&action_list)?;
        for (hash, fields) in parse_schema_list(schema_json)? {
            self.codec.add_schema(hash, fields)?;
        }

        let answer = self.codec.encode(
            SchemaRegistry::SYNC,
            &Payload::new().with("actorId", actor_id.to_string()),
        )?;
        debug!(room = %room_id, actor = %actor_id, "handshake package applied");
        self.identity = Some((room_id.clone(), actor_id));
        Ok(SessionEvent::Synced {
            room_id,
            actor_id,
            answer,
        })
    }

    /// Frames an outbound message: `[2-byte action hash][payload]`.
    pub fn encode_message(&self, key: &str, data: &Payload) -> Result<Vec<u8>, SessionError> {
        if self.identity.is_none() {
            return Err(SessionError::NotSynced);
        }
        let hash = match self.actions.get_hash(key) {
            Some(hash) => hash,
            None => {
                warn!(%key, "send fail: server can not accept this message key");
                return Err(SessionError::UnknownKey(key.to_string()));
            }
        };
        let incoming = self
            .actions
            .get_incoming(hash)
            .ok_or_else(|| SessionError::UnknownKey(key.to_string()))?;
        let payload = self.codec.encode(incoming, data)?;
        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.extend_from_slice(&hash.to_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("identity", &self.identity)
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Parses the handshake's JSON-encoded schema list:
/// `[["0002", {"field": "uint32", ...}], ...]`.
fn parse_schema_list(
    json: &str,
) -> Result<Vec<(SchemaHash, Vec<(String, crate::schema::FieldType)>)>, SessionError> {
    let value: JsonValue = serde_json::from_str(json)
        .map_err(|error| SessionError::MalformedHandshake(error.to_string()))?;
    let entries = value
        .as_array()
        .ok_or_else(|| SessionError::MalformedHandshake("schema list is not an array".into()))?;
    let mut schemas = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = entry
            .as_array()
            .filter(|pair| pair.len() == 2)
            .ok_or_else(|| {
                SessionError::MalformedHandshake("schema entry is not a [hash, layout] pair".into())
            })?;
        let hash: SchemaHash = pair[0]
            .as_str()
            .unwrap_or_default()
            .parse()
            .map_err(|_| SessionError::MalformedHandshake("schema hash is not valid".into()))?;
        let fields = Schema::layout_from_json(&pair[1])?;
        schemas.push((hash, fields));
    }
    Ok(schemas)
}
