//! Error types, grouped by the boundary they surface at.
//!
//! Protocol violations end the offending connection and never escape the
//! room. Setup errors are raised synchronously while routes and rooms are
//! being defined, before traffic flows. Auth and transport errors reject
//! connection attempts. Delivery errors surface to the caller of
//! `send`/`broadcast` and leave the room alive.

use atrium_protocol::{ActionHash, ActorId, CodecError};
use thiserror::Error;

/// Rejection of a connection attempt by the auth middleware.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("ticket rejected: {0}")]
    InvalidTicket(String),
    #[error("identity extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Configuration mistakes caught while a room type is being set up.
/// Fatal to the setup call; nothing here is reachable once traffic flows.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid key=({0})")]
    InvalidKey(String),
    #[error("router key=({0}) is already registered")]
    DuplicateRouter(String),
    #[error("topic=({0}) is already registered")]
    DuplicateListener(String),
    #[error("topic=({topic}) schema hash=({hash}) does not exist")]
    UnknownSchema {
        topic: String,
        hash: atrium_protocol::SchemaHash,
    },
    #[error("action hash space exhausted")]
    ActionSpaceExhausted,
}

/// A malformed or unroutable inbound frame. Always answered by kicking
/// the sending actor; never crashes the room.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame shorter than the action hash prefix")]
    TruncatedFrame,
    #[error("invalid message key hash=({0})")]
    InvalidMessageKey(ActionHash),
    #[error("incoming message format is not valid for hash=({0})")]
    InvalidMessageFormat(ActionHash),
    #[error("error on deserialization")]
    Deserialize(#[source] CodecError),
    #[error("client to server sync decode failed")]
    SyncDecode(#[source] CodecError),
    #[error("sync answer does not carry an actor id")]
    SyncMismatch,
    #[error("listener key=({0}) is not registered")]
    ListenerNotRegistered(String),
    #[error("listener key=({key}) failed")]
    Listener {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Encoding failure on an outbound send or broadcast. Surfaced to the
/// caller; the room stays alive.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("key=({0}) does not exist")]
    UnknownKey(String),
    #[error("output schema missing for key=({0})")]
    MissingOutputSchema(String),
    #[error("message serialization failed for topic=({topic})")]
    Serialization {
        topic: String,
        #[source]
        source: CodecError,
    },
}

/// Room lifecycle and actor admission failures.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("actor id=({actor}) already exists inside room id=({room})")]
    ActorExists { actor: ActorId, room: String },
    #[error("sync error: actor id=({0}) does not exist")]
    ActorNotFound(ActorId),
    #[error("room define error: definition key=({0}) exists")]
    DuplicateDefinition(String),
    #[error("room create error: room id=({0}) is taken")]
    DuplicateRoomId(String),
    #[error("room create error: type=({0}) is not defined")]
    UndefinedType(String),
    #[error("room destroy error: room id=({0}) does not exist")]
    RoomNotFound(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake package could not be built")]
    SyncPackage(#[source] CodecError),
}

/// Failures at the transport boundary: connection authorization and
/// transport lifecycle. Logged and surfaced to the transport; never
/// propagates into room state.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("room id=({0}) does not exist")]
    RoomNotFound(String),
    #[error("can not reserve a unique id for the actor")]
    IdExhausted,
    #[error("actor id=({actor_id}) can not join the room")]
    Join {
        actor_id: ActorId,
        #[source]
        source: Box<RoomError>,
    },
    #[error("transport failure: {0}")]
    Failure(String),
}
