//! # Atrium Core
//!
//! The room runtime of the Atrium realtime server framework. Actors
//! (connected clients) join rooms; rooms route schema-coded binary
//! messages through a hierarchical action router and fan events out to
//! subscribers. A transport broker decouples all of it from whatever
//! owns the sockets.
//!
//! ## Control flow
//!
//! ```text
//! transport -> TransportLayer::authorize -> RoomResolver
//!           -> ActorManager::authorize (auth middleware extracts identity)
//!           -> handshake sync package -> client echo
//!           -> ActorManager binds inbound messages
//!           -> DataOperator decodes -> Router listener
//!           -> Room::send / Room::broadcast -> Broker -> transport
//! ```
//!
//! Everything is single-logical-loop per actor: one inbound channel,
//! handled in arrival order. Concurrency is I/O-driven task scheduling -
//! the authorization's identity extraction and the per-receiver broadcast
//! filters are the only suspension points in the hot path.
//!
//! Pluggable capabilities at the boundary: [`AuthMiddleware`] (ticket
//! verification and identity extraction), [`RoomResolver`] (room lookup)
//! and [`Transport`] (socket lifecycle).

mod actor;
mod actors;
mod auth;
mod broker;
mod error;
mod events;
mod id;
mod operator;
mod resolver;
mod room;
mod rooms;
mod router;
mod server;
mod transport;

pub use actor::Actor;
pub use actors::ActorManager;
pub use auth::AuthMiddleware;
pub use broker::{Broker, FrameListener, SignalListener};
pub use error::{
    AuthError, DeliveryError, ProtocolError, RoomError, SetupError, TransportError,
};
pub use events::{RoomEvent, RoomManagerEvent, ServerEvent};
pub use resolver::{DefaultRoomResolver, RoomResolver};
pub use room::{
    BroadcastFilter, Room, RoomBehavior, DEFAULT_TICK_INTERVAL,
};
pub use rooms::{BehaviorFactory, RoomManager};
pub use router::{ListenerResult, MessageListener, Router, SubRouter};
pub use server::{create_room, Server, ServerConfig};
pub use transport::{Transport, TransportLayer};

// The protocol types appear throughout the public API; re-export them so
// integrators depend on one crate.
pub use atrium_protocol::{
    ActionHash, ActorId, ClientSession, FieldType, Payload, ProtocolCodec, ScalarType,
    SchemaHash, SchemaRegistry, SessionEvent, Value,
};
