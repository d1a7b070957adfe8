//! Lifecycle event enums carried over `tokio::sync::broadcast` channels.
//!
//! Events are advisory: a consumer that falls behind the channel capacity
//! loses the oldest events (`RecvError::Lagged`) rather than slowing the
//! emitting room down.

use crate::actor::Actor;
use atrium_protocol::Payload;

/// Events emitted by a [`Room`](crate::Room) over its lifetime.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The room finished its deferred creation hook.
    Created,
    /// The room was torn down; actors have been kicked.
    Destroyed,
    /// An actor completed the sync handshake and is active.
    Joined(Actor),
    /// An actor's connection ended.
    Left(Actor),
    /// A routed message arrived from an actor, emitted before the bound
    /// listener runs.
    Message {
        actor: Actor,
        key: String,
        data: Payload,
    },
    /// Periodic tick for game-loop style consumers.
    Update,
}

/// Events emitted by a [`RoomManager`](crate::RoomManager).
#[derive(Debug, Clone)]
pub enum RoomManagerEvent {
    /// A room type definition was registered.
    Defined(String),
    /// A room instance was created.
    Created(String),
    /// A room instance was destroyed and removed.
    Destroyed(String),
}

/// Events emitted by a [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Run,
    Shutdown,
}
