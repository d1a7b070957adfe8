//! # Transport Layer
//!
//! The authorization entry point and the seam between sockets and rooms.
//! A transport implementation calls [`TransportLayer::authorize`] when a
//! connection presents its ticket, forwards socket bytes through
//! [`TransportLayer::deliver`], subscribes to the outgoing and kick
//! channels, and reports disconnects through [`TransportLayer::leave`].
//! The core never touches sockets.

use crate::auth::AuthMiddleware;
use crate::broker::{Broker, FrameListener, SignalListener};
use crate::error::{RoomError, TransportError};
use crate::id::{generate_actor_id, ID_ATTEMPTS};
use crate::resolver::RoomResolver;
use atrium_protocol::ActorId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Lifecycle contract of a concrete transport (a WebSocket server, an
/// in-process link, a test harness). Everything else happens through the
/// [`TransportLayer`] handle passed to `initialize`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn initialize(&self, layer: Arc<TransportLayer>) -> Result<(), TransportError>;

    async fn dispose(&self) -> Result<(), TransportError>;
}

pub struct TransportLayer {
    broker: Arc<Broker>,
    auth: Arc<dyn AuthMiddleware>,
    resolver: Arc<dyn RoomResolver>,
    connected: DashMap<ActorId, String>,
}

impl TransportLayer {
    pub(crate) fn new(
        broker: Arc<Broker>,
        auth: Arc<dyn AuthMiddleware>,
        resolver: Arc<dyn RoomResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            auth,
            resolver,
            connected: DashMap::new(),
        })
    }

    /// Live connection count across all rooms.
    pub fn connections(&self) -> usize {
        self.connected.len()
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Authorizes a connection: resolves the target room from the ticket,
    /// reserves a unique actor id and delegates admission to the room's
    /// actor manager. Returns the assigned id; the transport must call
    /// [`TransportLayer::synchronize`] once its own setup is done.
    pub async fn authorize(&self, ticket: &str) -> Result<ActorId, TransportError> {
        let room_id = self.auth.get_room_id(ticket).await?;
        let room = self
            .resolver
            .resolve(&room_id)
            .ok_or_else(|| TransportError::RoomNotFound(room_id.clone()))?;
        let actor_id = self.reserve_id()?;
        if let Err(source) = room.actors().authorize(self.auth.as_ref(), actor_id, ticket).await {
            error!(actor = %actor_id, %source, "authorization failed");
            return Err(TransportError::Join {
                actor_id,
                source: Box::new(source),
            });
        }
        self.connected.insert(actor_id, room.id().to_string());
        trace!(actor = %actor_id, room = %room.id(), "actor joined the room");
        Ok(actor_id)
    }

    /// Ships the handshake package to an authorized actor. Unknown ids are
    /// ignored: the connection is already gone.
    pub async fn synchronize(&self, actor_id: ActorId) -> Result<(), RoomError> {
        let Some(room_id) = self.connected.get(&actor_id).map(|entry| entry.value().clone())
        else {
            return Ok(());
        };
        match self.resolver.resolve(&room_id) {
            Some(room) => room.actors().synchronize(actor_id).await,
            None => Ok(()),
        }
    }

    /// Forwards socket bytes into the actor's inbound channel.
    pub async fn deliver(&self, actor_id: ActorId, frame: Vec<u8>) {
        self.broker.deliver(actor_id, frame).await;
    }

    /// Subscribes the transport to frames the room sends to this actor.
    pub fn on_message(&self, actor_id: ActorId, listener: FrameListener) {
        self.broker.on_outgoing(actor_id, listener);
    }

    pub fn off_message(&self, actor_id: ActorId) {
        self.broker.off_outgoing(actor_id);
    }

    /// Subscribes the transport to kick requests for this actor. The
    /// transport is expected to close the socket and then report
    /// [`TransportLayer::leave`].
    pub fn on_kick(&self, actor_id: ActorId, listener: SignalListener) {
        self.broker.on_kick(actor_id, listener);
    }

    pub fn off_kick(&self, actor_id: ActorId) {
        self.broker.off_kick(actor_id);
    }

    /// Reports a closed connection. Emits the leave event toward the room
    /// and tears down every broker channel of the id; no further event
    /// fires for it, and a stale delivery against it is a no-op.
    pub async fn leave(&self, actor_id: ActorId) {
        if let Some((_, room_id)) = self.connected.remove(&actor_id) {
            debug!(actor = %actor_id, room = %room_id, "actor left the room");
        }
        self.broker.leave(actor_id).await;
        self.broker.clear(actor_id);
    }

    fn reserve_id(&self) -> Result<ActorId, TransportError> {
        for _ in 0..ID_ATTEMPTS {
            let candidate = generate_actor_id();
            if candidate.is_root() || self.connected.contains_key(&candidate) {
                continue;
            }
            return Ok(candidate);
        }
        Err(TransportError::IdExhausted)
    }
}

impl std::fmt::Debug for TransportLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLayer")
            .field("connections", &self.connected.len())
            .finish()
    }
}
