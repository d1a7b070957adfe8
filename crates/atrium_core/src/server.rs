//! # Server Assembly
//!
//! Wires the pieces into a running instance: one schema registry and
//! codec, one broker, one transport layer over a room-manager-backed
//! resolver, and the configured transports. [`create_room`] is the
//! single-room variant used by processes that host exactly one well-known
//! room, like the instance registry.

use crate::auth::AuthMiddleware;
use crate::broker::Broker;
use crate::error::{RoomError, TransportError};
use crate::events::ServerEvent;
use crate::id::generate_name;
use crate::resolver::{DefaultRoomResolver, RoomResolver};
use crate::room::{Room, RoomBehavior};
use crate::rooms::RoomManager;
use crate::transport::{Transport, TransportLayer};
use atrium_protocol::{ProtocolCodec, SchemaRegistry};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tracing::info;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Construction-time configuration of a [`Server`].
pub struct ServerConfig {
    /// Instance name; generated when not given.
    pub name: Option<String>,
    /// The authorization capability for every connection.
    pub auth: Arc<dyn AuthMiddleware>,
    /// Concrete transports to initialize on [`Server::run`].
    pub transports: Vec<Arc<dyn Transport>>,
}

/// A room-hosting server instance.
pub struct Server {
    name: String,
    schemas: Arc<SchemaRegistry>,
    layer: Arc<TransportLayer>,
    rooms: Arc<RoomManager>,
    transports: Vec<Arc<dyn Transport>>,
    events: broadcast::Sender<ServerEvent>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_schemas(config, Arc::new(SchemaRegistry::new()))
    }

    /// Builds a server over an existing schema registry, for callers that
    /// define schemas before assembly.
    pub fn with_schemas(config: ServerConfig, schemas: Arc<SchemaRegistry>) -> Self {
        let name = config.name.unwrap_or_else(generate_name);
        let codec = Arc::new(ProtocolCodec::new(schemas.clone()));
        let broker = Broker::new();
        let rooms = RoomManager::new(broker.clone(), codec, schemas.clone());
        let resolver: Arc<dyn RoomResolver> = Arc::new(DefaultRoomResolver::new(rooms.clone()));
        let layer = TransportLayer::new(broker, config.auth, resolver);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name,
            schemas,
            layer,
            rooms,
            transports: config.transports,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn transport_layer(&self) -> &Arc<TransportLayer> {
        &self.layer
    }

    pub fn connections(&self) -> usize {
        self.layer.connections()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Initializes every configured transport and opens for traffic.
    pub async fn run(&self) -> Result<(), TransportError> {
        for transport in &self.transports {
            transport.initialize(self.layer.clone()).await?;
        }
        info!(name = %self.name, "started");
        let _ = self.events.send(ServerEvent::Run);
        Ok(())
    }

    /// Disposes every transport. Live rooms stay up until destroyed.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        for transport in &self.transports {
            transport.dispose().await?;
        }
        info!(name = %self.name, "terminated");
        let _ = self.events.send(ServerEvent::Shutdown);
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("connections", &self.layer.connections())
            .finish()
    }
}

struct SingleRoomResolver {
    room: OnceLock<Arc<Room>>,
}

impl RoomResolver for SingleRoomResolver {
    fn resolve(&self, _room_id: &str) -> Option<Arc<Room>> {
        self.room.get().cloned()
    }
}

/// Assembles a standalone room with its own transport layer. Every
/// authorized ticket resolves to this single room, whatever room id the
/// auth middleware reports.
pub async fn create_room(
    room_id: &str,
    auth: Arc<dyn AuthMiddleware>,
    transports: &[Arc<dyn Transport>],
    schemas: Arc<SchemaRegistry>,
    behavior: Arc<dyn RoomBehavior>,
) -> Result<(Arc<Room>, Arc<TransportLayer>), RoomError> {
    let codec = Arc::new(ProtocolCodec::new(schemas.clone()));
    let broker = Broker::new();
    let resolver = Arc::new(SingleRoomResolver {
        room: OnceLock::new(),
    });
    let layer = TransportLayer::new(broker.clone(), auth, resolver.clone());

    let room = Room::assemble(room_id.to_string(), None, broker, codec, schemas, behavior);
    resolver.room.set(room.clone()).ok();
    room.start()?;

    for transport in transports {
        transport.initialize(layer.clone()).await?;
    }
    Ok((room, layer))
}
