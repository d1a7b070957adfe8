//! # Room Manager
//!
//! Registry of room *type* definitions and live room *instances*. Types
//! are behavior factories keyed by name; creating a room instantiates a
//! fresh behavior, assembles the room and wires its `Destroyed` event to
//! self-removal from the live map.

use crate::broker::Broker;
use crate::error::RoomError;
use crate::events::{RoomEvent, RoomManagerEvent};
use crate::room::{Room, RoomBehavior};
use atrium_protocol::{ProtocolCodec, SchemaRegistry};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Creates one behavior instance per room of the type.
pub type BehaviorFactory = Arc<dyn Fn() -> Arc<dyn RoomBehavior> + Send + Sync>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct RoomManager {
    broker: Arc<Broker>,
    codec: Arc<ProtocolCodec>,
    schemas: Arc<SchemaRegistry>,
    defs: DashMap<String, BehaviorFactory>,
    rooms: DashMap<String, Arc<Room>>,
    events: broadcast::Sender<RoomManagerEvent>,
}

impl RoomManager {
    pub(crate) fn new(
        broker: Arc<Broker>,
        codec: Arc<ProtocolCodec>,
        schemas: Arc<SchemaRegistry>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            broker,
            codec,
            schemas,
            defs: DashMap::new(),
            rooms: DashMap::new(),
            events,
        })
    }

    /// Registered type keys.
    pub fn types(&self) -> Vec<String> {
        self.defs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Ids of the live rooms.
    pub fn ids(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    /// Subscribes to define/create/destroy notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomManagerEvent> {
        self.events.subscribe()
    }

    /// Registers a room type under `key`.
    pub fn define(
        &self,
        key: &str,
        factory: impl Fn() -> Arc<dyn RoomBehavior> + Send + Sync + 'static,
    ) -> Result<(), RoomError> {
        if self.defs.contains_key(key) {
            return Err(RoomError::DuplicateDefinition(key.to_string()));
        }
        self.defs.insert(key.to_string(), Arc::new(factory));
        let _ = self.events.send(RoomManagerEvent::Defined(key.to_string()));
        Ok(())
    }

    /// Creates a live room of a registered type.
    pub async fn create(
        self: &Arc<Self>,
        room_id: &str,
        room_type: &str,
    ) -> Result<Arc<Room>, RoomError> {
        if self.rooms.contains_key(room_id) {
            return Err(RoomError::DuplicateRoomId(room_id.to_string()));
        }
        let factory = self
            .defs
            .get(room_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RoomError::UndefinedType(room_type.to_string()))?;

        let room = Room::assemble(
            room_id.to_string(),
            Some(room_type.to_string()),
            self.broker.clone(),
            self.codec.clone(),
            self.schemas.clone(),
            factory(),
        );
        room.start()?;
        self.rooms.insert(room_id.to_string(), room.clone());
        self.watch_destroy(&room);
        debug!(room = %room_id, r#type = %room_type, "room created");
        let _ = self.events.send(RoomManagerEvent::Created(room_id.to_string()));
        Ok(room)
    }

    /// Destroys a live room and removes it from the map.
    pub async fn destroy(&self, room_id: &str) -> Result<(), RoomError> {
        let (_, room) = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        room.destroy().await;
        let _ = self.events.send(RoomManagerEvent::Destroyed(room_id.to_string()));
        Ok(())
    }

    /// A room destroyed directly (not through the manager) removes itself
    /// from the live map.
    fn watch_destroy(self: &Arc<Self>, room: &Arc<Room>) {
        let mut events = room.subscribe();
        let manager = Arc::downgrade(self);
        let room_id = room.id().to_string();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RoomEvent::Destroyed) => {
                        if let Some(manager) = manager.upgrade() {
                            if manager.rooms.remove(&room_id).is_some() {
                                let _ = manager
                                    .events
                                    .send(RoomManagerEvent::Destroyed(room_id.clone()));
                            }
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl std::fmt::Debug for RoomManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("types", &self.defs.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}
