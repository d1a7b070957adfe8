//! # Instance Sync Router
//!
//! The registry-side endpoint of the instance synchronization protocol.
//! Instances connect to the registry room as actors and push state
//! snapshots to the `sync.instance` action; the router replaces that
//! instance's record wholesale on every push and drops it when the actor
//! leaves. A fresh random session token is taken on every mutation - it is
//! a cheap "did anything change" marker for the read side, not a content
//! hash.
//!
//! The registry commands rooms on an instance by sending a
//! create/destroy frame back to that instance's actor. Commands are
//! validated against the registry's current view; a stale view fails here
//! with a descriptive error and is not retried.

use crate::error::RegistryError;
use crate::schemas::RegistrySchemas;
use atrium_core::{Actor, Room, RoomEvent, Router, SetupError, SubRouter};
use atrium_protocol::{ActorId, Payload};
use dashmap::DashMap;
use serde::Serialize;
use std::any::Any;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Mount key of the sync router on the registry room.
pub const SYNC_ROUTER_KEY: &str = "sync";
/// Absolute action key carrying both snapshot pushes and commands.
pub const INSTANCE_TOPIC: &str = "sync.instance";

const INSTANCE_ACTION: &str = "instance";

/// One room hosted on a registered instance.
#[derive(Debug, Clone, Serialize)]
pub struct RoomRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: String,
    pub connections: u32,
}

/// The registry's record of one connected instance, replaced wholesale on
/// every snapshot push.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord {
    pub id: ActorId,
    pub name: String,
    pub namespace: String,
    pub types: Vec<String>,
    pub rooms: Vec<RoomRecord>,
    #[serde(rename = "endpointUrl")]
    pub endpoint_url: String,
    /// Sum of the room connection counts, derived at push time.
    pub connections: u32,
}

struct SyncState {
    schemas: RegistrySchemas,
    instances: DashMap<ActorId, InstanceRecord>,
    session: RwLock<String>,
    topic: OnceLock<String>,
}

impl SyncState {
    fn refresh_session(&self) {
        let token = new_session_token();
        *self.session.write().expect("session token poisoned") = token;
    }

    fn apply_update(&self, sender: &Actor, data: &Payload) -> Result<(), serde_json::Error> {
        let name = data.str("name").unwrap_or_default().to_string();
        let namespace = data.str("namespace").unwrap_or_default().to_string();
        let types = data.str_array("types").unwrap_or_default().to_vec();
        let endpoint_url = data.str("endpointUrl").unwrap_or_default().to_string();

        let mut rooms = Vec::new();
        let mut connections = 0;
        for entry in data.str_array("rooms").unwrap_or_default() {
            // Each room travels as a JSON array: [id, type, connections].
            let (id, room_type, room_connections): (String, String, u32) =
                serde_json::from_str(entry)?;
            connections += room_connections;
            rooms.push(RoomRecord {
                id,
                room_type,
                connections: room_connections,
            });
        }
        debug!(instance = %sender.id(), %name, rooms = rooms.len(), "instance sync data");
        self.instances.insert(
            sender.id(),
            InstanceRecord {
                id: sender.id(),
                name,
                namespace,
                types,
                rooms,
                endpoint_url,
                connections,
            },
        );
        self.refresh_session();
        Ok(())
    }

    fn remove(&self, actor_id: ActorId) {
        if self.instances.remove(&actor_id).is_some() {
            debug!(instance = %actor_id, "instance removed");
            self.refresh_session();
        }
    }
}

/// Stateful sub-router accumulating the fleet view. Cheap to clone; all
/// clones share the same state.
#[derive(Clone)]
pub struct SyncRouter {
    state: Arc<SyncState>,
}

impl SyncRouter {
    pub fn new(schemas: RegistrySchemas) -> Self {
        Self {
            state: Arc::new(SyncState {
                schemas,
                instances: DashMap::new(),
                session: RwLock::new(new_session_token()),
                topic: OnceLock::new(),
            }),
        }
    }

    /// The current session token. Changes on every fleet mutation.
    pub fn session(&self) -> String {
        self.state
            .session
            .read()
            .expect("session token poisoned")
            .clone()
    }

    pub fn instances(&self) -> Vec<InstanceRecord> {
        self.state
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_instance(&self, instance_id: ActorId) -> Option<InstanceRecord> {
        self.state
            .instances
            .get(&instance_id)
            .map(|entry| entry.value().clone())
    }

    /// Commands an instance to create a room. Validated against the
    /// current fleet view before anything is sent.
    pub async fn create(
        &self,
        room: &Arc<Room>,
        instance_id: ActorId,
        room_id: &str,
        room_type: &str,
    ) -> Result<(), RegistryError> {
        let actor = room
            .actors()
            .get(instance_id)
            .ok_or(RegistryError::UnknownInstance(instance_id))?;
        let record = self
            .get_instance(instance_id)
            .ok_or(RegistryError::UnknownInstance(instance_id))?;
        if record.rooms.iter().any(|entry| entry.id == room_id) {
            return Err(RegistryError::DuplicateRoom {
                instance: instance_id,
                room: room_id.to_string(),
            });
        }
        if !record.types.iter().any(|entry| entry == room_type) {
            return Err(RegistryError::UnsupportedType {
                instance: instance_id,
                room_type: room_type.to_string(),
            });
        }
        let topic = self.topic()?;
        room.send(
            &actor,
            &topic,
            &Payload::new()
                .with("command", "create")
                .with("roomId", room_id)
                .with("type", room_type),
            None,
        )
        .await?;
        Ok(())
    }

    /// Commands an instance to destroy one of its rooms.
    pub async fn destroy(
        &self,
        room: &Arc<Room>,
        instance_id: ActorId,
        room_id: &str,
    ) -> Result<(), RegistryError> {
        let actor = room
            .actors()
            .get(instance_id)
            .ok_or(RegistryError::UnknownInstance(instance_id))?;
        let record = self
            .get_instance(instance_id)
            .ok_or(RegistryError::UnknownInstance(instance_id))?;
        if !record.rooms.iter().any(|entry| entry.id == room_id) {
            return Err(RegistryError::UnknownRoom {
                instance: instance_id,
                room: room_id.to_string(),
            });
        }
        let topic = self.topic()?;
        room.send(
            &actor,
            &topic,
            &Payload::new()
                .with("command", "destroy")
                .with("roomId", room_id),
            None,
        )
        .await?;
        Ok(())
    }

    fn topic(&self) -> Result<String, RegistryError> {
        self.state
            .topic
            .get()
            .cloned()
            .ok_or(RegistryError::SyncRouterMissing)
    }
}

impl SubRouter for SyncRouter {
    fn setup(&self, room: &Arc<Room>, router: &Router) -> Result<(), SetupError> {
        let topic = router.topic(INSTANCE_ACTION);
        self.state
            .topic
            .set(topic.clone())
            .map_err(|_| SetupError::DuplicateRouter(topic))?;

        let state = self.state.clone();
        router.listen(
            INSTANCE_ACTION,
            self.state.schemas.instance_update,
            Some(self.state.schemas.instance_command),
            move |_room, sender, _key, data| {
                let state = state.clone();
                async move {
                    state.apply_update(&sender, &data)?;
                    Ok(())
                }
            },
        )?;

        // Departing instances drop out of the fleet view.
        let state = self.state.clone();
        let mut events = room.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RoomEvent::Left(actor)) => state.remove(actor.id()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync router lagged behind room events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for SyncRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRouter")
            .field("instances", &self.state.instances.len())
            .finish()
    }
}

fn new_session_token() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}
