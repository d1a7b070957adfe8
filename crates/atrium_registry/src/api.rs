//! # Registry API
//!
//! The queryable, flattened view of the fleet consumed by the HTTP
//! collaborator. Rebuilt lazily: every read compares the sync router's
//! session token against the cached one and only recomputes when the
//! fleet actually mutated. All view records serialize to the collaborator
//! wire shapes.

use crate::error::RegistryError;
use crate::sync_router::{SyncRouter, SYNC_ROUTER_KEY};
use atrium_core::Room;
use atrium_protocol::ActorId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// One room somewhere in the fleet, with its owning instance attached.
#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: String,
    pub connections: u32,
    pub instance: ActorId,
    #[serde(rename = "endpointUrl")]
    pub endpoint_url: String,
}

/// One registered instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub id: ActorId,
    pub name: String,
    pub connections: u32,
    #[serde(rename = "endpointUrl")]
    pub endpoint_url: String,
    pub rooms: Vec<String>,
    #[serde(rename = "roomTypes")]
    pub room_types: Vec<String>,
}

/// Fleet-wide totals.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub connections: u32,
    pub instances: usize,
    pub rooms: usize,
    #[serde(rename = "roomTypes")]
    pub room_types: Vec<String>,
}

#[derive(Default)]
struct ApiCache {
    session: Option<String>,
    connections: u32,
    rooms: Vec<RoomView>,
    instances: Vec<InstanceView>,
    room_types: Vec<String>,
}

pub struct RegistryApi {
    room: Arc<Room>,
    cache: Mutex<ApiCache>,
}

impl RegistryApi {
    pub fn new(room: Arc<Room>) -> Self {
        Self {
            room,
            cache: Mutex::new(ApiCache::default()),
        }
    }

    pub fn instances(&self) -> Result<Vec<InstanceView>, RegistryError> {
        self.with_fresh_cache(|cache| cache.instances.clone())
    }

    pub fn instance(&self, instance_id: ActorId) -> Result<Option<InstanceView>, RegistryError> {
        self.with_fresh_cache(|cache| {
            cache
                .instances
                .iter()
                .find(|instance| instance.id == instance_id)
                .cloned()
        })
    }

    pub fn rooms(&self) -> Result<Vec<RoomView>, RegistryError> {
        self.with_fresh_cache(|cache| cache.rooms.clone())
    }

    pub fn room(&self, room_id: &str) -> Result<Option<RoomView>, RegistryError> {
        self.with_fresh_cache(|cache| {
            cache.rooms.iter().find(|room| room.id == room_id).cloned()
        })
    }

    pub fn room_types(&self) -> Result<Vec<String>, RegistryError> {
        self.with_fresh_cache(|cache| cache.room_types.clone())
    }

    pub fn connections(&self) -> Result<u32, RegistryError> {
        self.with_fresh_cache(|cache| cache.connections)
    }

    pub fn stats(&self) -> Result<RegistryStats, RegistryError> {
        self.with_fresh_cache(|cache| RegistryStats {
            connections: cache.connections,
            instances: cache.instances.len(),
            rooms: cache.rooms.len(),
            room_types: cache.room_types.clone(),
        })
    }

    /// Commands an instance to create a room.
    pub async fn create(
        &self,
        instance_id: ActorId,
        room_id: &str,
        room_type: &str,
    ) -> Result<(), RegistryError> {
        self.sync()?
            .create(&self.room, instance_id, room_id, room_type)
            .await
    }

    /// Commands an instance to destroy a room.
    pub async fn destroy(&self, instance_id: ActorId, room_id: &str) -> Result<(), RegistryError> {
        self.sync()?.destroy(&self.room, instance_id, room_id).await
    }

    fn sync(&self) -> Result<SyncRouter, RegistryError> {
        let sub = self
            .room
            .get_router(SYNC_ROUTER_KEY)
            .ok_or(RegistryError::SyncRouterMissing)?;
        sub.as_any()
            .downcast_ref::<SyncRouter>()
            .cloned()
            .ok_or(RegistryError::SyncRouterMissing)
    }

    fn with_fresh_cache<T>(&self, read: impl FnOnce(&ApiCache) -> T) -> Result<T, RegistryError> {
        let sync = self.sync()?;
        let mut cache = self.cache.lock().expect("registry api cache poisoned");
        let session = sync.session();
        if cache.session.as_deref() != Some(session.as_str()) {
            Self::rebuild(&mut cache, &sync, session);
        }
        Ok(read(&cache))
    }

    fn rebuild(cache: &mut ApiCache, sync: &SyncRouter, session: String) {
        cache.session = Some(session);
        cache.rooms.clear();
        cache.instances.clear();
        cache.connections = 0;
        let mut room_types = BTreeSet::new();

        for instance in sync.instances() {
            let mut room_ids = Vec::with_capacity(instance.rooms.len());
            for room in &instance.rooms {
                cache.rooms.push(RoomView {
                    id: room.id.clone(),
                    room_type: room.room_type.clone(),
                    connections: room.connections,
                    instance: instance.id,
                    endpoint_url: instance.endpoint_url.clone(),
                });
                room_ids.push(room.id.clone());
            }
            room_types.extend(instance.types.iter().cloned());
            cache.connections += instance.connections;
            cache.instances.push(InstanceView {
                id: instance.id,
                name: instance.name.clone(),
                connections: instance.connections,
                endpoint_url: instance.endpoint_url.clone(),
                rooms: room_ids,
                room_types: instance.types.clone(),
            });
        }
        cache.room_types = room_types.into_iter().collect();
    }
}

impl std::fmt::Debug for RegistryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryApi")
            .field("room", &self.room.id())
            .finish()
    }
}
