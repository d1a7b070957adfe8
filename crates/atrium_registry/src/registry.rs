//! # Instance Registry
//!
//! The registry process assembly: a singleton room guarded by the shared
//! token, the sync router mounted at its well-known key, and the API view
//! on top. Instances connect to the room as actors through whatever
//! transports the host wires up; the HTTP surface is an external
//! collaborator reading [`RegistryApi`](crate::RegistryApi).

use crate::api::RegistryApi;
use crate::auth::RegistryAuthMiddleware;
use crate::error::RegistryError;
use crate::schemas::define_registry_schemas;
use crate::settings::RegistrySettings;
use crate::sync_router::{SyncRouter, SYNC_ROUTER_KEY};
use atrium_core::{create_room, Room, Transport, TransportLayer};
use atrium_protocol::SchemaRegistry;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct InstanceRegistry {
    room: Arc<Room>,
    layer: Arc<TransportLayer>,
    api: RegistryApi,
    token: String,
}

impl InstanceRegistry {
    /// Assembles and starts the registry room.
    pub async fn run(
        settings: RegistrySettings,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Result<Self, RegistryError> {
        let token = settings
            .token
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let schema_registry = Arc::new(SchemaRegistry::new());
        let schemas = define_registry_schemas(&schema_registry)?;
        let auth = Arc::new(RegistryAuthMiddleware::new(
            token.clone(),
            settings.room_id.clone(),
        ));
        let (room, layer) = create_room(
            &settings.room_id,
            auth,
            &transports,
            schema_registry,
            Arc::new(()),
        )
        .await?;
        room.mount(SYNC_ROUTER_KEY, Arc::new(SyncRouter::new(schemas)))?;
        let api = RegistryApi::new(room.clone());
        info!(room = %room.id(), "registry started");
        Ok(Self {
            room,
            layer,
            api,
            token,
        })
    }

    /// The shared token instances must present as their ticket.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn api(&self) -> &RegistryApi {
        &self.api
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// The transport layer instances connect through; in-process
    /// instances pass it to
    /// [`LocalLink::connect`](crate::LocalLink::connect).
    pub fn transport_layer(&self) -> &Arc<TransportLayer> {
        &self.layer
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("room", &self.room.id())
            .finish()
    }
}
