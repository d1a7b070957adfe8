//! # Atrium Registry
//!
//! Fleet coordination for Atrium instances, built on the same room and
//! router primitives the instances themselves use. A registry process
//! hosts one well-known room; every instance connects to it as an actor
//! and periodically pushes a state snapshot (name, room types, live rooms
//! with connection counts, public endpoint), deduplicated by a content
//! digest so an idle fleet is silent. The registry diffs nothing - each
//! push replaces the instance's record - and can command room creation
//! and destruction on a specific instance through the same action.

mod api;
mod auth;
mod error;
mod registry;
mod schemas;
mod settings;
mod sync_router;
mod watcher;

pub use api::{InstanceView, RegistryApi, RegistryStats, RoomView};
pub use auth::RegistryAuthMiddleware;
pub use error::RegistryError;
pub use registry::InstanceRegistry;
pub use schemas::{define_registry_schemas, RegistrySchemas};
pub use settings::{RegistrySettings, WatcherSettings};
pub use sync_router::{InstanceRecord, RoomRecord, SyncRouter, INSTANCE_TOPIC, SYNC_ROUTER_KEY};
pub use watcher::{LinkEvent, LocalLink, RegistryLink, Watcher};
