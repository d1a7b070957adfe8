//! Registry-side errors.
//!
//! Command validation failures (`UnknownInstance`, `DuplicateRoom`,
//! `UnsupportedType`, `UnknownRoom`) are raised locally against the
//! registry's view of the fleet before any command frame is sent; an
//! out-of-date view surfaces here as a descriptive error, never as an
//! automatic retry.

use atrium_core::{DeliveryError, RoomError, SetupError};
use atrium_protocol::{ActorId, SchemaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("instance id=({0}) is not registered")]
    UnknownInstance(ActorId),
    #[error("room id=({room}) already exists on instance id=({instance})")]
    DuplicateRoom { instance: ActorId, room: String },
    #[error("instance id=({instance}) can not host room type=({room_type})")]
    UnsupportedType {
        instance: ActorId,
        room_type: String,
    },
    #[error("room id=({room}) does not exist on instance id=({instance})")]
    UnknownRoom { instance: ActorId, room: String },
    #[error("sync router is not mounted on the registry room")]
    SyncRouterMissing,
    #[error("settings parse failed: {0}")]
    Settings(#[from] toml::de::Error),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Setup(#[from] SetupError),
}
