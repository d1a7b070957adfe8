//! Identifier generation.

use atrium_protocol::ActorId;
use uuid::Uuid;

/// Attempts made to find a collision-free actor id before giving up.
pub(crate) const ID_ATTEMPTS: usize = 10;

/// A random 4-byte actor id. The caller retries on collision with live
/// connections and on the reserved root id.
pub(crate) fn generate_actor_id() -> ActorId {
    let uuid = Uuid::new_v4();
    let bytes = uuid.as_bytes();
    ActorId::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A short random name for servers that were not given one.
pub(crate) fn generate_name() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
