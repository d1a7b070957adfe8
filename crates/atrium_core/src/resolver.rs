//! Room resolution at the transport boundary.

use crate::room::Room;
use crate::rooms::RoomManager;
use std::sync::Arc;

/// Maps a room id from an authorized ticket to a live room.
pub trait RoomResolver: Send + Sync {
    fn resolve(&self, room_id: &str) -> Option<Arc<Room>>;
}

/// Resolves against a [`RoomManager`]'s live map.
pub struct DefaultRoomResolver {
    rooms: Arc<RoomManager>,
}

impl DefaultRoomResolver {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self { rooms }
    }
}

impl RoomResolver for DefaultRoomResolver {
    fn resolve(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id)
    }
}
