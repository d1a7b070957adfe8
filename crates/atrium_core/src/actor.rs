//! Connected room participants.

use crate::broker::Broker;
use atrium_protocol::ActorId;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// One connected, authorized participant of a room.
///
/// Identity and the auth-derived data payload are fixed at authorization
/// time. The handle is cheap to clone; clones share the payload and the
/// kick capability.
#[derive(Clone)]
pub struct Actor {
    id: ActorId,
    data: Arc<JsonValue>,
    since: SystemTime,
    broker: Option<Arc<Broker>>,
}

impl Actor {
    pub(crate) fn new(id: ActorId, data: JsonValue, broker: Option<Arc<Broker>>) -> Self {
        Self {
            id,
            data: Arc::new(data),
            since: SystemTime::now(),
            broker,
        }
    }

    /// The synthetic root actor used as the default sender for
    /// server-originated messages. Its kick capability is a no-op.
    pub(crate) fn root() -> Self {
        Self::new(ActorId::ROOT, JsonValue::Object(Default::default()), None)
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Auth-derived payload, set once at authorization.
    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    /// When this actor was authorized.
    pub fn since(&self) -> SystemTime {
        self.since
    }

    /// Asks the transport to close this actor's connection.
    pub async fn kick(&self) {
        if let Some(broker) = &self.broker {
            broker.kick(self.id).await;
        }
    }
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Actor {}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("since", &self.since)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_actor_is_reserved_and_kick_safe() {
        let root = Actor::root();
        assert!(root.id().is_root());
        assert_eq!(root.data(), &serde_json::json!({}));
    }

    #[tokio::test]
    async fn kick_without_broker_is_a_no_op() {
        Actor::root().kick().await;
    }
}
