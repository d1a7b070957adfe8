//! # Action Router
//!
//! A hierarchical namespace for message listeners. All routers of a room
//! share one flat listener map and one flat sub-router map; hierarchy
//! exists only in the dotted keys. Listener registration allocates the
//! next 2-byte action hash from a root-scoped counter and records the
//! action in the room's repository, so a fixed registration sequence
//! always reproduces the same hashes - that determinism is what keeps
//! client and server repositories aligned across restarts.

use crate::actor::Actor;
use crate::error::SetupError;
use crate::room::Room;
use atrium_protocol::{ActionHash, ActionRepository, Payload, SchemaHash, SchemaRegistry};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock};

/// Outcome of a bound message listener. Failures propagate to the actor
/// manager, which kicks the offending actor.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A listener bound to a routing key. Receives the owning room, the
/// sending actor, the absolute key and the decoded payload.
pub type MessageListener =
    Arc<dyn Fn(Arc<Room>, Actor, String, Payload) -> BoxFuture<'static, ListenerResult> + Send + Sync>;

/// A stateful sub-router mounted under a routing key.
///
/// `setup` runs once at mount time and registers the sub-router's
/// listeners; mounting order determines action hash assignment order.
/// Implementations that hold state retrievable through
/// [`Room::get_router`] expose themselves via `as_any`.
pub trait SubRouter: Send + Sync + 'static {
    fn setup(&self, room: &Arc<Room>, router: &Router) -> Result<(), SetupError>;

    fn as_any(&self) -> &dyn Any;
}

/// Storage shared by every router view of one room.
pub(crate) struct RouterShared {
    pub(crate) listeners: DashMap<String, MessageListener>,
    pub(crate) routers: DashMap<String, Arc<dyn SubRouter>>,
    pub(crate) actions: RwLock<ActionRepository>,
    pub(crate) schemas: Arc<SchemaRegistry>,
    counter: AtomicU16,
}

impl RouterShared {
    pub(crate) fn new(schemas: Arc<SchemaRegistry>) -> Arc<Self> {
        Arc::new(Self {
            listeners: DashMap::new(),
            routers: DashMap::new(),
            actions: RwLock::new(ActionRepository::new()),
            schemas,
            counter: AtomicU16::new(0),
        })
    }

    fn next_hash(&self) -> Result<ActionHash, SetupError> {
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                value.checked_add(1)
            })
            .map_err(|_| SetupError::ActionSpaceExhausted)?;
        Ok(ActionHash(previous + 1))
    }
}

/// A keyed view over a room's shared routing tables.
#[derive(Clone)]
pub struct Router {
    key: Option<String>,
    shared: Arc<RouterShared>,
}

impl Router {
    pub(crate) fn root(shared: Arc<RouterShared>) -> Self {
        Self { key: None, shared }
    }

    /// The absolute dotted key for an event name under this router.
    pub fn topic(&self, name: &str) -> String {
        match &self.key {
            None => name.to_string(),
            Some(prefix) => format!("{prefix}.{name}"),
        }
    }

    /// Registers a message listener under `event_name`.
    ///
    /// `output_schema` defaults to `input_schema` when not given. Fails if
    /// the name is invalid, the absolute key is already bound, or either
    /// schema hash is unknown to the room's registry.
    pub fn listen<F, Fut>(
        &self,
        event_name: &str,
        input_schema: SchemaHash,
        output_schema: Option<SchemaHash>,
        listener: F,
    ) -> Result<(), SetupError>
    where
        F: Fn(Arc<Room>, Actor, String, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        if !is_valid_key(event_name) {
            return Err(SetupError::InvalidKey(event_name.to_string()));
        }
        let topic = self.topic(event_name);
        if self.shared.listeners.contains_key(&topic) {
            return Err(SetupError::DuplicateListener(topic));
        }
        for hash in [Some(input_schema), output_schema].into_iter().flatten() {
            if !self.shared.schemas.contains(hash) {
                return Err(SetupError::UnknownSchema {
                    topic: topic.clone(),
                    hash,
                });
            }
        }
        let output_schema = output_schema.unwrap_or(input_schema);

        let hash = self.shared.next_hash()?;
        let boxed: MessageListener = Arc::new(move |room, actor, key, data| {
            Box::pin(listener(room, actor, key, data))
        });
        self.shared.listeners.insert(topic.clone(), boxed);
        self.shared
            .actions
            .write()
            .expect("action repository poisoned")
            .register(hash, topic, input_schema, output_schema);
        Ok(())
    }

    /// Mounts a sub-router under `router_key` and runs its setup.
    pub(crate) fn mount(
        &self,
        room: &Arc<Room>,
        router_key: &str,
        sub: Arc<dyn SubRouter>,
    ) -> Result<(), SetupError> {
        if !is_valid_key(router_key) {
            return Err(SetupError::InvalidKey(router_key.to_string()));
        }
        let route_key = self.topic(router_key);
        if self.shared.routers.contains_key(&route_key) {
            return Err(SetupError::DuplicateRouter(route_key));
        }
        let child = Router {
            key: Some(route_key.clone()),
            shared: self.shared.clone(),
        };
        sub.setup(room, &child)?;
        self.shared.routers.insert(route_key, sub);
        Ok(())
    }

    pub(crate) fn get_listener(&self, key: &str) -> Option<MessageListener> {
        self.shared.listeners.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn get_sub_router(&self, key: &str) -> Option<Arc<dyn SubRouter>> {
        self.shared.routers.get(key).map(|entry| entry.value().clone())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("key", &self.key)
            .field("listeners", &self.shared.listeners.len())
            .field("routers", &self.shared.routers.len())
            .finish()
    }
}

/// Routing keys are lowercase alphanumerics plus `-`, `_` and `.`, with no
/// leading, trailing or consecutive dots.
fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('.') || key.ends_with('.') || key.contains("..") {
        return false;
    }
    key.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_pattern() {
        for valid in ["a", "chat", "chat.say", "a-b_c.d2", "0"] {
            assert!(is_valid_key(valid), "{valid} should be valid");
        }
        for invalid in ["", ".a", "a.", "a..b", "Chat", "a b", "a/b", "ü"] {
            assert!(!is_valid_key(invalid), "{invalid} should be invalid");
        }
    }
}
