//! # Room
//!
//! The stateful session unit: one actor manager, one data operator, one
//! routing tree. Rooms emit lifecycle events over a broadcast channel,
//! run a periodic update tick for game-loop consumers, and expose
//! `send`/`broadcast` for outbound traffic.

use crate::actor::Actor;
use crate::actors::ActorManager;
use crate::broker::Broker;
use crate::error::{DeliveryError, SetupError};
use crate::events::RoomEvent;
use crate::operator::DataOperator;
use crate::router::{Router, RouterShared, SubRouter};
use atrium_protocol::{Payload, ProtocolCodec, SchemaRegistry};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default interval of the room's `Update` tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-receiver broadcast filter. Evaluated independently for every
/// receiver; resolving `true` triggers that receiver's delivery.
pub type BroadcastFilter =
    Arc<dyn Fn(Actor, Actor, String, Payload) -> BoxFuture<'static, bool> + Send + Sync>;

/// Behavior of a room type: route registration and lifecycle hooks.
///
/// Replaces subclassing: a room type is a descriptor built from closures
/// and trait impls, registered with the
/// [`RoomManager`](crate::RoomManager) under a type key.
#[async_trait]
pub trait RoomBehavior: Send + Sync + 'static {
    /// Registers listeners and mounts sub-routers. Runs once per room
    /// instance before traffic flows; registration order determines
    /// action hash assignment order.
    fn register(&self, room: &Arc<Room>, router: &Router) -> Result<(), SetupError> {
        let _ = (room, router);
        Ok(())
    }

    /// Deferred setup hook, scheduled once after construction. The room's
    /// `Created` event follows its completion.
    async fn on_create(&self, room: Arc<Room>) {
        let _ = room;
    }

    /// Interval of the room's `Update` tick.
    fn tick_interval(&self) -> Duration {
        DEFAULT_TICK_INTERVAL
    }
}

/// The unit behavior: no routes, no hooks. Useful for rooms that are
/// driven entirely through mounted sub-routers.
#[async_trait]
impl RoomBehavior for () {}

pub struct Room {
    id: String,
    type_name: Option<String>,
    broker: Arc<Broker>,
    shared: Arc<RouterShared>,
    operator: Arc<DataOperator>,
    actors: ActorManager,
    behavior: Arc<dyn RoomBehavior>,
    events: broadcast::Sender<RoomEvent>,
    tick: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl Room {
    pub(crate) fn assemble(
        id: String,
        type_name: Option<String>,
        broker: Arc<Broker>,
        codec: Arc<ProtocolCodec>,
        schemas: Arc<SchemaRegistry>,
        behavior: Arc<dyn RoomBehavior>,
    ) -> Arc<Self> {
        let shared = RouterShared::new(schemas);
        let operator = Arc::new(DataOperator::new(id.clone(), codec, shared.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|weak| Self {
            actors: ActorManager::new(weak.clone(), broker.clone(), operator.clone()),
            id,
            type_name,
            broker,
            shared,
            operator,
            behavior,
            events,
            tick: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Runs behavior registration, schedules the deferred creation hook
    /// and starts the update tick.
    pub(crate) fn start(self: &Arc<Self>) -> Result<(), SetupError> {
        self.behavior.register(self, &self.router())?;

        let room = self.clone();
        tokio::spawn(async move {
            room.behavior.on_create(room.clone()).await;
            room.emit(RoomEvent::Created);
            debug!(room = %room.id, "created");
        });

        let weak = Arc::downgrade(self);
        let interval = self.behavior.tick_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(room) => room.emit(RoomEvent::Update),
                    None => break,
                }
            }
        });
        *self.tick.lock().expect("tick handle poisoned") = Some(handle);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The room type key, or `None` for standalone rooms.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn actors(&self) -> &ActorManager {
        &self.actors
    }

    /// The root view of the room's routing tree.
    pub fn router(&self) -> Router {
        Router::root(self.shared.clone())
    }

    /// Mounts a sub-router under `key` on the root router.
    pub fn mount(self: &Arc<Self>, key: &str, sub: Arc<dyn SubRouter>) -> Result<(), SetupError> {
        self.router().mount(self, key, sub)
    }

    /// Resolves a previously mounted sub-router by its absolute key.
    pub fn get_router(&self, key: &str) -> Option<Arc<dyn SubRouter>> {
        self.router().get_sub_router(key)
    }

    /// Subscribes to the room's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    /// Snapshot of the registered actions in transfer-line form, in hash
    /// order. The same sequence a connecting client receives during the
    /// handshake.
    pub fn action_list(&self) -> Vec<String> {
        self.shared
            .actions
            .read()
            .expect("action repository poisoned")
            .get_list()
    }

    /// Sends a message to a single receiver. Fire-and-forget: a delivery
    /// error only surfaces when the frame cannot be built.
    pub async fn send(
        &self,
        receiver: &Actor,
        topic: &str,
        data: &Payload,
        sender: Option<&Actor>,
    ) -> Result<(), DeliveryError> {
        let sender = sender.unwrap_or_else(|| self.actors.root());
        let frame = self.operator.message_to_buffer(sender.id(), topic, data)?;
        self.broker.send(receiver.id(), frame).await;
        Ok(())
    }

    /// Broadcasts a message to every admitted actor.
    ///
    /// The frame is encoded once. Each receiver's filter runs in its own
    /// task: evaluations are independent and concurrent, delivery order
    /// across receivers is unspecified, and a slow filter delays only its
    /// own receiver. A receiver that left mid-broadcast is a no-op at
    /// delivery time, not an error.
    pub async fn broadcast(
        &self,
        topic: &str,
        data: &Payload,
        sender: Option<&Actor>,
        filter: Option<BroadcastFilter>,
    ) -> Result<(), DeliveryError> {
        let sender = sender.unwrap_or_else(|| self.actors.root()).clone();
        let frame = self.operator.message_to_buffer(sender.id(), topic, data)?;

        let mut receivers = Vec::new();
        self.actors.for_each(|actor| receivers.push(actor.clone()));
        for receiver in receivers {
            let broker = self.broker.clone();
            let frame = frame.clone();
            match &filter {
                None => {
                    tokio::spawn(async move {
                        broker.send(receiver.id(), frame).await;
                    });
                }
                Some(filter) => {
                    let filter = filter.clone();
                    let sender = sender.clone();
                    let topic = topic.to_string();
                    let data = data.clone();
                    tokio::spawn(async move {
                        if filter(sender, receiver.clone(), topic, data).await {
                            broker.send(receiver.id(), frame).await;
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Tears the room down: stops the tick, kicks every actor (leave
    /// cleanup follows asynchronously through the broker) and emits
    /// `Destroyed`. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.tick.lock().expect("tick handle poisoned").take() {
            handle.abort();
        }
        let mut actors = Vec::new();
        self.actors.for_each(|actor| actors.push(actor.clone()));
        for actor in actors {
            actor.kick().await;
        }
        self.emit(RoomEvent::Destroyed);
        debug!(room = %self.id, "destroyed");
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("actors", &self.actors.count())
            .finish()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        if let Some(handle) = self.tick.lock().ok().and_then(|mut tick| tick.take()) {
            handle.abort();
        }
    }
}
