//! # Transport Broker
//!
//! In-process event bus decoupling a room's actor management from the
//! transport that owns the sockets. Four channels exist per actor:
//!
//! - **incoming** - bytes from the socket, consumed by the actor manager
//! - **outgoing** - bytes to the socket, consumed by the transport
//! - **leave** - the connection is gone, consumed by the actor manager
//! - **kick** - the room wants the connection closed, consumed by the
//!   transport
//!
//! Each (channel, actor) pair holds at most one subscription, either
//! persistent or one-shot; the actor manager relies on the one-shot slot
//! being consumed so it can swap its sync handler for the persistent
//! message handler. Emitting into an empty slot is a defined no-op, which
//! is what makes late deliveries to departed actors harmless.

use atrium_protocol::ActorId;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Handler for channels that carry a frame.
pub type FrameListener = Arc<dyn Fn(ActorId, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;
/// Handler for channels that carry only the actor id.
pub type SignalListener = Arc<dyn Fn(ActorId) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot<L> {
    listener: L,
    once: bool,
}

pub struct Broker {
    incoming: DashMap<ActorId, Slot<FrameListener>>,
    outgoing: DashMap<ActorId, Slot<FrameListener>>,
    leave: DashMap<ActorId, Slot<SignalListener>>,
    kick: DashMap<ActorId, Slot<SignalListener>>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            incoming: DashMap::new(),
            outgoing: DashMap::new(),
            leave: DashMap::new(),
            kick: DashMap::new(),
        })
    }

    pub fn on_incoming(&self, actor: ActorId, listener: FrameListener) {
        self.incoming.insert(actor, Slot { listener, once: false });
    }

    pub fn once_incoming(&self, actor: ActorId, listener: FrameListener) {
        self.incoming.insert(actor, Slot { listener, once: true });
    }

    pub fn off_incoming(&self, actor: ActorId) {
        self.incoming.remove(&actor);
    }

    pub fn on_outgoing(&self, actor: ActorId, listener: FrameListener) {
        self.outgoing.insert(actor, Slot { listener, once: false });
    }

    pub fn once_outgoing(&self, actor: ActorId, listener: FrameListener) {
        self.outgoing.insert(actor, Slot { listener, once: true });
    }

    pub fn off_outgoing(&self, actor: ActorId) {
        self.outgoing.remove(&actor);
    }

    pub fn on_leave(&self, actor: ActorId, listener: SignalListener) {
        self.leave.insert(actor, Slot { listener, once: false });
    }

    pub fn once_leave(&self, actor: ActorId, listener: SignalListener) {
        self.leave.insert(actor, Slot { listener, once: true });
    }

    pub fn off_leave(&self, actor: ActorId) {
        self.leave.remove(&actor);
    }

    pub fn on_kick(&self, actor: ActorId, listener: SignalListener) {
        self.kick.insert(actor, Slot { listener, once: false });
    }

    pub fn once_kick(&self, actor: ActorId, listener: SignalListener) {
        self.kick.insert(actor, Slot { listener, once: true });
    }

    pub fn off_kick(&self, actor: ActorId) {
        self.kick.remove(&actor);
    }

    /// Emits bytes arriving from the transport toward the room.
    pub async fn deliver(&self, actor: ActorId, frame: Vec<u8>) {
        Self::emit_frame(&self.incoming, actor, frame).await;
    }

    /// Emits bytes produced by the room toward the transport.
    pub async fn send(&self, actor: ActorId, frame: Vec<u8>) {
        Self::emit_frame(&self.outgoing, actor, frame).await;
    }

    pub async fn leave(&self, actor: ActorId) {
        Self::emit_signal(&self.leave, actor).await;
    }

    pub async fn kick(&self, actor: ActorId) {
        Self::emit_signal(&self.kick, actor).await;
    }

    /// Tears down every channel of an actor. After this, no event fires
    /// for the id and late emissions are no-ops.
    pub fn clear(&self, actor: ActorId) {
        self.incoming.remove(&actor);
        self.outgoing.remove(&actor);
        self.leave.remove(&actor);
        self.kick.remove(&actor);
    }

    async fn emit_frame(map: &DashMap<ActorId, Slot<FrameListener>>, actor: ActorId, frame: Vec<u8>) {
        // The guard must be dropped before the slot is removed or awaited.
        let once = match map.get(&actor) {
            Some(slot) => slot.once,
            None => return,
        };
        let listener = if once {
            map.remove(&actor).map(|(_, slot)| slot.listener)
        } else {
            map.get(&actor).map(|slot| slot.listener.clone())
        };
        if let Some(listener) = listener {
            listener(actor, frame).await;
        }
    }

    async fn emit_signal(map: &DashMap<ActorId, Slot<SignalListener>>, actor: ActorId) {
        let once = match map.get(&actor) {
            Some(slot) => slot.once,
            None => return,
        };
        let listener = if once {
            map.remove(&actor).map(|(_, slot)| slot.listener)
        } else {
            map.get(&actor).map(|slot| slot.listener.clone())
        };
        if let Some(listener) = listener {
            listener(actor).await;
        }
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .field("leave", &self.leave.len())
            .field("kick", &self.kick.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_frame_listener(counter: Arc<AtomicUsize>) -> FrameListener {
        Arc::new(move |_actor, _frame| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    fn actor(n: u32) -> ActorId {
        ActorId::from_bytes(n.to_be_bytes())
    }

    #[tokio::test]
    async fn persistent_subscription_fires_repeatedly() {
        let broker = Broker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        broker.on_incoming(actor(1), counting_frame_listener(counter.clone()));
        broker.deliver(actor(1), vec![1]).await;
        broker.deliver(actor(1), vec![2]).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_shot_subscription_fires_once() {
        let broker = Broker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        broker.once_incoming(actor(1), counting_frame_listener(counter.clone()));
        broker.deliver(actor(1), vec![1]).await;
        broker.deliver(actor(1), vec![2]).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_listener_can_replace_its_own_slot() {
        let broker = Broker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let replacement_counter = counter.clone();
        let broker_handle = broker.clone();
        broker.once_incoming(
            actor(1),
            Arc::new(move |id, _frame| {
                let broker = broker_handle.clone();
                let counter = replacement_counter.clone();
                Box::pin(async move {
                    broker.on_incoming(id, counting_frame_listener(counter));
                })
            }),
        );
        broker.deliver(actor(1), vec![0]).await;
        broker.deliver(actor(1), vec![1]).await;
        broker.deliver(actor(1), vec![2]).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn emission_without_subscription_is_a_no_op() {
        let broker = Broker::new();
        broker.deliver(actor(9), vec![1]).await;
        broker.send(actor(9), vec![1]).await;
        broker.leave(actor(9)).await;
        broker.kick(actor(9)).await;
    }

    #[tokio::test]
    async fn clear_tears_down_every_channel() {
        let broker = Broker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        broker.on_incoming(actor(1), counting_frame_listener(counter.clone()));
        broker.on_outgoing(actor(1), counting_frame_listener(counter.clone()));
        broker.clear(actor(1));
        broker.deliver(actor(1), vec![1]).await;
        broker.send(actor(1), vec![1]).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channels_are_isolated_per_actor() {
        let broker = Broker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        broker.on_incoming(actor(1), counting_frame_listener(counter.clone()));
        broker.deliver(actor(2), vec![1]).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
