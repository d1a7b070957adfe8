//! # Actor Manager
//!
//! Owns the actors of one room and drives the per-actor authorization
//! state machine:
//!
//! ```text
//! unauthorized -> pending-sync -> active -> left
//! ```
//!
//! `authorize` admits a connection and leaves it pending; the first
//! inbound frame must be the handshake completion echoing the assigned
//! actor id. Only a matching echo binds the persistent message handler
//! and emits the room's `Joined` event. From then on, any malformed frame,
//! unknown action or listener failure ends the connection - one bad frame
//! kicks, there is no partial-failure retry.

use crate::actor::Actor;
use crate::auth::AuthMiddleware;
use crate::broker::Broker;
use crate::error::RoomError;
use crate::events::RoomEvent;
use crate::operator::DataOperator;
use crate::room::Room;
use atrium_protocol::ActorId;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

pub struct ActorManager {
    room: Weak<Room>,
    broker: Arc<Broker>,
    operator: Arc<DataOperator>,
    actors: DashMap<ActorId, Actor>,
    root: Actor,
}

impl ActorManager {
    pub(crate) fn new(room: Weak<Room>, broker: Arc<Broker>, operator: Arc<DataOperator>) -> Self {
        Self {
            room,
            broker,
            operator,
            actors: DashMap::new(),
            root: Actor::root(),
        }
    }

    /// Number of admitted actors, pending and active.
    pub fn count(&self) -> usize {
        self.actors.len()
    }

    pub fn get(&self, actor_id: ActorId) -> Option<Actor> {
        self.actors.get(&actor_id).map(|entry| entry.value().clone())
    }

    /// The synthetic root actor, default sender for server-originated
    /// messages. Never stored in the actor map.
    pub fn root(&self) -> &Actor {
        &self.root
    }

    /// Iterates a snapshot of the admitted actors.
    pub fn for_each(&self, mut f: impl FnMut(&Actor)) {
        for entry in self.actors.iter() {
            f(entry.value());
        }
    }

    /// Admits a connection into the room. Normally called through
    /// [`TransportLayer::authorize`](crate::TransportLayer::authorize);
    /// public for alternative transport layers that reserve ids
    /// themselves.
    ///
    /// Subscribes the one-shot sync and leave handlers, then awaits the
    /// middleware's identity extraction - the single suspension point of
    /// the handshake. On success the actor is stored pending-sync; the
    /// caller ships the handshake via [`ActorManager::synchronize`].
    pub async fn authorize(
        &self,
        auth: &dyn AuthMiddleware,
        actor_id: ActorId,
        ticket: &str,
    ) -> Result<(), RoomError> {
        if self.actors.contains_key(&actor_id) {
            return Err(RoomError::ActorExists {
                actor: actor_id,
                room: self.room_id(),
            });
        }

        let room = self.room.clone();
        self.broker.once_incoming(
            actor_id,
            Arc::new(move |id, frame| {
                let room = room.clone();
                Box::pin(async move {
                    if let Some(room) = room.upgrade() {
                        room.actors().handle_sync(id, frame).await;
                    }
                })
            }),
        );
        let room = self.room.clone();
        self.broker.once_leave(
            actor_id,
            Arc::new(move |id| {
                let room = room.clone();
                Box::pin(async move {
                    if let Some(room) = room.upgrade() {
                        room.actors().handle_leave(id).await;
                    }
                })
            }),
        );

        let data = match auth.extract(ticket).await {
            Ok(data) => data,
            Err(error) => {
                // Admission failed; nothing must keep firing for this id.
                self.broker.clear(actor_id);
                return Err(error.into());
            }
        };
        let actor = Actor::new(actor_id, data, Some(self.broker.clone()));
        self.actors.insert(actor_id, actor);
        Ok(())
    }

    /// Ships the handshake package to a pending actor's outbound channel.
    /// Not automatic after `authorize`: the transport may need to finish
    /// its own connection setup first.
    pub async fn synchronize(&self, actor_id: ActorId) -> Result<(), RoomError> {
        if !self.actors.contains_key(&actor_id) {
            return Err(RoomError::ActorNotFound(actor_id));
        }
        let package = self.operator.create_sync_package(actor_id)?;
        self.broker.send(actor_id, package).await;
        Ok(())
    }

    /// Handles the first inbound frame: the handshake completion. A decode
    /// failure or an id mismatch kicks the actor and aborts the
    /// transition; it never reaches the active state.
    pub(crate) async fn handle_sync(&self, actor_id: ActorId, frame: Vec<u8>) {
        let Some(actor) = self.get(actor_id) else {
            return;
        };
        let echoed = match self.operator.decode_sync_package(&frame) {
            Ok(echoed) => echoed,
            Err(error) => {
                warn!(
                    room = %self.room_id(),
                    actor = %actor_id,
                    %error,
                    "protocol error: client to server sync failed"
                );
                actor.kick().await;
                return;
            }
        };
        if echoed != actor_id {
            warn!(
                room = %self.room_id(),
                actor = %actor_id,
                %echoed,
                "protocol error: sync answer carries a foreign actor id"
            );
            actor.kick().await;
            return;
        }

        let room = self.room.clone();
        self.broker.on_incoming(
            actor_id,
            Arc::new(move |id, frame| {
                let room = room.clone();
                Box::pin(async move {
                    if let Some(room) = room.upgrade() {
                        room.actors().handle_message(id, frame).await;
                    }
                })
            }),
        );
        if let Some(room) = self.room.upgrade() {
            room.emit(RoomEvent::Joined(actor));
        }
    }

    /// Handles an application frame from an active actor. Any failure -
    /// malformed frame, unknown action, missing or failing listener -
    /// is logged and answered with a kick.
    pub(crate) async fn handle_message(&self, actor_id: ActorId, frame: Vec<u8>) {
        let Some(actor) = self.get(actor_id) else {
            return;
        };
        let Some(room) = self.room.upgrade() else {
            return;
        };
        let result = async {
            let key = self.operator.package_key(&frame)?;
            let data = self.operator.package_data(&frame)?;
            room.emit(RoomEvent::Message {
                actor: actor.clone(),
                key: key.clone(),
                data: data.clone(),
            });
            self.operator
                .invoke_listener(room.clone(), actor.clone(), &key, data)
                .await
        }
        .await;
        if let Err(error) = result {
            warn!(
                room = %self.room_id(),
                actor = %actor_id,
                %error,
                "protocol error: can not handle incoming message"
            );
            actor.kick().await;
        }
    }

    /// Fired by the broker when the transport reports a disconnect.
    /// Terminal: the actor is removed after the room's `Left` event.
    pub(crate) async fn handle_leave(&self, actor_id: ActorId) {
        let Some(actor) = self.get(actor_id) else {
            return;
        };
        if let Some(room) = self.room.upgrade() {
            room.emit(RoomEvent::Left(actor));
        }
        self.actors.remove(&actor_id);
    }

    fn room_id(&self) -> String {
        self.room
            .upgrade()
            .map(|room| room.id().to_string())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ActorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorManager")
            .field("actors", &self.actors.len())
            .finish()
    }
}
