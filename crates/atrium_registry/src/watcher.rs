//! # Instance Watcher
//!
//! The instance-side half of the sync protocol. The watcher connects to
//! the registry room like any other client, completes the handshake
//! through a [`ClientSession`], and from then on:
//!
//! - pushes a state snapshot on a fixed interval and on every room
//!   manager event, suppressed while a content digest of the snapshot is
//!   unchanged since the last push
//! - executes create/destroy commands the registry sends back, against
//!   the local room manager; invalid commands are logged and dropped,
//!   never retried
//!
//! The connection itself is abstract: a [`RegistryLink`] sends frames and
//! an event channel delivers inbound ones, so the watcher works over any
//! transport, including the in-process [`LocalLink`].

use crate::settings::WatcherSettings;
use crate::sync_router::INSTANCE_TOPIC;
use atrium_core::{RoomManager, TransportError, TransportLayer};
use atrium_protocol::{ActorId, ClientSession, Payload, SessionEvent};
use async_trait::async_trait;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Outbound half of a registry connection.
#[async_trait]
pub trait RegistryLink: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// Inbound events of a registry connection.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Vec<u8>),
    Closed,
}

pub struct Watcher {
    rooms: Arc<RoomManager>,
    link: Arc<dyn RegistryLink>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    settings: WatcherSettings,
    session: ClientSession,
    last_digest: Option<u64>,
}

impl Watcher {
    pub fn new(
        rooms: Arc<RoomManager>,
        link: Arc<dyn RegistryLink>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            rooms,
            link,
            inbound,
            settings,
            session: ClientSession::new(),
            last_digest: None,
        }
    }

    /// Drives the watcher until the registry link closes. Typically
    /// spawned: `tokio::spawn(watcher.run())`.
    pub async fn run(mut self) {
        let mut manager_events = self.rooms.subscribe();
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.settings.sync_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = self.inbound.recv() => match event {
                    Some(LinkEvent::Frame(frame)) => self.handle_frame(frame).await,
                    Some(LinkEvent::Closed) | None => {
                        info!(name = %self.settings.name, "registry link closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.session.is_synced() {
                        self.synchronize().await;
                    }
                }
                event = manager_events.recv() => match event {
                    Ok(_) => {
                        if self.session.is_synced() {
                            self.synchronize().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.session.is_synced() {
                            self.synchronize().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: Vec<u8>) {
        match self.session.handle_frame(&frame) {
            Ok(SessionEvent::Synced { room_id, answer, .. }) => {
                debug!(name = %self.settings.name, registry_room = %room_id, "registry handshake");
                if let Err(error) = self.link.send(answer).await {
                    warn!(%error, "handshake answer failed");
                    return;
                }
                self.synchronize().await;
            }
            Ok(SessionEvent::Message { key, data, .. }) if key == INSTANCE_TOPIC => {
                self.handle_command(data).await;
            }
            Ok(SessionEvent::Message { key, .. }) => {
                debug!(%key, "ignoring frame outside the sync protocol");
            }
            Err(error) => {
                warn!(%error, "registry frame rejected");
            }
        }
    }

    /// Executes a create/destroy command against the local room manager.
    /// Failures (duplicate room, unknown type, unknown room) stay local:
    /// they are logged and the command is dropped.
    async fn handle_command(&mut self, data: Payload) {
        let command = data.str("command").unwrap_or_default().to_string();
        let room_id = data.str("roomId").unwrap_or_default().to_string();
        debug!(%command, room = %room_id, "command received");
        match command.as_str() {
            "create" => {
                let room_type = data.str("type").unwrap_or_default().to_string();
                if let Err(error) = self.rooms.create(&room_id, &room_type).await {
                    warn!(room = %room_id, r#type = %room_type, %error, "create command failed");
                }
            }
            "destroy" => {
                if let Err(error) = self.rooms.destroy(&room_id).await {
                    warn!(room = %room_id, %error, "destroy command failed");
                }
            }
            other => warn!(command = %other, "unknown registry command"),
        }
    }

    /// Pushes the current state snapshot unless its digest matches the
    /// last pushed one.
    async fn synchronize(&mut self) {
        let snapshot = self.snapshot();
        let digest = snapshot_digest(&snapshot);
        if self.last_digest == Some(digest) {
            return;
        }
        let frame = match self.session.encode_message(INSTANCE_TOPIC, &snapshot) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "state snapshot could not be encoded");
                return;
            }
        };
        match self.link.send(frame).await {
            Ok(()) => {
                debug!(name = %self.settings.name, "state pushed");
                self.last_digest = Some(digest);
            }
            Err(error) => warn!(%error, "state push failed"),
        }
    }

    /// The instance state snapshot. Room and type lists are sorted so the
    /// digest is stable across map iteration orders.
    fn snapshot(&self) -> Payload {
        let mut room_ids = self.rooms.ids();
        room_ids.sort();
        let mut rooms = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            if let Some(room) = self.rooms.get(&room_id) {
                rooms.push(
                    json!([room.id(), room.type_name().unwrap_or_default(), room.actors().count()])
                        .to_string(),
                );
            }
        }
        let mut types = self.rooms.types();
        types.sort();
        Payload::new()
            .with("name", self.settings.name.as_str())
            .with("namespace", self.settings.namespace.as_str())
            .with("types", types)
            .with("rooms", rooms)
            .with("endpointUrl", self.settings.endpoint_url.as_str())
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.settings.name)
            .field("synced", &self.session.is_synced())
            .finish()
    }
}

/// Collision-tolerant change detector over the serialized snapshot. A
/// collision costs one skipped push; the next mutation pushes again.
/// Fields are hashed in name order so the digest never depends on map
/// iteration order.
fn snapshot_digest(snapshot: &Payload) -> u64 {
    let json = snapshot.to_json();
    let mut entries: Vec<(String, String)> = json
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();
    entries.sort();
    let mut hasher = DefaultHasher::new();
    entries.hash(&mut hasher);
    hasher.finish()
}

/// In-process registry connection, for instances embedding their registry
/// or for tests: frames go straight into the registry's transport layer
/// and outbound frames come back over the event channel.
pub struct LocalLink {
    layer: Arc<TransportLayer>,
    actor_id: ActorId,
}

impl LocalLink {
    /// Authorizes against the registry's transport layer with the shared
    /// token and wires both directions up.
    pub async fn connect(
        layer: &Arc<TransportLayer>,
        ticket: &str,
    ) -> Result<(Arc<LocalLink>, mpsc::UnboundedReceiver<LinkEvent>), TransportError> {
        let actor_id = layer.authorize(ticket).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let frame_tx = tx.clone();
        layer.on_message(
            actor_id,
            Arc::new(move |_id, frame| {
                let tx = frame_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(LinkEvent::Frame(frame));
                })
            }),
        );
        let kick_layer = layer.clone();
        layer.on_kick(
            actor_id,
            Arc::new(move |id| {
                let layer = kick_layer.clone();
                let tx = tx.clone();
                Box::pin(async move {
                    layer.leave(id).await;
                    let _ = tx.send(LinkEvent::Closed);
                })
            }),
        );
        layer
            .synchronize(actor_id)
            .await
            .map_err(|error| TransportError::Failure(error.to_string()))?;
        Ok((
            Arc::new(LocalLink {
                layer: layer.clone(),
                actor_id,
            }),
            rx,
        ))
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Disconnects from the registry room.
    pub async fn close(&self) {
        self.layer.leave(self.actor_id).await;
    }
}

#[async_trait]
impl RegistryLink for LocalLink {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.layer.deliver(self.actor_id, frame).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_equal_snapshots() {
        let a = Payload::new()
            .with("name", "eu-1")
            .with("rooms", vec!["[\"r1\",\"arena\",2]".to_string()]);
        let b = Payload::new()
            .with("name", "eu-1")
            .with("rooms", vec!["[\"r1\",\"arena\",2]".to_string()]);
        assert_eq!(snapshot_digest(&a), snapshot_digest(&b));
        let c = Payload::new()
            .with("name", "eu-1")
            .with("rooms", vec!["[\"r1\",\"arena\",3]".to_string()]);
        assert_ne!(snapshot_digest(&a), snapshot_digest(&c));
    }
}
