//! End-to-end tests of the room runtime: the authorization handshake,
//! message routing, broadcast filtering and room lifecycle, driven by a
//! real client session over an in-process transport harness.

use async_trait::async_trait;
use atrium_core::{
    AuthError, AuthMiddleware, FieldType, Payload, Room, RoomBehavior, RoomError, Router, Server,
    ServerConfig, SessionEvent, SetupError, TransportError, TransportLayer,
};
use atrium_protocol::{ActorId, ClientSession, SchemaHash, SchemaRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const QUIET_TIMEOUT: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct TicketAuth;

#[async_trait]
impl AuthMiddleware for TicketAuth {
    async fn get_room_id(&self, ticket: &str) -> Result<String, AuthError> {
        // Tickets look like "room-id/user-name".
        match ticket.split_once('/') {
            Some((room_id, _)) => Ok(room_id.to_string()),
            None => Err(AuthError::InvalidTicket(ticket.to_string())),
        }
    }

    async fn extract(&self, ticket: &str) -> Result<serde_json::Value, AuthError> {
        match ticket.split_once('/') {
            Some((_, name)) if !name.is_empty() => Ok(json!({ "name": name })),
            _ => Err(AuthError::ExtractionFailed(ticket.to_string())),
        }
    }
}

/// Room type under test: echoes `arena.shout` back to the sender, keeping
/// the sender id in the frame prefix.
struct ArenaBehavior {
    message_schema: SchemaHash,
}

#[async_trait]
impl RoomBehavior for ArenaBehavior {
    fn register(&self, _room: &Arc<Room>, router: &Router) -> Result<(), SetupError> {
        router.listen(
            "arena.shout",
            self.message_schema,
            None,
            |room: Arc<Room>, actor, key, data| async move {
                room.send(&actor, &key, &data, Some(&actor)).await?;
                Ok(())
            },
        )?;
        router.listen(
            "arena.fail",
            SchemaRegistry::EMPTY,
            None,
            |_room, _actor, _key, _data| async move { Err("listener blew up".into()) },
        )?;
        Ok(())
    }
}

struct Fixture {
    server: Server,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn arena_server() -> Fixture {
    init_tracing();
    let schemas = Arc::new(SchemaRegistry::new());
    let message_schema = schemas
        .define([("text", FieldType::STRING)])
        .expect("define message schema");
    let server = Server::with_schemas(
        ServerConfig {
            name: Some("test-instance".to_string()),
            auth: Arc::new(TicketAuth),
            transports: Vec::new(),
        },
        schemas,
    );
    server.run().await.expect("server run");
    server
        .rooms()
        .define("arena", move || {
            Arc::new(ArenaBehavior { message_schema }) as Arc<dyn RoomBehavior>
        })
        .expect("define arena type");
    Fixture { server }
}

/// A protocol client wired straight into the transport layer, standing in
/// for a socket transport.
struct TestClient {
    actor_id: ActorId,
    session: ClientSession,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    layer: Arc<TransportLayer>,
}

impl TestClient {
    /// Runs the full connect sequence up to the handshake answer.
    async fn connect(layer: &Arc<TransportLayer>, ticket: &str) -> TestClient {
        let mut client = Self::connect_pending(layer, ticket).await;
        let frame = client.recv_frame().await;
        let answer = match client.session.handle_frame(&frame).expect("handshake") {
            SessionEvent::Synced { answer, .. } => answer,
            other => panic!("expected handshake, got {other:?}"),
        };
        layer.deliver(client.actor_id, answer).await;
        client
    }

    /// Authorizes and receives the handshake but does not answer it yet.
    async fn connect_pending(layer: &Arc<TransportLayer>, ticket: &str) -> TestClient {
        let actor_id = layer.authorize(ticket).await.expect("authorize");
        let (tx, inbox) = mpsc::unbounded_channel();
        layer.on_message(
            actor_id,
            Arc::new(move |_id, frame| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(frame);
                })
            }),
        );
        // A kicked connection closes its socket and reports the leave,
        // exactly like a real transport.
        let kick_layer = layer.clone();
        layer.on_kick(
            actor_id,
            Arc::new(move |id| {
                let layer = kick_layer.clone();
                Box::pin(async move {
                    layer.leave(id).await;
                })
            }),
        );
        layer.synchronize(actor_id).await.expect("synchronize");
        TestClient {
            actor_id,
            session: ClientSession::new(),
            inbox,
            layer: layer.clone(),
        }
    }

    async fn recv_frame(&mut self) -> Vec<u8> {
        timeout(RECV_TIMEOUT, self.inbox.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound channel closed")
    }

    async fn recv_message(&mut self) -> (String, ActorId, Payload) {
        let frame = self.recv_frame().await;
        match self.session.handle_frame(&frame).expect("decode frame") {
            SessionEvent::Message { key, sender, data } => (key, sender, data),
            other => panic!("expected message, got {other:?}"),
        }
    }

    async fn assert_quiet(&mut self) {
        if let Ok(Some(frame)) = timeout(QUIET_TIMEOUT, self.inbox.recv()).await {
            panic!("expected no traffic, received {} bytes", frame.len());
        }
    }

    async fn send(&self, key: &str, data: &Payload) {
        let frame = self.session.encode_message(key, data).expect("encode");
        self.layer.deliver(self.actor_id, frame).await;
    }
}

async fn expect_event<F>(events: &mut broadcast::Receiver<atrium_core::RoomEvent>, mut check: F)
where
    F: FnMut(&atrium_core::RoomEvent) -> bool,
{
    loop {
        let event = timeout(RECV_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for a room event")
            .expect("room event channel closed");
        if check(&event) {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn end_to_end_handshake_and_echo() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let mut client = TestClient::connect_pending(layer, "R1/alice").await;
    let frame = client.recv_frame().await;
    let answer = match client.session.handle_frame(&frame).expect("handshake") {
        SessionEvent::Synced {
            room_id,
            actor_id,
            answer,
        } => {
            assert_eq!(room_id, "R1");
            assert_eq!(actor_id, client.actor_id);
            assert_eq!(actor_id.to_string().len(), 8);
            answer
        }
        other => panic!("expected handshake, got {other:?}"),
    };

    let room = rooms.get("R1").expect("room exists");
    let mut events = room.subscribe();
    layer.deliver(client.actor_id, answer).await;
    expect_event(&mut events, |event| {
        matches!(event, atrium_core::RoomEvent::Joined(actor) if actor.id() == client.actor_id)
    })
    .await;
    assert_eq!(room.actors().count(), 1);
    let actor = room.actors().get(client.actor_id).expect("actor stored");
    assert_eq!(actor.data(), &json!({ "name": "alice" }));

    // Nothing arrives until the client speaks.
    client.assert_quiet().await;

    client
        .send("arena.shout", &Payload::new().with("text", "hello"))
        .await;
    let (key, sender, data) = client.recv_message().await;
    assert_eq!(key, "arena.shout");
    assert_eq!(sender, client.actor_id);
    assert_eq!(data.str("text"), Some("hello"));
}

#[tokio::test]
async fn rejects_bad_tickets_and_unknown_rooms() {
    let fixture = arena_server().await;
    let layer = fixture.server.transport_layer();

    assert!(matches!(
        layer.authorize("no-separator").await,
        Err(TransportError::Auth(AuthError::InvalidTicket(_)))
    ));
    assert!(matches!(
        layer.authorize("nowhere/alice").await,
        Err(TransportError::RoomNotFound(_))
    ));

    // Extraction failure surfaces as a join error and admits nothing.
    fixture
        .server
        .rooms()
        .create("R1", "arena")
        .await
        .expect("create room");
    assert!(matches!(
        layer.authorize("R1/").await,
        Err(TransportError::Join { .. })
    ));
    let room = fixture.server.rooms().get("R1").unwrap();
    assert_eq!(room.actors().count(), 0);
    assert_eq!(layer.connections(), 0);
}

#[tokio::test]
async fn duplicate_actor_id_is_rejected_and_first_stays() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let client = TestClient::connect(layer, "R1/alice").await;
    let result = room
        .actors()
        .authorize(&TicketAuth, client.actor_id, "R1/mallory")
        .await;
    assert!(matches!(result, Err(RoomError::ActorExists { .. })));

    // The original actor is untouched.
    let actor = room.actors().get(client.actor_id).expect("first actor");
    assert_eq!(actor.data(), &json!({ "name": "alice" }));
}

#[tokio::test]
async fn mismatched_sync_answer_kicks_without_join() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();
    let mut events = room.subscribe();

    let mut client = TestClient::connect_pending(layer, "R1/alice").await;
    let frame = client.recv_frame().await;
    match client.session.handle_frame(&frame).expect("handshake") {
        SessionEvent::Synced { .. } => {}
        other => panic!("expected handshake, got {other:?}"),
    }

    // Echo a foreign actor id instead of the assigned one.
    let registry = Arc::new(SchemaRegistry::new());
    let codec = atrium_protocol::ProtocolCodec::new(registry);
    let forged = codec
        .encode(
            SchemaRegistry::SYNC,
            &Payload::new().with("actorId", "ffffffff"),
        )
        .expect("forge answer");
    layer.deliver(client.actor_id, forged).await;

    // Kick propagated through the harness transport: the actor leaves
    // without ever joining.
    expect_event(&mut events, |event| {
        matches!(event, atrium_core::RoomEvent::Left(actor) if actor.id() == client.actor_id)
    })
    .await;
    assert_eq!(room.actors().count(), 0);
}

#[tokio::test]
async fn malformed_frame_kicks_an_active_actor() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let client = TestClient::connect(layer, "R1/alice").await;
    let mut events = room.subscribe();

    // Unknown action hash: one bad frame ends the connection.
    layer.deliver(client.actor_id, vec![0x7f, 0x7f, 0x00]).await;
    expect_event(&mut events, |event| {
        matches!(event, atrium_core::RoomEvent::Left(actor) if actor.id() == client.actor_id)
    })
    .await;
    assert_eq!(room.actors().count(), 0);
    assert_eq!(layer.connections(), 0);
}

#[tokio::test]
async fn failing_listener_kicks_the_sender() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let client = TestClient::connect(layer, "R1/alice").await;
    let mut events = room.subscribe();
    client.send("arena.fail", &Payload::new()).await;
    expect_event(&mut events, |event| {
        matches!(event, atrium_core::RoomEvent::Left(actor) if actor.id() == client.actor_id)
    })
    .await;
    assert_eq!(room.actors().count(), 0);
}

#[tokio::test]
async fn broadcast_respects_filters() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let mut alice = TestClient::connect(layer, "R1/alice").await;
    let mut bob = TestClient::connect(layer, "R1/bob").await;
    let payload = Payload::new().with("text", "to everyone");

    // Default filter: all active actors receive the frame.
    room.broadcast("arena.shout", &payload, None, None)
        .await
        .expect("broadcast");
    let (_, sender, data) = alice.recv_message().await;
    assert!(sender.is_root());
    assert_eq!(data.str("text"), Some("to everyone"));
    let (_, sender, _) = bob.recv_message().await;
    assert!(sender.is_root());

    // Always-false filter: zero deliveries.
    room.broadcast(
        "arena.shout",
        &payload,
        None,
        Some(Arc::new(|_, _, _, _| Box::pin(async { false }))),
    )
    .await
    .expect("broadcast");
    alice.assert_quiet().await;
    bob.assert_quiet().await;

    // Per-receiver filter: only bob passes.
    let bob_id = bob.actor_id;
    room.broadcast(
        "arena.shout",
        &payload,
        None,
        Some(Arc::new(move |_, receiver: atrium_core::Actor, _, _| {
            Box::pin(async move { receiver.id() == bob_id })
        })),
    )
    .await
    .expect("broadcast");
    bob.recv_message().await;
    alice.assert_quiet().await;
}

#[tokio::test]
async fn leaving_mid_broadcast_is_not_an_error() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();

    let mut alice = TestClient::connect(layer, "R1/alice").await;
    let mut bob = TestClient::connect(layer, "R1/bob").await;

    // The filter suspends long enough for bob to disconnect before his
    // delivery fires; the late send must be a silent no-op.
    room.broadcast(
        "arena.shout",
        &Payload::new().with("text", "slow"),
        None,
        Some(Arc::new(|_, _, _, _| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                true
            })
        })),
    )
    .await
    .expect("broadcast");
    layer.leave(bob.actor_id).await;

    alice.recv_message().await;
    bob.assert_quiet().await;
    assert_eq!(room.actors().count(), 1);
}

#[tokio::test]
async fn identical_room_types_produce_identical_action_tables() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let first = rooms.create("R1", "arena").await.expect("create room");
    let second = rooms.create("R2", "arena").await.expect("create room");
    let list = first.action_list();
    assert!(!list.is_empty());
    assert_eq!(list, second.action_list());
    // Hashes are strictly increasing from 0001.
    assert!(list[0].starts_with("0001,"));
}

#[tokio::test]
async fn room_manager_lifecycle() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();

    assert!(matches!(
        rooms.define("arena", || Arc::new(()) as Arc<dyn RoomBehavior>),
        Err(RoomError::DuplicateDefinition(_))
    ));
    assert!(matches!(
        rooms.create("R1", "casino").await,
        Err(RoomError::UndefinedType(_))
    ));

    rooms.create("R1", "arena").await.expect("create room");
    assert!(matches!(
        rooms.create("R1", "arena").await,
        Err(RoomError::DuplicateRoomId(_))
    ));
    assert_eq!(rooms.ids(), vec!["R1".to_string()]);
    assert_eq!(rooms.types(), vec!["arena".to_string()]);

    rooms.destroy("R1").await.expect("destroy room");
    assert!(rooms.ids().is_empty());
    assert!(matches!(
        rooms.destroy("R1").await,
        Err(RoomError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn destroying_a_room_directly_removes_it_from_the_manager() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let layer = fixture.server.transport_layer();
    let client = TestClient::connect(layer, "R1/alice").await;

    room.destroy().await;
    // Destroy cascades: the actor is kicked, and the manager's watcher
    // removes the room from the live map.
    timeout(RECV_TIMEOUT, async {
        loop {
            if rooms.get("R1").is_none() && room.actors().count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room did not clean up");
    assert_eq!(layer.connections(), 0);
    drop(client);
}

#[tokio::test]
async fn rooms_emit_periodic_update_events() {
    let fixture = arena_server().await;
    let rooms = fixture.server.rooms();
    let room = rooms.create("R1", "arena").await.expect("create room");
    let mut events = room.subscribe();
    expect_event(&mut events, |event| {
        matches!(event, atrium_core::RoomEvent::Update)
    })
    .await;
    room.destroy().await;
}
