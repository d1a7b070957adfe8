//! End-to-end tests of the registry sync protocol: an instance server
//! watching its rooms, connected in-process to a real registry room.

use async_trait::async_trait;
use atrium_core::{
    AuthError, AuthMiddleware, RoomBehavior, Server, ServerConfig, TransportError,
};
use atrium_registry::{
    InstanceRegistry, LocalLink, RegistryError, RegistryLink, RegistrySettings, Watcher,
    WatcherSettings,
};
use atrium_protocol::ActorId;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

struct InstanceAuth;

#[async_trait]
impl AuthMiddleware for InstanceAuth {
    async fn get_room_id(&self, ticket: &str) -> Result<String, AuthError> {
        Ok(ticket.to_string())
    }

    async fn extract(&self, _ticket: &str) -> Result<serde_json::Value, AuthError> {
        Ok(json!({}))
    }
}

/// Counts every frame the watcher puts on the wire (handshake answer
/// included), so tests can assert push suppression.
struct CountingLink {
    inner: Arc<LocalLink>,
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl RegistryLink for CountingLink {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(frame).await
    }
}

struct Fleet {
    registry: InstanceRegistry,
    instance: Server,
    link: Arc<LocalLink>,
    sends: Arc<AtomicUsize>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn fleet() -> Fleet {
    init_tracing();
    let registry = InstanceRegistry::run(
        RegistrySettings {
            room_id: "registry".to_string(),
            token: Some("secret".to_string()),
        },
        Vec::new(),
    )
    .await
    .expect("registry run");

    let instance = Server::new(ServerConfig {
        name: Some("eu-1".to_string()),
        auth: Arc::new(InstanceAuth),
        transports: Vec::new(),
    });
    instance.run().await.expect("instance run");
    instance
        .rooms()
        .define("arena", || Arc::new(()) as Arc<dyn RoomBehavior>)
        .expect("define arena");

    let (link, inbound) = LocalLink::connect(registry.transport_layer(), "secret")
        .await
        .expect("link connect");
    let sends = Arc::new(AtomicUsize::new(0));
    let counting = Arc::new(CountingLink {
        inner: link.clone(),
        sends: sends.clone(),
    });
    let watcher = Watcher::new(
        instance.rooms().clone(),
        counting,
        inbound,
        WatcherSettings {
            name: "eu-1".to_string(),
            namespace: String::new(),
            endpoint_url: "ws://eu-1.example:7070".to_string(),
            sync_interval_ms: 50,
        },
    );
    tokio::spawn(watcher.run());

    Fleet {
        registry,
        instance,
        link,
        sends,
    }
}

async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        loop {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn instance_registers_and_pushes_are_deduplicated() {
    let fleet = fleet().await;
    let api = fleet.registry.api();

    wait_until(
        || api.instances().map(|list| list.len() == 1).unwrap_or(false),
        "instance registration",
    )
    .await;
    let instance = api.instances().unwrap().remove(0);
    assert_eq!(instance.id, fleet.link.actor_id());
    assert_eq!(instance.name, "eu-1");
    assert_eq!(instance.endpoint_url, "ws://eu-1.example:7070");
    assert_eq!(instance.room_types, vec!["arena".to_string()]);
    assert!(instance.rooms.is_empty());
    assert_eq!(instance.connections, 0);

    // Handshake answer + the initial state push.
    let settled = fleet.sends.load(Ordering::SeqCst);
    assert_eq!(settled, 2);

    // Several idle sync intervals pass; the unchanged snapshot is
    // suppressed by the digest.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(fleet.sends.load(Ordering::SeqCst), settled);

    // A state mutation always pushes.
    fleet
        .instance
        .rooms()
        .create("r1", "arena")
        .await
        .expect("create room");
    wait_until(
        || {
            api.rooms()
                .map(|rooms| rooms.iter().any(|room| room.id == "r1"))
                .unwrap_or(false)
        },
        "room visible in the registry",
    )
    .await;
    assert!(fleet.sends.load(Ordering::SeqCst) > settled);

    let room = api.room("r1").unwrap().expect("room view");
    assert_eq!(room.room_type, "arena");
    assert_eq!(room.instance, fleet.link.actor_id());
    assert_eq!(room.endpoint_url, "ws://eu-1.example:7070");

    let stats = api.stats().unwrap();
    assert_eq!(stats.instances, 1);
    assert_eq!(stats.rooms, 1);
    assert_eq!(stats.room_types, vec!["arena".to_string()]);
}

#[tokio::test]
async fn registry_commands_create_and_destroy_remote_rooms() {
    let fleet = fleet().await;
    let api = fleet.registry.api();
    let instance_id = fleet.link.actor_id();
    wait_until(
        || api.instances().map(|list| list.len() == 1).unwrap_or(false),
        "instance registration",
    )
    .await;

    api.create(instance_id, "r9", "arena").await.expect("create command");
    wait_until(
        || fleet.instance.rooms().get("r9").is_some(),
        "room created on the instance",
    )
    .await;
    wait_until(
        || {
            api.rooms()
                .map(|rooms| rooms.iter().any(|room| room.id == "r9"))
                .unwrap_or(false)
        },
        "room visible in the registry",
    )
    .await;

    // Stale or invalid commands fail locally with a descriptive error.
    assert!(matches!(
        api.create(instance_id, "r9", "arena").await,
        Err(RegistryError::DuplicateRoom { .. })
    ));
    assert!(matches!(
        api.create(instance_id, "other", "casino").await,
        Err(RegistryError::UnsupportedType { .. })
    ));
    let ghost = "deadbeef".parse::<ActorId>().unwrap();
    assert!(matches!(
        api.create(ghost, "other", "arena").await,
        Err(RegistryError::UnknownInstance(_))
    ));
    assert!(matches!(
        api.destroy(instance_id, "nope").await,
        Err(RegistryError::UnknownRoom { .. })
    ));

    api.destroy(instance_id, "r9").await.expect("destroy command");
    wait_until(
        || fleet.instance.rooms().get("r9").is_none(),
        "room destroyed on the instance",
    )
    .await;
    wait_until(
        || {
            api.rooms()
                .map(|rooms| rooms.is_empty())
                .unwrap_or(false)
        },
        "room gone from the registry",
    )
    .await;
}

#[tokio::test]
async fn departing_instances_drop_out_of_the_fleet() {
    let fleet = fleet().await;
    let api = fleet.registry.api();
    wait_until(
        || api.instances().map(|list| list.len() == 1).unwrap_or(false),
        "instance registration",
    )
    .await;

    fleet.link.close().await;
    wait_until(
        || api.instances().map(|list| list.is_empty()).unwrap_or(false),
        "instance removal",
    )
    .await;
    let stats = api.stats().unwrap();
    assert_eq!(stats.instances, 0);
    assert_eq!(stats.rooms, 0);
    assert_eq!(stats.connections, 0);
}
