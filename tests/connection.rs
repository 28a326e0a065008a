#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end connection tests over real loopback sockets: negotiation
//! exchanges, compression and encryption switches, ordering, unknown-id
//! accounting, and shutdown semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use craft_protocol::config::ConnectionConfig;
use craft_protocol::error::{ProtocolError, Result};
use craft_protocol::protocol::connection::Connection;
use craft_protocol::protocol::registry::{HandlerRegistry, Message, MessageShape};
use craft_protocol::protocol::state::{ConnectionState, Direction};
use rand::RngCore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Opaque test message: an id plus raw body bytes.
#[derive(Debug, Clone, PartialEq)]
struct RawMessage {
    id: i32,
    body: Vec<u8>,
}

impl RawMessage {
    fn new(id: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }
}

impl Message for RawMessage {
    fn id(&self) -> i32 {
        self.id
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.body);
        Ok(())
    }
}

fn raw_shape(id: i32) -> impl MessageShape {
    move |body: &[u8]| {
        Ok(Box::new(RawMessage::new(id, body.to_vec())) as Box<dyn Message>)
    }
}

/// Forward every decoded message to a channel as (id, body).
fn channel_sink(
    tx: mpsc::UnboundedSender<(i32, Vec<u8>)>,
) -> impl Fn(Box<dyn Message>) + Send + Sync {
    move |message| {
        let mut body = Vec::new();
        message.encode(&mut body).unwrap();
        let _ = tx.send((message.id(), body));
    }
}

/// Accept + connect a loopback socket pair and bind a connection to each
/// end. Neither side is initialized yet.
async fn connected_pair(
    server_registry: Arc<HandlerRegistry>,
    client_registry: Arc<HandlerRegistry>,
    config: ConnectionConfig,
) -> (Arc<Connection>, Arc<Connection>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server_stream, _) = accepted.unwrap();

    let server = Connection::new(
        server_stream,
        Direction::Serverbound,
        server_registry,
        config.clone(),
    )
    .unwrap();
    let client = Connection::new(
        connected.unwrap(),
        Direction::Clientbound,
        client_registry,
        config,
    )
    .unwrap();

    (server, client)
}

async fn recv(
    rx: &mut mpsc::UnboundedReceiver<(i32, Vec<u8>)>,
) -> (i32, Vec<u8>) {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn test_handshake_to_status_round_trip() {
    // Server knows the serverbound handshake and status-request ids;
    // client knows the clientbound status-response id.
    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Handshake,
            0x00,
            raw_shape(0x00),
        )
        .unwrap();
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Status,
            0x00,
            raw_shape(0x00),
        )
        .unwrap();

    let client_registry = Arc::new(HandlerRegistry::new());
    client_registry
        .register(
            Direction::Clientbound,
            ConnectionState::Status,
            0x00,
            raw_shape(0x00),
        )
        .unwrap();

    let (server, client) =
        connected_pair(server_registry, client_registry, ConnectionConfig::default()).await;

    let status_json = br#"{"version":{"name":"1.21","protocol":767}}"#.to_vec();

    // Server: handshake in Handshake transitions to Status; the request in
    // Status earns the response.
    server.set_message_sink({
        let server = Arc::clone(&server);
        let status_json = status_json.clone();
        move |message| match (server.state(), message.id()) {
            (ConnectionState::Handshake, 0x00) => server.set_state(ConnectionState::Status),
            (ConnectionState::Status, 0x00) => {
                server
                    .send(&RawMessage::new(0x00, status_json.clone()))
                    .unwrap();
            }
            (state, id) => panic!("unexpected message 0x{id:02x} in {state}"),
        }
    });

    let server_closed = Arc::new(Mutex::new(None::<bool>));
    server.set_closed_sink({
        let server_closed = Arc::clone(&server_closed);
        move |notified| {
            *server_closed.lock().unwrap() = Some(notified);
        }
    });

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    client.set_message_sink(channel_sink(client_tx));

    let client_closed = Arc::new(Mutex::new(None::<bool>));
    client.set_closed_sink({
        let client_closed = Arc::clone(&client_closed);
        move |notified| {
            *client_closed.lock().unwrap() = Some(notified);
        }
    });

    server.initialize().unwrap();
    client.initialize().unwrap();

    // Handshake body: protocol version + next-state, both varints.
    client
        .send(&RawMessage::new(0x00, vec![0xFF, 0x05, 0x01]))
        .unwrap();
    client.set_state(ConnectionState::Status);
    client.send(&RawMessage::new(0x00, Vec::new())).unwrap();

    let (id, body) = recv(&mut client_rx).await;
    assert_eq!(id, 0x00);
    assert_eq!(body, status_json);

    // One round trip done; close from the client side.
    client.stop();
    assert_eq!(*client_closed.lock().unwrap(), Some(true));
    assert!(!client.is_connected());

    // The server observes the disconnect as an abrupt close.
    timeout(WAIT, async {
        while server_closed.lock().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never observed the disconnect");
    assert!(!server.is_connected());
    assert_eq!(*server_closed.lock().unwrap(), Some(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_play_state_ordering() {
    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Play,
            0x10,
            raw_shape(0x10),
        )
        .unwrap();

    let (server, client) = connected_pair(
        server_registry,
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(tx));

    server.set_state(ConnectionState::Play);
    client.set_state(ConnectionState::Play);
    server.initialize().unwrap();
    client.initialize().unwrap();

    for label in [b"A", b"B", b"C"] {
        client
            .send(&RawMessage::new(0x10, label.to_vec()))
            .unwrap();
    }

    // FIFO queues with a single consumer: dispatch order matches send
    // order exactly.
    assert_eq!(recv(&mut rx).await, (0x10, b"A".to_vec()));
    assert_eq!(recv(&mut rx).await, (0x10, b"B".to_vec()));
    assert_eq!(recv(&mut rx).await, (0x10, b"C".to_vec()));

    client.stop();
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stop_closes_once() {
    let (server, client) = connected_pair(
        Arc::new(HandlerRegistry::new()),
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let closed_count = Arc::new(AtomicUsize::new(0));
    client.set_closed_sink({
        let closed_count = Arc::clone(&closed_count);
        move |_notified| {
            closed_count.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.initialize().unwrap();

    let racer_a = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.stop() })
    };
    let racer_b = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.stop() })
    };
    racer_a.await.unwrap();
    racer_b.await.unwrap();

    // And a straggler after the race is settled.
    client.stop();

    assert_eq!(closed_count.load(Ordering::SeqCst), 1);
    server.stop();
}

#[tokio::test]
async fn test_unknown_id_accounting() {
    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Handshake,
            0x00,
            raw_shape(0x00),
        )
        .unwrap();

    let (server, client) = connected_pair(
        server_registry,
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(tx));
    server.initialize().unwrap();
    client.initialize().unwrap();

    for _ in 0..5 {
        client.send(&RawMessage::new(0x55, b"junk".to_vec())).unwrap();
    }
    // A known id behind the junk synchronizes the assertion point.
    client.send(&RawMessage::new(0x00, Vec::new())).unwrap();
    recv(&mut rx).await;

    assert_eq!(
        server.unknown_message_count(ConnectionState::Handshake, 0x55),
        5
    );
    assert_eq!(
        server.unknown_message_count(ConnectionState::Status, 0x55),
        0
    );

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_state_gates_resolution() {
    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Play,
            0x30,
            raw_shape(0x30),
        )
        .unwrap();
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Handshake,
            0x01,
            raw_shape(0x01),
        )
        .unwrap();

    let (server, client) = connected_pair(
        server_registry,
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(tx));
    server.initialize().unwrap();
    client.initialize().unwrap();

    // A Play-only id must not resolve while the server is in Handshake.
    client.send(&RawMessage::new(0x30, b"early".to_vec())).unwrap();
    client.send(&RawMessage::new(0x01, Vec::new())).unwrap();
    let (id, _) = recv(&mut rx).await;
    assert_eq!(id, 0x01);
    assert_eq!(
        server.unknown_message_count(ConnectionState::Handshake, 0x30),
        1
    );

    // After the transition the same id resolves and flows through the
    // queued dispatch path.
    server.set_state(ConnectionState::Play);
    client.send(&RawMessage::new(0x30, b"late".to_vec())).unwrap();
    assert_eq!(recv(&mut rx).await, (0x30, b"late".to_vec()));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_compressed_exchange_both_directions() {
    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Login,
            0x02,
            raw_shape(0x02),
        )
        .unwrap();
    let client_registry = Arc::new(HandlerRegistry::new());
    client_registry
        .register(
            Direction::Clientbound,
            ConnectionState::Login,
            0x03,
            raw_shape(0x03),
        )
        .unwrap();

    let (server, client) =
        connected_pair(server_registry, client_registry, ConnectionConfig::default()).await;

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(server_tx));
    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    client.set_message_sink(channel_sink(client_tx));

    server.set_state(ConnectionState::Login);
    client.set_state(ConnectionState::Login);
    server.set_compression(true, 64);
    client.set_compression(true, 64);

    server.initialize().unwrap();
    client.initialize().unwrap();

    // Below threshold: verbatim payload behind an inner length of zero.
    client.send(&RawMessage::new(0x02, b"small".to_vec())).unwrap();
    // At/above threshold: deflated on the wire.
    let large = vec![0x5Au8; 8 * 1024];
    client.send(&RawMessage::new(0x02, large.clone())).unwrap();

    assert_eq!(recv(&mut server_rx).await, (0x02, b"small".to_vec()));
    assert_eq!(recv(&mut server_rx).await, (0x02, large.clone()));

    server.send(&RawMessage::new(0x03, large.clone())).unwrap();
    assert_eq!(recv(&mut client_rx).await, (0x03, large));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_encrypted_exchange() {
    let secret = [0x42u8; 16];

    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Play,
            0x07,
            raw_shape(0x07),
        )
        .unwrap();
    let client_registry = Arc::new(HandlerRegistry::new());
    client_registry
        .register(
            Direction::Clientbound,
            ConnectionState::Play,
            0x08,
            raw_shape(0x08),
        )
        .unwrap();

    let (server, client) =
        connected_pair(server_registry, client_registry, ConnectionConfig::default()).await;

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(server_tx));
    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    client.set_message_sink(channel_sink(client_tx));

    server.set_state(ConnectionState::Play);
    client.set_state(ConnectionState::Play);
    server.init_encryption(&secret).unwrap();
    client.init_encryption(&secret).unwrap();
    assert!(server.encryption_initiated());

    server.initialize().unwrap();
    client.initialize().unwrap();

    client
        .send(&RawMessage::new(0x07, b"attack at dawn".to_vec()))
        .unwrap();
    assert_eq!(recv(&mut server_rx).await, (0x07, b"attack at dawn".to_vec()));

    server
        .send(&RawMessage::new(0x08, b"acknowledged".to_vec()))
        .unwrap();
    assert_eq!(recv(&mut client_rx).await, (0x08, b"acknowledged".to_vec()));

    // Encryption is one-shot and irreversible.
    let again = client.init_encryption(&secret);
    assert!(matches!(again, Err(ProtocolError::AlreadyEncrypted)));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_compressed_and_encrypted_exchange() {
    let secret = [0x13u8; 16];

    let server_registry = Arc::new(HandlerRegistry::new());
    server_registry
        .register(
            Direction::Serverbound,
            ConnectionState::Play,
            0x21,
            raw_shape(0x21),
        )
        .unwrap();

    let (server, client) = connected_pair(
        server_registry,
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_message_sink(channel_sink(tx));

    server.set_state(ConnectionState::Play);
    client.set_state(ConnectionState::Play);
    server.set_compression(true, 128);
    client.set_compression(true, 128);
    server.init_encryption(&secret).unwrap();
    client.init_encryption(&secret).unwrap();

    server.initialize().unwrap();
    client.initialize().unwrap();

    // Compressible and incompressible payloads both survive the stacked
    // transforms.
    let repetitive: Vec<u8> = (0u8..=255).cycle().take(16 * 1024).collect();
    let mut random = vec![0u8; 16 * 1024];
    rand::rng().fill_bytes(&mut random);

    client
        .send(&RawMessage::new(0x21, repetitive.clone()))
        .unwrap();
    client.send(&RawMessage::new(0x21, random.clone())).unwrap();

    assert_eq!(recv(&mut rx).await, (0x21, repetitive));
    assert_eq!(recv(&mut rx).await, (0x21, random));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_send_rejects_invalid_id() {
    let (server, client) = connected_pair(
        Arc::new(HandlerRegistry::new()),
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    let result = client.send(&RawMessage::new(-1, Vec::new()));
    assert!(matches!(result, Err(ProtocolError::InvalidMessage(-1))));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_initialize_is_one_shot() {
    let (server, client) = connected_pair(
        Arc::new(HandlerRegistry::new()),
        Arc::new(HandlerRegistry::new()),
        ConnectionConfig::default(),
    )
    .await;

    client.initialize().unwrap();
    assert!(client.initialize().is_err());

    client.stop();
    server.stop();
}
