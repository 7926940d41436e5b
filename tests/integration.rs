//! Transport Integration Tests
//!
//! End-to-end handshake and traffic scenarios over the in-process broker
//! binding: connect, accept, private-channel exchange, timeout behavior, and
//! isolation between concurrently accepted clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use pretty_assertions::assert_eq;

use tunnelmq::broker::{MemoryBroker, MemoryConnectionFactory};
use tunnelmq::{
    ClientConnector, ConnectionFactory, ConnectionListener, ServiceAddress, TransportConfig,
    TransportError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn factory_on(broker: &Arc<MemoryBroker>) -> Arc<dyn ConnectionFactory> {
    init_tracing();
    Arc::new(MemoryConnectionFactory::new(broker.clone()))
}

fn address(url: &str) -> ServiceAddress {
    ServiceAddress::parse(url).unwrap()
}

async fn started_listener(broker: &Arc<MemoryBroker>, url: &str) -> ConnectionListener {
    let mut listener =
        ConnectionListener::new(factory_on(broker), address(url), TransportConfig::default())
            .unwrap();
    listener.start().await.unwrap();
    listener
}

#[tokio::test]
async fn test_end_to_end_round_trip() {
    let broker = MemoryBroker::new();
    let mut listener = started_listener(&broker, "memq://host:1/mgmt").await;

    let mut client = ClientConnector::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        TransportConfig::default(),
    )
    .unwrap();
    client.connect().await.unwrap();

    let mut server = listener.accept().await.unwrap();

    // The accepted channel is addressed at the client's private reply
    // destination, with no discovery step needed on the server side.
    assert_eq!(
        server.peer_destination(),
        client.local_destination(),
    );

    server.send(Bytes::from_static(b"X")).await.unwrap();
    assert_eq!(client.receive().await.unwrap(), Bytes::from_static(b"X"));

    client.send(Bytes::from_static(b"Y")).await.unwrap();
    assert_eq!(server.receive().await.unwrap(), Bytes::from_static(b"Y"));

    client.close().await.unwrap();
    server.close().await.unwrap();
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_learns_server_private_destination() {
    let broker = MemoryBroker::new();
    let mut listener = started_listener(&broker, "memq://host:1/mgmt").await;

    let mut client = ClientConnector::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        TransportConfig::default(),
    )
    .unwrap();
    client.connect().await.unwrap();

    let mut server = listener.accept().await.unwrap();
    server.send(Bytes::from_static(b"hello")).await.unwrap();
    client.receive().await.unwrap();

    // The client discovered the server channel's own temporary address from
    // the first reply and can now reach it directly.
    client.send(Bytes::from_static(b"direct")).await.unwrap();
    assert_eq!(
        server.receive().await.unwrap(),
        Bytes::from_static(b"direct")
    );
}

#[tokio::test]
async fn test_connect_timeout_bounds_first_receive() {
    let broker = MemoryBroker::new();
    // No listener: the connect request vanishes (non-durable delivery).
    let config = TransportConfig {
        connect_timeout_ms: 100,
        ..Default::default()
    };
    let mut client =
        ClientConnector::new(factory_on(&broker), address("memq://host:1/mgmt"), config).unwrap();
    client.connect().await.unwrap();

    let start = Instant::now();
    let result = client.receive().await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(TransportError::Timeout)));
    assert!(elapsed >= Duration::from_millis(90), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "fired late: {:?}", elapsed);
}

#[tokio::test]
async fn test_two_clients_no_crosstalk() {
    let broker = MemoryBroker::new();
    let mut listener = started_listener(&broker, "memq://host:1/mgmt").await;

    let mut client_a = ClientConnector::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        TransportConfig::default(),
    )
    .unwrap();
    let mut client_b = ClientConnector::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        TransportConfig::default(),
    )
    .unwrap();

    client_a.connect().await.unwrap();
    client_b.connect().await.unwrap();

    let mut server_a = listener.accept().await.unwrap();
    let mut server_b = listener.accept().await.unwrap();

    // Connect requests are served in publish order on the well-known topic.
    assert_eq!(server_a.peer_destination(), client_a.local_destination());
    assert_eq!(server_b.peer_destination(), client_b.local_destination());
    assert_ne!(server_a.peer_destination(), server_b.peer_destination());

    server_a.send(Bytes::from_static(b"for a")).await.unwrap();
    server_b.send(Bytes::from_static(b"for b")).await.unwrap();

    assert_eq!(
        client_a.receive().await.unwrap(),
        Bytes::from_static(b"for a")
    );
    assert_eq!(
        client_b.receive().await.unwrap(),
        Bytes::from_static(b"for b")
    );

    // Replies stay on their own channels too.
    client_b.send(Bytes::from_static(b"from b")).await.unwrap();
    client_a.send(Bytes::from_static(b"from a")).await.unwrap();
    assert_eq!(
        server_a.receive().await.unwrap(),
        Bytes::from_static(b"from a")
    );
    assert_eq!(
        server_b.receive().await.unwrap(),
        Bytes::from_static(b"from b")
    );
}

#[tokio::test]
async fn test_accept_loop_with_worker_per_channel() {
    let broker = MemoryBroker::new();
    let mut listener = started_listener(&broker, "memq://host:1/mgmt").await;

    // Acceptor task: accept in a loop, hand each channel to its own echo
    // worker so one slow client cannot block the next accept. The worker
    // greets first; a fresh client cannot send until the server's first
    // reply has taught it the peer address.
    let acceptor = tokio::spawn(async move {
        for _ in 0..2 {
            let mut channel = listener.accept().await.unwrap();
            tokio::spawn(async move {
                channel.send(Bytes::from_static(b"ready")).await.unwrap();
                let payload = channel.receive().await.unwrap();
                channel.send(payload).await.unwrap();
                channel.close().await.unwrap();
            });
        }
        listener.stop().await.unwrap();
    });

    let mut clients = Vec::new();
    for name in [&b"alpha"[..], &b"beta"[..]] {
        let mut client = ClientConnector::new(
            factory_on(&broker),
            address("memq://host:1/mgmt"),
            TransportConfig::default(),
        )
        .unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.receive().await.unwrap(), Bytes::from_static(b"ready"));
        client.send(Bytes::copy_from_slice(name)).await.unwrap();
        clients.push((client, name));
    }

    for (mut client, name) in clients {
        assert_eq!(client.receive().await.unwrap(), Bytes::copy_from_slice(name));
        client.close().await.unwrap();
    }

    acceptor.await.unwrap();
}

#[tokio::test]
async fn test_application_traffic_does_not_reach_acceptor() {
    let broker = MemoryBroker::new();
    let mut listener = started_listener(&broker, "memq://host:1/mgmt").await;

    let mut client = ClientConnector::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        TransportConfig::default(),
    )
    .unwrap();
    client.connect().await.unwrap();
    let mut server = listener.accept().await.unwrap();

    // Traffic flows on the private channels while the listener sits on the
    // well-known topic; a second accept must still be waiting, not consuming
    // channel traffic.
    server.send(Bytes::from_static(b"ping")).await.unwrap();
    client.receive().await.unwrap();
    client.send(Bytes::from_static(b"pong")).await.unwrap();
    server.receive().await.unwrap();

    let pending_accept = tokio::time::timeout(Duration::from_millis(80), listener.accept()).await;
    assert!(pending_accept.is_err(), "accept consumed non-connect traffic");
}

#[tokio::test]
async fn test_authenticated_end_to_end() {
    let broker = MemoryBroker::with_credentials("mgmt", "wires");
    let config = TransportConfig::parse(
        r#"
[credentials]
username = "mgmt"
password = "wires"
"#,
    )
    .unwrap();

    let mut listener = ConnectionListener::new(
        factory_on(&broker),
        address("memq://host:1/mgmt"),
        config.clone(),
    )
    .unwrap();
    listener.start().await.unwrap();

    let mut client =
        ClientConnector::new(factory_on(&broker), address("memq://host:1/mgmt"), config).unwrap();
    client.connect().await.unwrap();

    let mut server = listener.accept().await.unwrap();
    server.send(Bytes::from_static(b"ok")).await.unwrap();
    assert_eq!(client.receive().await.unwrap(), Bytes::from_static(b"ok"));
}
